//! vkframe demo: a rotating, textured cube drawn through one pipeline setup.
//!
//! Usage: `vkframe [config.toml]`. Shaders are loaded from `shaders/spirv`
//! relative to the working directory unless `VKFRAME_SHADER_DIR` is set.

mod camera;
mod material;
mod mesh;

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec3};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use vkframe_core::{FpsCounter, RendererConfig, Timer};
use vkframe_platform::Window;
use vkframe_renderer::{Drawable, Renderer, SetupBinder};
use vkframe_rhi::SurfaceProvider;
use vkframe_rhi::upload::upload_texture;

use camera::OrbitCamera;
use material::SimpleMaterial;
use mesh::{MeshData, TexturedMesh, checkerboard};

const DEFAULT_SHADER_DIR: &str = "shaders/spirv";
const TEXTURE_SIZE: u32 = 256;
const TEXTURE_CELLS: u32 = 8;
/// Radians per second.
const SPIN_SPEED: f32 = 0.8;
const ORBIT_SPEED: f32 = 0.2;

/// Everything the demo draws. Dropped before the renderer.
struct Scene {
    camera: OrbitCamera,
    cube: Rc<TexturedMesh>,
    _material: Rc<SimpleMaterial>,
    spin: f32,
}

impl Scene {
    fn load(renderer: &mut Renderer, shader_dir: PathBuf) -> vkframe_renderer::Result<Self> {
        let material = Rc::new(SimpleMaterial::new(shader_dir));
        let setup = renderer.register_setup(material.clone() as Rc<dyn SetupBinder>)?;

        let pixels = checkerboard(TEXTURE_SIZE, TEXTURE_CELLS);
        let texture = upload_texture(
            renderer.device(),
            renderer.transfer(),
            &pixels,
            TEXTURE_SIZE,
            TEXTURE_SIZE,
            vk::Format::R8G8B8A8_SRGB,
        )?;

        let cube = Rc::new(TexturedMesh::new(
            renderer,
            setup,
            &MeshData::cube(),
            Rc::new(texture),
        )?);
        renderer.set_drawable_objects(&[cube.clone() as Rc<dyn Drawable>])?;

        info!("Scene loaded: 1 setup, 1 drawable");
        Ok(Self {
            camera: OrbitCamera::default(),
            cube,
            _material: material,
            spin: 0.0,
        })
    }

    fn update(&mut self, delta_secs: f32) {
        self.spin = (self.spin + SPIN_SPEED * delta_secs) % std::f32::consts::TAU;
        self.camera.orbit(ORBIT_SPEED * delta_secs);
    }

    fn model(&self) -> Mat4 {
        Mat4::from_axis_angle(Vec3::new(0.3, 1.0, 0.0).normalize(), self.spin)
    }
}

struct App {
    config: RendererConfig,
    shader_dir: PathBuf,
    window: Option<Window>,
    scene: Option<Scene>,
    renderer: Option<Renderer>,
    timer: Timer,
    fps: FpsCounter,
}

impl App {
    fn new(config: RendererConfig, shader_dir: PathBuf) -> Self {
        Self {
            config,
            shader_dir,
            window: None,
            scene: None,
            renderer: None,
            timer: Timer::new(),
            fps: FpsCounter::default(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window)?;
        let mut renderer = Renderer::init(self.config.clone(), Box::new(window.clone()))?;
        let scene = Scene::load(&mut renderer, self.shader_dir.clone())?;

        self.window = Some(window);
        self.renderer = Some(renderer);
        self.scene = Some(scene);
        self.timer = Timer::new();
        Ok(())
    }

    fn redraw(&mut self) -> vkframe_renderer::Result<()> {
        let delta = self.timer.tick();
        if let Some(fps) = self.fps.frame(delta) {
            info!("{:.1} fps", fps);
        }

        let (Some(renderer), Some(scene)) = (self.renderer.as_mut(), self.scene.as_mut()) else {
            return Ok(());
        };
        scene.update(delta.as_secs_f32());

        let extent = renderer.swapchain_extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        renderer.update_global_uniform(&scene.camera.global_ubo(aspect))?;
        scene.cube.set_transform(renderer.current_frame(), scene.model())?;

        renderer.draw_frame()?;
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(renderer) = &self.renderer
            && let Err(e) = renderer.wait_idle()
        {
            warn!("Device did not go idle on shutdown: {}", e);
        }
        self.scene = None;
        self.renderer = None;
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(()) => info!("Initialization complete, entering main loop"),
            Err(e) => {
                error!("Failed to initialize: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = &self.window {
                    window.notify_resized(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                // Drawing without area blocks this thread in `wait_events`.
                if !self.window.as_ref().is_some_and(|w| w.has_area()) {
                    return;
                }
                if let Err(e) = self.redraw() {
                    if e.is_fatal() {
                        error!("Render error: {}", e);
                        self.shutdown();
                        event_loop.exit();
                    } else {
                        warn!("Frame skipped: {}", e);
                    }
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    self.shutdown();
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn load_config() -> Result<RendererConfig> {
    match std::env::args().nth(1) {
        Some(path) => RendererConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path)),
        None => Ok(RendererConfig::default()),
    }
}

fn main() -> Result<()> {
    vkframe_core::init_logging();
    info!("Starting vkframe");

    let config = load_config()?;
    let shader_dir = std::env::var_os("VKFRAME_SHADER_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SHADER_DIR));

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config, shader_dir);
    event_loop.run_app(&mut app)?;

    Ok(())
}
