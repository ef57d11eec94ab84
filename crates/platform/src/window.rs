//! Window management using winit.
//!
//! [`Window`] is the renderer's [`SurfaceProvider`]: it creates the Vulkan
//! surface, reports the framebuffer size and raises the registered
//! [`ResizeFlag`]s when the application forwards a resize event.

use std::ffi::c_char;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use vkframe_core::config::WindowConfig;
use vkframe_core::{Error, Result};
use vkframe_rhi::{ResizeFlag, RhiError, RhiResult, SurfaceProvider};

/// Polling interval of [`SurfaceProvider::wait_events`] while minimized.
const MINIMIZED_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// A winit window shared between the application and the renderer.
///
/// Clones refer to the same window and the same resize hooks.
#[derive(Clone)]
pub struct Window {
    window: Arc<WinitWindow>,
    hooks: Arc<Mutex<Vec<ResizeFlag>>>,
}

impl Window {
    /// Create a new window from the window section of the configuration.
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", config.width, config.height);

        Ok(Self {
            window: Arc::new(window),
            hooks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Width over height of the current framebuffer, 1.0 while minimized.
    pub fn aspect_ratio(&self) -> f32 {
        let size = self.window.inner_size();
        if size.width == 0 || size.height == 0 {
            1.0
        } else {
            size.width as f32 / size.height as f32
        }
    }

    /// Forward a `WindowEvent::Resized` here so the renderer rebuilds its swapchain.
    pub fn notify_resized(&self, width: u32, height: u32) {
        tracing::debug!("Window resized: {}x{}", width, height);
        let hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook.raise();
        }
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl SurfaceProvider for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn register_resize_hook(&mut self, hook: ResizeFlag) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Sleeps for one poll interval without pumping events.
    ///
    /// winit only delivers events to the application's handler, so this
    /// never observes a restore made on the event thread. The application
    /// skips drawing while [`SurfaceProvider::has_area`] is false.
    fn wait_events(&mut self) {
        std::thread::sleep(MINIMIZED_POLL_INTERVAL);
    }

    fn required_instance_extensions(&self) -> RhiResult<Vec<*const c_char>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(format!("Failed to get display handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())?;

        tracing::debug!(
            "Required Vulkan extensions for surface: {:?}",
            extensions
                .iter()
                // SAFETY: ash_window returns pointers to static, nul-terminated
                // extension names.
                .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
                .collect::<Vec<_>>()
        );

        Ok(extensions.to_vec())
    }

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> RhiResult<vk::SurfaceKHR> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| RhiError::SurfaceError(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: entry and instance are live, and the handles come from a
        // window that outlives the surface (the renderer drops the device,
        // and with it the surface, before the window).
        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )?
        };

        tracing::info!("Vulkan surface created successfully");
        Ok(surface)
    }
}
