//! Shared fixtures: a headless renderer, a minimal setup binder and an
//! indexed mesh drawable.

#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use vkframe_core::RendererConfig;
use vkframe_renderer::{
    Drawable, OBJECT_SET_INDEX, PipelineSetup, Renderer, RendererView, Result, SetupBinder,
    SetupId, framebuffer_recreator,
};
use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::command::CommandBuffer;
use vkframe_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
use vkframe_rhi::headless::{HeadlessDevice, HeadlessSurface, Submission};
use vkframe_rhi::pipeline::{GraphicsPipelineBuilder, PipelineLayout};
use vkframe_rhi::render_pass::{AttachmentLoad, RenderPass};
use vkframe_rhi::shader::{SPIRV_MAGIC, Shader, ShaderStage};
use vkframe_rhi::vertex::VertexPtn;
use vkframe_rhi::{RhiResult, vk};

/// Maximum drawables per test material.
const MAX_OBJECTS: usize = 16;

pub struct Harness {
    pub device: Arc<HeadlessDevice>,
    pub surface: HeadlessSurface,
    pub renderer: Renderer,
}

pub fn config(frames_in_flight: usize) -> RendererConfig {
    RendererConfig {
        frames_in_flight,
        enable_validation: false,
        ..RendererConfig::default()
    }
}

pub fn harness(frames_in_flight: usize) -> Harness {
    harness_on(HeadlessDevice::builder().build(), config(frames_in_flight))
}

pub fn harness_on(device: Arc<HeadlessDevice>, config: RendererConfig) -> Harness {
    let surface = HeadlessSurface::new(&device);
    let renderer = Renderer::with_device(config, device.clone(), Box::new(surface.clone()))
        .expect("renderer init");
    Harness {
        device,
        surface,
        renderer,
    }
}

/// Submissions made by `draw_frame`; one-shot transfers carry no fence.
pub fn frame_submissions(device: &HeadlessDevice) -> Vec<Submission> {
    device
        .submissions()
        .into_iter()
        .filter(|s| s.fence != vk::Fence::null())
        .collect()
}

pub fn last_frame(device: &HeadlessDevice) -> Submission {
    frame_submissions(device)
        .pop()
        .expect("at least one frame submitted")
}

fn fake_spirv() -> Vec<u8> {
    let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
    bytes.extend_from_slice(&[0; 16]);
    bytes
}

/// A material with one uniform binding per object.
#[derive(Default)]
pub struct TestMaterial {
    id: Cell<Option<SetupId>>,
    pub setup_resource_binds: Cell<usize>,
    /// Overrides the load behaviour the renderer view picks.
    load: Option<AttachmentLoad>,
}

impl TestMaterial {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_load(load: AttachmentLoad) -> Rc<Self> {
        Rc::new(Self {
            load: Some(load),
            ..Self::default()
        })
    }
}

impl SetupBinder for TestMaterial {
    fn create_setup(
        &self,
        view: &RendererView<'_>,
        global_layout: vk::DescriptorSetLayout,
        frames_in_flight: usize,
    ) -> Result<PipelineSetup> {
        let device = view.device;
        let render_pass = match self.load {
            Some(load) => RenderPass::with_load(
                device.clone(),
                view.swapchain.format(),
                view.depth_image.format(),
                load,
            )?,
            None => view.render_pass()?,
        };
        let render_pass_handle = render_pass.handle();

        let bindings = [DescriptorBindingBuilder::uniform_buffer(
            0,
            vk::ShaderStageFlags::VERTEX,
        )];
        let descriptor_set_layout = DescriptorSetLayout::new(device.clone(), &bindings)?;
        let descriptor_pool = DescriptorPool::for_bindings(
            device.clone(),
            &bindings,
            (frames_in_flight * MAX_OBJECTS) as u32,
        )?;
        let pipeline_layout = PipelineLayout::new(
            device.clone(),
            &[global_layout, descriptor_set_layout.handle()],
            &[],
        )?;

        let vertex = Shader::from_spirv_bytes(
            device.clone(),
            &fake_spirv(),
            ShaderStage::Vertex,
            "main",
        )?;
        let fragment = Shader::from_spirv_bytes(
            device.clone(),
            &fake_spirv(),
            ShaderStage::Fragment,
            "main",
        )?;
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .vertex_input::<VertexPtn>()
            .render_pass(render_pass_handle)
            .build(device.clone(), &pipeline_layout)?;

        Ok(PipelineSetup {
            framebuffers: view.swapchain_framebuffers(render_pass_handle)?,
            descriptor_sets: Vec::new(),
            descriptor_pool,
            pipeline,
            pipeline_layout,
            descriptor_set_layout,
            render_pass,
            recreate: framebuffer_recreator(render_pass_handle),
        })
    }

    fn bind_setup_resources(
        &self,
        _cmd: &CommandBuffer,
        _setup: &PipelineSetup,
        _frame_index: usize,
    ) -> RhiResult<()> {
        self.setup_resource_binds
            .set(self.setup_resource_binds.get() + 1);
        Ok(())
    }

    fn set_setup_id(&self, id: SetupId) {
        self.id.set(Some(id));
    }

    fn setup_id(&self) -> Option<SetupId> {
        self.id.get()
    }
}

/// An indexed mesh with one object set per frame in flight.
pub struct TestMesh {
    setup: SetupId,
    index_count: u32,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    object_sets: Vec<vk::DescriptorSet>,
}

impl TestMesh {
    pub fn new(renderer: &Renderer, setup: SetupId, index_count: u32) -> Rc<Self> {
        let device = renderer.device();
        let vertex_buffer = Buffer::with_usage(device.clone(), BufferUsage::Vertex, 96)
            .expect("vertex buffer");
        let index_buffer = Buffer::with_usage(
            device.clone(),
            BufferUsage::Index,
            u64::from(index_count.max(1)) * 4,
        )
        .expect("index buffer");
        let object_sets = renderer
            .setup(setup)
            .expect("registered setup")
            .allocate_object_sets(renderer.frames_in_flight())
            .expect("object sets");

        Rc::new(Self {
            setup,
            index_count,
            vertex_buffer,
            index_buffer,
            object_sets,
        })
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    pub fn object_set(&self, frame_index: usize) -> vk::DescriptorSet {
        self.object_sets[frame_index]
    }
}

impl Drawable for TestMesh {
    fn setup_id(&self) -> SetupId {
        self.setup
    }

    fn bind(
        &self,
        cmd: &CommandBuffer,
        layout: vk::PipelineLayout,
        frame_index: usize,
    ) -> RhiResult<()> {
        cmd.bind_descriptor_sets(layout, OBJECT_SET_INDEX, &[self.object_sets[frame_index]]);
        cmd.bind_vertex_buffers(0, &[self.vertex_buffer.handle()]);
        cmd.bind_index_buffer(self.index_buffer.handle(), vk::IndexType::UINT32);
        Ok(())
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }
}

pub fn as_drawables(meshes: &[&Rc<TestMesh>]) -> Vec<Rc<dyn Drawable>> {
    meshes
        .iter()
        .map(|mesh| Rc::clone(mesh) as Rc<dyn Drawable>)
        .collect()
}
