//! The "simple material": textured, lit geometry with one object set per draw.
//!
//! Set 0 is the renderer's frame-wide camera data. Set 1, owned by each
//! drawable, holds the object transform (binding 0) and the texture
//! (binding 1).

use std::cell::Cell;
use std::path::{Path, PathBuf};

use ash::vk;
use tracing::info;

use vkframe_renderer::{
    PipelineSetup, RendererView, Result, SetupBinder, SetupId, framebuffer_recreator,
};
use vkframe_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
use vkframe_rhi::pipeline::{CullMode, FrontFace, GraphicsPipelineBuilder, PipelineLayout};
use vkframe_rhi::shader::{Shader, ShaderStage};
use vkframe_rhi::vertex::VertexPtn;

/// Upper bound on drawables using this material.
pub const MAX_OBJECTS: usize = 64;

/// Object transform uniform.
pub const OBJECT_UBO_BINDING: u32 = 0;
/// Combined image sampler.
pub const TEXTURE_BINDING: u32 = 1;

pub struct SimpleMaterial {
    shader_dir: PathBuf,
    id: Cell<Option<SetupId>>,
}

impl SimpleMaterial {
    /// `shader_dir` holds `simple_material.vert.spv` and `simple_material.frag.spv`.
    pub fn new(shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            shader_dir: shader_dir.into(),
            id: Cell::new(None),
        }
    }

    pub fn object_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
        [
            DescriptorBindingBuilder::uniform_buffer(
                OBJECT_UBO_BINDING,
                vk::ShaderStageFlags::VERTEX,
            ),
            DescriptorBindingBuilder::combined_image_sampler(
                TEXTURE_BINDING,
                vk::ShaderStageFlags::FRAGMENT,
            ),
        ]
    }

    fn shader_path(&self, stage: &str) -> PathBuf {
        self.shader_dir
            .join(format!("simple_material.{}.spv", stage))
    }
}

impl SetupBinder for SimpleMaterial {
    fn create_setup(
        &self,
        view: &RendererView<'_>,
        global_layout: vk::DescriptorSetLayout,
        frames_in_flight: usize,
    ) -> Result<PipelineSetup> {
        let device = view.device;

        let render_pass = view.render_pass()?;
        let render_pass_handle = render_pass.handle();

        let bindings = Self::object_bindings();
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

        let vertex_shader = load_shader(view, &self.shader_path("vert"), ShaderStage::Vertex)?;
        let fragment_shader =
            load_shader(view, &self.shader_path("frag"), ShaderStage::Fragment)?;

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .vertex_input::<VertexPtn>()
            .cull_mode(CullMode::Back)
            .front_face(FrontFace::CounterClockwise)
            .depth_test_enable(true)
            .depth_write_enable(true)
            .render_pass(render_pass_handle)
            .build(device.clone(), &pipeline_layout)?;

        info!("Simple material pipeline created");

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

    fn set_setup_id(&self, id: SetupId) {
        self.id.set(Some(id));
    }

    fn setup_id(&self) -> Option<SetupId> {
        self.id.get()
    }
}

fn load_shader(view: &RendererView<'_>, path: &Path, stage: ShaderStage) -> Result<Shader> {
    Ok(Shader::from_spirv_file(view.device.clone(), path, stage, "main")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_set_layout() {
        let bindings = SimpleMaterial::object_bindings();
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_shader_paths() {
        let material = SimpleMaterial::new("shaders/spirv");
        assert_eq!(
            material.shader_path("vert"),
            Path::new("shaders/spirv/simple_material.vert.spv")
        );
    }

    #[test]
    fn test_setup_id_is_unset_until_registered() {
        let material = SimpleMaterial::new("shaders/spirv");
        assert_eq!(material.setup_id(), None);
        material.set_setup_id(SetupId::new(0));
        assert_eq!(material.setup_id(), Some(SetupId::new(0)));
    }
}
