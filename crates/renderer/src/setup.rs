//! Pipeline setups and the binders that build them.
//!
//! A [`PipelineSetup`] bundles everything one "material family" renders
//! through: render pass, descriptor set layout, pipeline layout, pipeline,
//! one framebuffer per swapchain image and a descriptor pool. Only the
//! framebuffers depend on the swapchain, so resizing runs the setup's
//! recreation closure and leaves the rest untouched.
//!
//! Setups are built by a [`SetupBinder`] when it is registered with the
//! [`Renderer`](crate::Renderer), which stores them in an arena indexed by
//! [`SetupId`].

use std::fmt;

use ash::vk;
use tracing::debug;

use vkframe_rhi::command::{CommandBuffer, TransferContext};
use vkframe_rhi::depth::DepthImage;
use vkframe_rhi::descriptor::{DescriptorPool, DescriptorSetLayout};
use vkframe_rhi::pipeline::{Pipeline, PipelineLayout};
use vkframe_rhi::render_pass::{AttachmentLoad, Framebuffer, RenderPass};
use vkframe_rhi::swapchain::Swapchain;
use vkframe_rhi::{DeviceRef, RhiResult};

use crate::error::Result;

/// Descriptor set index of the renderer-global (per-frame) set.
pub const GLOBAL_SET_INDEX: u32 = 0;

/// Descriptor set index of per-object sets bound by drawables.
pub const OBJECT_SET_INDEX: u32 = 1;

/// Identifies a registered [`PipelineSetup`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SetupId(usize);

impl SetupId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position in the renderer's setup arena.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SetupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Borrowed view of the renderer state a setup is built against.
pub struct RendererView<'a> {
    pub device: &'a DeviceRef,
    pub swapchain: &'a Swapchain,
    pub depth_image: &'a DepthImage,
    pub transfer: &'a TransferContext,
    /// True while no setup is registered: the next setup renders first
    /// each frame and must clear.
    pub clears_frame: bool,
}

impl RendererView<'_> {
    /// Color + depth pass for a new setup. It clears when the setup is the
    /// first one and loads the earlier passes' output otherwise.
    pub fn render_pass(&self) -> RhiResult<RenderPass> {
        let load = if self.clears_frame {
            AttachmentLoad::Clear
        } else {
            AttachmentLoad::Load
        };
        RenderPass::with_load(
            self.device.clone(),
            self.swapchain.format(),
            self.depth_image.format(),
            load,
        )
    }

    /// Framebuffers for `render_pass`, one per swapchain image, sharing the depth image.
    pub fn swapchain_framebuffers(&self, render_pass: vk::RenderPass) -> RhiResult<Vec<Framebuffer>> {
        Framebuffer::for_swapchain(
            self.device,
            render_pass,
            self.swapchain,
            self.depth_image.view(),
        )
    }
}

/// Rebuilds a setup's framebuffers against a freshly created swapchain.
pub type RecreateFn = Box<dyn FnMut(&RendererView<'_>) -> RhiResult<Vec<Framebuffer>>>;

/// Recreation closure for setups whose framebuffers are exactly
/// [`RendererView::swapchain_framebuffers`] of `render_pass`.
pub fn framebuffer_recreator(render_pass: vk::RenderPass) -> RecreateFn {
    Box::new(move |view: &RendererView<'_>| view.swapchain_framebuffers(render_pass))
}

/// One render pass + pipeline configuration and its swapchain-sized framebuffers.
///
/// Fields are dropped in declaration order, framebuffers first and the
/// render pass last.
pub struct PipelineSetup {
    /// Indexed by swapchain image.
    pub framebuffers: Vec<Framebuffer>,
    /// Setup-wide sets, one per frame in flight. May be empty.
    pub descriptor_sets: Vec<vk::DescriptorSet>,
    /// Pool for `descriptor_sets` and for the per-object sets of this family.
    pub descriptor_pool: DescriptorPool,
    pub pipeline: Pipeline,
    /// Set 0 is the renderer-global layout, set 1 is `descriptor_set_layout`.
    pub pipeline_layout: PipelineLayout,
    pub descriptor_set_layout: DescriptorSetLayout,
    pub render_pass: RenderPass,
    pub recreate: RecreateFn,
}

impl PipelineSetup {
    /// Framebuffer targeting swapchain image `image_index`.
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
    }

    /// Destroys the framebuffers ahead of a swapchain teardown.
    pub fn release_framebuffers(&mut self) {
        self.framebuffers.clear();
    }

    /// Drops the current framebuffers and runs the recreation closure.
    pub fn recreate_framebuffers(&mut self, view: &RendererView<'_>) -> RhiResult<()> {
        self.framebuffers.clear();
        self.framebuffers = (self.recreate)(view)?;
        debug!(
            "Recreated {} framebuffers ({}x{})",
            self.framebuffers.len(),
            view.swapchain.extent().width,
            view.swapchain.extent().height
        );
        Ok(())
    }

    /// Allocates `count` sets of this setup's layout, typically one per
    /// frame in flight for a new drawable.
    pub fn allocate_object_sets(&self, count: usize) -> RhiResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![self.descriptor_set_layout.handle(); count];
        self.descriptor_pool.allocate(&layouts)
    }
}

/// A material family that knows how to build its [`PipelineSetup`].
pub trait SetupBinder {
    /// Builds the setup. The pipeline layout must put `global_layout` at
    /// [`GLOBAL_SET_INDEX`] and produce one framebuffer per swapchain image.
    fn create_setup(
        &self,
        view: &RendererView<'_>,
        global_layout: vk::DescriptorSetLayout,
        frames_in_flight: usize,
    ) -> Result<PipelineSetup>;

    /// Called once per render pass after the global set is bound, for
    /// setup-wide bindings shared by every object of the family.
    fn bind_setup_resources(
        &self,
        _cmd: &CommandBuffer,
        _setup: &PipelineSetup,
        _frame_index: usize,
    ) -> RhiResult<()> {
        Ok(())
    }

    /// Receives the id assigned at registration.
    fn set_setup_id(&self, id: SetupId);

    /// The id assigned at registration, if any.
    fn setup_id(&self) -> Option<SetupId>;
}
