//! Render passes and swapchain framebuffers.
//!
//! Every pipeline setup renders through a single-subpass color + depth pass
//! ending in `PRESENT_SRC_KHR`. The first pass of a frame clears both
//! attachments ([`RenderPass::color_depth`]); passes recorded after it keep
//! the earlier results ([`RenderPass::color_depth_load`]). Framebuffers
//! depend on the swapchain extent and image views, so they are the only
//! part of a setup that is rebuilt on resize.

use ash::vk;
use tracing::debug;

use crate::device::DeviceRef;
use crate::error::RhiResult;
use crate::swapchain::Swapchain;

/// What a pass does with the attachments' previous contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentLoad {
    /// Clear color and depth. The image may be in any layout.
    Clear,
    /// Keep color and depth written by an earlier pass of the same frame.
    Load,
}

impl AttachmentLoad {
    fn load_op(self) -> vk::AttachmentLoadOp {
        match self {
            Self::Clear => vk::AttachmentLoadOp::CLEAR,
            Self::Load => vk::AttachmentLoadOp::LOAD,
        }
    }

    fn initial_color_layout(self) -> vk::ImageLayout {
        match self {
            Self::Clear => vk::ImageLayout::UNDEFINED,
            Self::Load => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    fn initial_depth_layout(self) -> vk::ImageLayout {
        match self {
            Self::Clear => vk::ImageLayout::UNDEFINED,
            Self::Load => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }
}

/// Vulkan render pass wrapper.
pub struct RenderPass {
    device: DeviceRef,
    render_pass: vk::RenderPass,
    color_format: vk::Format,
    depth_format: vk::Format,
    load: AttachmentLoad,
}

impl RenderPass {
    /// One subpass writing a color attachment (0) and a depth attachment
    /// (1), both cleared.
    pub fn color_depth(
        device: DeviceRef,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RhiResult<Self> {
        Self::with_load(device, color_format, depth_format, AttachmentLoad::Clear)
    }

    /// Like [`color_depth`](Self::color_depth) but loads both attachments,
    /// for setups drawing on top of an earlier pass in the same frame.
    pub fn color_depth_load(
        device: DeviceRef,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RhiResult<Self> {
        Self::with_load(device, color_format, depth_format, AttachmentLoad::Load)
    }

    pub fn with_load(
        device: DeviceRef,
        color_format: vk::Format,
        depth_format: vk::Format,
        load: AttachmentLoad,
    ) -> RhiResult<Self> {
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load.load_op())
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(load.initial_color_layout())
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load.load_op())
                // Later passes of the frame depth-test against it.
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(load.initial_depth_layout())
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let writes = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        let (src_access, dst_access) = match load {
            AttachmentLoad::Clear => (vk::AccessFlags::empty(), writes),
            AttachmentLoad::Load => (
                writes,
                writes
                    | vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            ),
        };
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .dst_stage_mask(stages)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = device.create_render_pass(&create_info)?;
        debug!(
            "Created render pass (color {:?}, depth {:?}, {:?})",
            color_format, depth_format, load
        );

        Ok(Self {
            device,
            render_pass,
            color_format,
            depth_format,
            load,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    #[inline]
    pub fn load(&self) -> AttachmentLoad {
        self.load
    }

    /// Whether the pass starts from cleared attachments.
    #[inline]
    pub fn clears(&self) -> bool {
        self.load == AttachmentLoad::Clear
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.device.destroy_render_pass(self.render_pass);
        debug!("Destroyed render pass");
    }
}

/// Vulkan framebuffer wrapper.
pub struct Framebuffer {
    device: DeviceRef,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    pub fn new(
        device: DeviceRef,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = device.create_framebuffer(&create_info)?;
        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    /// One framebuffer per swapchain image, each pairing that image's view
    /// with the shared depth view.
    pub fn for_swapchain(
        device: &DeviceRef,
        render_pass: vk::RenderPass,
        swapchain: &Swapchain,
        depth_view: vk::ImageView,
    ) -> RhiResult<Vec<Self>> {
        let extent = swapchain.extent();
        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| Self::new(device.clone(), render_pass, &[view, depth_view], extent))
            .collect::<RhiResult<Vec<_>>>()?;

        debug!(
            "Created {} framebuffers ({}x{})",
            framebuffers.len(),
            extent.width,
            extent.height
        );
        Ok(framebuffers)
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.device.destroy_framebuffer(self.framebuffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, ObjectKind};
    use crate::swapchain::SwapchainPreferences;
    use ash::vk::Handle;

    #[test]
    fn test_color_depth_pass_lifecycle() {
        let headless = HeadlessDevice::builder().build();
        let pass = RenderPass::color_depth(
            headless.clone(),
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT,
        )
        .unwrap();
        assert_eq!(pass.color_format(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(pass.depth_format(), vk::Format::D32_SFLOAT);
        assert!(pass.clears());
        assert_eq!(headless.live_count(ObjectKind::RenderPass), 1);
        drop(pass);
        assert_eq!(headless.live_count(ObjectKind::RenderPass), 0);
    }

    #[test]
    fn test_load_pass_keeps_earlier_contents() {
        let headless = HeadlessDevice::builder().build();
        let pass = RenderPass::color_depth_load(
            headless.clone(),
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT,
        )
        .unwrap();
        assert_eq!(pass.load(), AttachmentLoad::Load);
        assert!(!pass.clears());
    }

    #[test]
    fn test_load_ops_and_initial_layouts() {
        assert_eq!(AttachmentLoad::Clear.load_op(), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(AttachmentLoad::Load.load_op(), vk::AttachmentLoadOp::LOAD);
        assert_eq!(
            AttachmentLoad::Clear.initial_color_layout(),
            vk::ImageLayout::UNDEFINED
        );
        // The previous pass of the frame leaves color ready to present.
        assert_eq!(
            AttachmentLoad::Load.initial_color_layout(),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            AttachmentLoad::Load.initial_depth_layout(),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_one_framebuffer_per_swapchain_image() {
        let headless = HeadlessDevice::builder().image_counts(2, 3).build();
        let device: DeviceRef = headless.clone();
        let swapchain =
            Swapchain::new(device.clone(), &SwapchainPreferences::default(), (640, 480)).unwrap();

        let framebuffers = Framebuffer::for_swapchain(
            &device,
            vk::RenderPass::from_raw(7),
            &swapchain,
            vk::ImageView::from_raw(9),
        )
        .unwrap();

        assert_eq!(framebuffers.len(), swapchain.image_count());
        assert!(framebuffers.iter().all(|fb| fb.extent() == swapchain.extent()));
        assert_eq!(
            headless.live_count(ObjectKind::Framebuffer),
            swapchain.image_count()
        );
        drop(framebuffers);
        assert_eq!(headless.live_count(ObjectKind::Framebuffer), 0);
    }
}
