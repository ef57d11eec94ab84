//! Depth attachment management.
//!
//! The depth format is not fixed: the first entry of a candidate list whose
//! optimal tiling supports depth-stencil attachment wins. [`DepthImage`] is
//! rebuilt with the swapchain, so it is sized to the swapchain extent.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::depth::DepthImage;
//! use vkframe_rhi::device::DeviceRef;
//! use vkframe_rhi::vk;
//!
//! # fn example(device: DeviceRef) -> vkframe_rhi::RhiResult<()> {
//! let depth = DepthImage::new(
//!     device,
//!     vk::Extent2D { width: 1920, height: 1080 },
//!     &[vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT],
//! )?;
//! let view = depth.view();
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::info;

use crate::device::{DeviceRef, GpuDevice, ImageDesc, supports_depth_attachment};
use crate::error::{RhiError, RhiResult};
use crate::image::Image;

/// Returns the first candidate usable as an optimally tiled depth attachment.
///
/// # Errors
///
/// Returns [`RhiError::UnsupportedCapability`] if no candidate qualifies,
/// including when `candidates` is empty.
pub fn find_depth_format(device: &dyn GpuDevice, candidates: &[vk::Format]) -> RhiResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| supports_depth_attachment(device, format, vk::ImageTiling::OPTIMAL))
        .ok_or_else(|| {
            RhiError::UnsupportedCapability(format!(
                "no supported depth format among {candidates:?}"
            ))
        })
}

/// Whether `format` carries a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Device-local depth image with a depth-aspect view.
pub struct DepthImage {
    image: Image,
}

impl DepthImage {
    /// Creates a depth image of `extent` in the first supported candidate format.
    pub fn new(device: DeviceRef, extent: vk::Extent2D, candidates: &[vk::Format]) -> RhiResult<Self> {
        let format = find_depth_format(&*device, candidates)?;

        let image = Image::new(
            device,
            &ImageDesc {
                name: "depth",
                extent,
                format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                tiling: vk::ImageTiling::OPTIMAL,
            },
            vk::ImageAspectFlags::DEPTH,
        )?;

        info!(
            "Created depth buffer: {}x{} ({:?})",
            extent.width, extent.height, format
        );

        Ok(Self { image })
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image.handle()
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, ObjectKind};

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 640,
        height: 480,
    };

    #[test]
    fn test_first_supported_candidate_wins() {
        let device = HeadlessDevice::builder()
            .depth_formats(&[vk::Format::D24_UNORM_S8_UINT])
            .build();
        let format = find_depth_format(
            &*device,
            &[vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT],
        )
        .unwrap();
        assert_eq!(format, vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn test_candidate_order_is_respected() {
        let device = HeadlessDevice::builder()
            .depth_formats(&[vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT])
            .build();
        let format = find_depth_format(
            &*device,
            &[vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT],
        )
        .unwrap();
        assert_eq!(format, vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn test_no_supported_candidate() {
        let device = HeadlessDevice::builder().depth_formats(&[]).build();
        let err = find_depth_format(&*device, &[vk::Format::D32_SFLOAT]).unwrap_err();
        assert!(matches!(err, RhiError::UnsupportedCapability(_)));

        let err = find_depth_format(&*device, &[]).unwrap_err();
        assert!(matches!(err, RhiError::UnsupportedCapability(_)));
    }

    #[test]
    fn test_depth_image_uses_selected_format() {
        let headless = HeadlessDevice::builder()
            .depth_formats(&[vk::Format::D24_UNORM_S8_UINT])
            .build();
        let depth = DepthImage::new(
            headless.clone(),
            EXTENT,
            &[vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT],
        )
        .unwrap();

        assert_eq!(depth.format(), vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(depth.extent(), EXTENT);
        assert!(has_stencil_component(depth.format()));
        assert_eq!(headless.live_count(ObjectKind::Image), 1);

        drop(depth);
        assert_eq!(headless.live_count(ObjectKind::Image), 0);
        assert_eq!(headless.live_count(ObjectKind::ImageView), 0);
    }
}
