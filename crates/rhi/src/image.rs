//! Images, textures and samplers.
//!
//! - [`Image`] owns a 2D image, its memory and one view.
//! - [`Sampler`] is a linear/repeat sampler with anisotropy when the device
//!   supports it.
//! - [`Texture`] pairs a sampled image with its sampler. Textures are
//!   created by [`upload_texture`](crate::upload::upload_texture).

use ash::vk;
use tracing::{debug, info};

use crate::device::{DeviceRef, ImageDesc};
use crate::error::RhiResult;
use crate::memory::MemoryBlock;

/// A 2D image with its memory and view.
pub struct Image {
    device: DeviceRef,
    image: vk::Image,
    view: vk::ImageView,
    memory: Option<MemoryBlock>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Image {
    /// Creates the image, binds device-local memory and creates a view with
    /// the given aspect.
    pub fn new(device: DeviceRef, desc: &ImageDesc<'_>, aspect: vk::ImageAspectFlags) -> RhiResult<Self> {
        let (image, memory) = device.create_image(desc)?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .level_count(1)
                    .layer_count(1),
            );

        let view = match device.create_image_view(&view_info) {
            Ok(view) => view,
            Err(e) => {
                device.destroy_image(image, memory);
                return Err(e);
            }
        };

        debug!(
            "Created image '{}': {}x{} ({:?})",
            desc.name, desc.extent.width, desc.extent.height, desc.format
        );

        Ok(Self {
            device,
            image,
            view,
            memory: Some(memory),
            format: desc.format,
            extent: desc.extent,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.device.destroy_image_view(self.view);
        if let Some(memory) = self.memory.take() {
            self.device.destroy_image(self.image, memory);
        }
        debug!(
            "Destroyed image {}x{} ({:?})",
            self.extent.width, self.extent.height, self.format
        );
    }
}

/// Texture sampler.
pub struct Sampler {
    device: DeviceRef,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear filtering, repeat addressing, anisotropy at the device maximum
    /// when available.
    pub fn linear_repeat(device: DeviceRef) -> RhiResult<Self> {
        let anisotropy = device.max_sampler_anisotropy();

        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

        let sampler = device.create_sampler(&info)?;
        match anisotropy {
            Some(max) => info!("Sampler created (anisotropy {}x)", max),
            None => info!("Sampler created (anisotropy unavailable)"),
        }
        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.destroy_sampler(self.sampler);
        debug!("Destroyed sampler");
    }
}

/// A shader-readable image with its sampler.
pub struct Texture {
    image: Image,
    sampler: Sampler,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture").finish_non_exhaustive()
    }
}

impl Texture {
    /// Wraps an image already in `SHADER_READ_ONLY_OPTIMAL` layout.
    pub fn from_parts(image: Image, sampler: Sampler) -> Self {
        Self { image, sampler }
    }

    #[inline]
    pub fn image(&self) -> &Image {
        &self.image
    }

    #[inline]
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Combined image/sampler descriptor info.
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler.handle(),
            image_view: self.image.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, ObjectKind};

    fn desc(name: &str) -> ImageDesc<'_> {
        ImageDesc {
            name,
            extent: vk::Extent2D {
                width: 4,
                height: 4,
            },
            format: vk::Format::R8G8B8A8_SRGB,
            usage: vk::ImageUsageFlags::SAMPLED,
            tiling: vk::ImageTiling::OPTIMAL,
        }
    }

    #[test]
    fn test_image_owns_view_and_memory() {
        let headless = HeadlessDevice::builder().build();
        let image = Image::new(headless.clone(), &desc("color"), vk::ImageAspectFlags::COLOR).unwrap();
        assert_eq!(image.format(), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(headless.live_count(ObjectKind::Image), 1);
        assert_eq!(headless.live_count(ObjectKind::ImageView), 1);

        drop(image);
        assert_eq!(headless.live_count(ObjectKind::Image), 0);
        assert_eq!(headless.live_count(ObjectKind::ImageView), 0);
    }

    #[test]
    fn test_sampler_created_with_and_without_anisotropy() {
        let with = HeadlessDevice::builder().max_anisotropy(Some(16.0)).build();
        let without = HeadlessDevice::builder().max_anisotropy(None).build();

        let a = Sampler::linear_repeat(with.clone()).unwrap();
        let b = Sampler::linear_repeat(without.clone()).unwrap();
        assert_ne!(a.handle(), vk::Sampler::null());
        assert_ne!(b.handle(), vk::Sampler::null());
        drop((a, b));
        assert_eq!(with.live_count(ObjectKind::Sampler), 0);
        assert_eq!(without.live_count(ObjectKind::Sampler), 0);
    }
}
