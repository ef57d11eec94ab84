//! Staging uploads into device-local memory.
//!
//! Both entry points copy the payload into a host-visible staging buffer,
//! record the transfer with [`TransferContext::one_shot`] and wait for it to
//! finish, so the staging buffer is dropped as soon as the call returns.
//!
//! Texture uploads record exactly two layout barriers around the copy:
//! `UNDEFINED -> TRANSFER_DST_OPTIMAL` and
//! `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL`.

use ash::vk;
use tracing::debug;

use crate::buffer::{Buffer, BufferUsage};
use crate::command::TransferContext;
use crate::device::{DeviceRef, ImageDesc};
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, Sampler, Texture};

/// Uploads `bytes` into a new device-local buffer with the usage of `usage`.
///
/// An empty payload yields [`Buffer::empty`] without touching the GPU.
pub fn upload_buffer(
    device: &DeviceRef,
    transfer: &TransferContext,
    usage: BufferUsage,
    bytes: &[u8],
) -> RhiResult<Buffer> {
    if bytes.is_empty() {
        return Ok(Buffer::empty(device.clone()));
    }
    let size = bytes.len() as vk::DeviceSize;

    let mut staging = Buffer::with_usage(device.clone(), BufferUsage::Staging, size)?;
    staging.write_data(0, bytes)?;

    let destination = Buffer::new(
        device.clone(),
        size,
        usage.to_vk_usage() | vk::BufferUsageFlags::TRANSFER_DST,
        usage.memory_location(),
        usage.name(),
    )?;

    transfer.one_shot(|cmd| {
        let region = vk::BufferCopy::default().size(size);
        cmd.copy_buffer(staging.handle(), destination.handle(), &[region]);
        Ok(())
    })?;

    debug!("Uploaded {} bytes into {} buffer", size, usage.name());
    Ok(destination)
}

/// Uploads a slice of plain-old-data values.
pub fn upload_slice<T: bytemuck::Pod>(
    device: &DeviceRef,
    transfer: &TransferContext,
    usage: BufferUsage,
    data: &[T],
) -> RhiResult<Buffer> {
    upload_buffer(device, transfer, usage, bytemuck::cast_slice(data))
}

/// Bytes per texel of the uncompressed color formats textures may use.
pub fn texel_size(format: vk::Format) -> Option<usize> {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => Some(1),
        vk::Format::R8G8_UNORM => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Uploads tightly packed `pixels` into a sampled texture.
///
/// # Errors
///
/// - [`RhiError::UnsupportedCapability`] for a format without a known texel size.
/// - [`RhiError::InvalidHandle`] if `pixels` does not hold exactly
///   `width * height` texels or either dimension is zero.
pub fn upload_texture(
    device: &DeviceRef,
    transfer: &TransferContext,
    pixels: &[u8],
    width: u32,
    height: u32,
    format: vk::Format,
) -> RhiResult<Texture> {
    let texel = texel_size(format).ok_or_else(|| {
        RhiError::UnsupportedCapability(format!("no texel size known for {format:?}"))
    })?;
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|texels| texels.checked_mul(texel));
    if width == 0 || height == 0 || expected != Some(pixels.len()) {
        return Err(RhiError::InvalidHandle(format!(
            "texture {}x{} {:?} needs {:?} bytes, got {}",
            width,
            height,
            format,
            expected,
            pixels.len()
        )));
    }

    let mut staging =
        Buffer::with_usage(device.clone(), BufferUsage::Staging, pixels.len() as vk::DeviceSize)?;
    staging.write_data(0, pixels)?;

    let extent = vk::Extent2D { width, height };
    let image = Image::new(
        device.clone(),
        &ImageDesc {
            name: "texture",
            extent,
            format,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            tiling: vk::ImageTiling::OPTIMAL,
        },
        vk::ImageAspectFlags::COLOR,
    )?;

    transfer.one_shot(|cmd| {
        cmd.transition_image_layout(
            image.handle(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;

        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });
        cmd.copy_buffer_to_image(
            staging.handle(),
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );

        cmd.transition_image_layout(
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
    })?;

    let sampler = Sampler::linear_repeat(device.clone())?;
    debug!("Uploaded texture {}x{} ({:?})", width, height, format);
    Ok(Texture::from_parts(image, sampler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, ObjectKind, RecordedCommand};
    use std::sync::Arc;

    fn setup() -> (Arc<HeadlessDevice>, DeviceRef, TransferContext) {
        let headless = HeadlessDevice::builder().build();
        let device: DeviceRef = headless.clone();
        let transfer = TransferContext::new(device.clone()).unwrap();
        (headless, device, transfer)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Copies a device-local buffer back through a fresh readback buffer.
    fn read_back(device: &DeviceRef, transfer: &TransferContext, buffer: &Buffer) -> Vec<u8> {
        if buffer.is_empty() {
            return Vec::new();
        }
        let readback = Buffer::new(
            device.clone(),
            buffer.size(),
            vk::BufferUsageFlags::TRANSFER_DST,
            gpu_allocator::MemoryLocation::GpuToCpu,
            "readback",
        )
        .unwrap();
        transfer
            .one_shot(|cmd| {
                cmd.copy_buffer(
                    buffer.handle(),
                    readback.handle(),
                    &[vk::BufferCopy::default().size(buffer.size())],
                );
                Ok(())
            })
            .unwrap();
        readback.read_data(0, buffer.size() as usize).unwrap()
    }

    #[test]
    fn test_staging_round_trip_sizes() {
        let (_headless, device, transfer) = setup();
        for len in [0usize, 1, 4096, 4097] {
            let bytes = pattern(len);
            let buffer = upload_buffer(&device, &transfer, BufferUsage::Vertex, &bytes).unwrap();
            assert_eq!(buffer.size(), len as vk::DeviceSize);
            assert_eq!(read_back(&device, &transfer, &buffer), bytes, "size {len}");
        }
    }

    #[test]
    fn test_staging_buffer_is_released() {
        let (headless, device, transfer) = setup();
        let buffer = upload_buffer(&device, &transfer, BufferUsage::Index, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.size(), 4);
        assert_eq!(headless.created_count(ObjectKind::Buffer), 2);
        assert_eq!(headless.live_count(ObjectKind::Buffer), 1);
        assert_eq!(headless.live_count(ObjectKind::CommandBuffer), 0);
    }

    #[test]
    fn test_empty_upload_skips_the_gpu() {
        let (headless, device, transfer) = setup();
        let buffer = upload_buffer(&device, &transfer, BufferUsage::Vertex, &[]).unwrap();
        assert!(buffer.is_empty());
        assert!(headless.submissions().is_empty());
    }

    #[test]
    fn test_upload_slice_casts_pod() {
        let (_headless, device, transfer) = setup();
        let indices: [u16; 3] = [0, 1, 2];
        let buffer = upload_slice(&device, &transfer, BufferUsage::Index, &indices).unwrap();
        assert_eq!(buffer.size(), 6);
        assert_eq!(
            read_back(&device, &transfer, &buffer),
            bytemuck::cast_slice::<u16, u8>(&indices).to_vec()
        );
    }

    #[test]
    fn test_texture_upload_records_two_barriers() {
        let (headless, device, transfer) = setup();
        let pixels = pattern(4 * 4 * 4);
        let texture =
            upload_texture(&device, &transfer, &pixels, 4, 4, vk::Format::R8G8B8A8_SRGB).unwrap();

        let submission = headless.last_submission().unwrap();
        let layouts: Vec<_> = submission
            .commands
            .iter()
            .filter_map(|cmd| match cmd {
                RecordedCommand::ImageBarrier {
                    old_layout,
                    new_layout,
                    ..
                } => Some((*old_layout, *new_layout)),
                _ => None,
            })
            .collect();
        assert_eq!(
            layouts,
            vec![
                (
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL
                ),
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                ),
            ]
        );
        assert!(matches!(
            submission.commands[1],
            RecordedCommand::CopyBufferToImage { dst, .. } if dst == texture.image().handle()
        ));
        assert_eq!(
            texture.descriptor_info().image_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_texture_size_mismatch_is_rejected() {
        let (headless, device, transfer) = setup();
        let err = upload_texture(&device, &transfer, &[0; 15], 2, 2, vk::Format::R8G8B8A8_UNORM)
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidHandle(_)));

        let err = upload_texture(&device, &transfer, &[], 0, 0, vk::Format::R8G8B8A8_UNORM)
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidHandle(_)));

        let err = upload_texture(&device, &transfer, &[0; 4], 1, 1, vk::Format::BC1_RGB_UNORM_BLOCK)
            .unwrap_err();
        assert!(matches!(err, RhiError::UnsupportedCapability(_)));
        assert!(headless.submissions().is_empty());
    }
}
