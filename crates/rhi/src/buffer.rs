//! GPU buffer management.
//!
//! - [`BufferUsage`] presets pick usage flags and memory location for the
//!   common buffer roles.
//! - [`Buffer`] owns a `VkBuffer` and its memory block.
//!
//! Vertex and index data normally goes through
//! [`upload_buffer`](crate::upload::upload_buffer) into device-local memory;
//! uniform buffers stay host visible and are written every frame.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::buffer::{Buffer, BufferUsage};
//! use vkframe_rhi::device::DeviceRef;
//!
//! # fn example(device: DeviceRef) -> vkframe_rhi::RhiResult<()> {
//! let mut uniforms = Buffer::with_usage(device, BufferUsage::Uniform, 128)?;
//! uniforms.write_data(0, &[0u8; 128])?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::device::{BufferDesc, DeviceRef};
use crate::error::{RhiError, RhiResult};
use crate::memory::MemoryBlock;

/// Buffer role presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Device-local vertex data, filled by a staging copy
    Vertex,
    /// Device-local index data, filled by a staging copy
    Index,
    /// Host-visible uniform data, rewritten by the CPU
    Uniform,
    /// Host-visible transfer source
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// GPU buffer with its memory.
///
/// A zero-sized buffer is representable ([`Buffer::empty`]): it has a null
/// handle, owns no memory and reads back as no bytes.
pub struct Buffer {
    device: DeviceRef,
    buffer: vk::Buffer,
    memory: Option<MemoryBlock>,
    size: vk::DeviceSize,
    name: String,
}

impl Buffer {
    /// Creates a buffer of `size` bytes and binds fresh memory to it.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceResourceExhausted`] if memory cannot be
    /// allocated, [`RhiError::UnsupportedCapability`] if no memory type fits,
    /// and [`RhiError::InvalidHandle`] for a zero size.
    pub fn new(
        device: DeviceRef,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "buffer '{name}' must be larger than 0 bytes"
            )));
        }

        let (buffer, memory) = device.create_buffer(&BufferDesc {
            name,
            size,
            usage,
            location,
        })?;

        debug!("Created {} buffer: {} bytes ({:?})", name, size, location);

        Ok(Self {
            device,
            buffer,
            memory: Some(memory),
            size,
            name: name.to_string(),
        })
    }

    /// Creates a buffer from a [`BufferUsage`] preset.
    pub fn with_usage(device: DeviceRef, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        Self::new(
            device,
            size,
            usage.to_vk_usage(),
            usage.memory_location(),
            usage.name(),
        )
    }

    /// A buffer with no handle and no memory.
    pub fn empty(device: DeviceRef) -> Self {
        Self {
            device,
            buffer: vk::Buffer::null(),
            memory: None,
            size: 0,
            name: "empty".to_string(),
        }
    }

    /// Copies `data` into the buffer at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] if the memory is not host visible
    /// or the write runs past the end of the buffer.
    pub fn write_data(&mut self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let offset = to_usize(offset)?;
        match &mut self.memory {
            Some(memory) => memory.write(offset, data),
            None => Err(RhiError::InvalidHandle(
                "cannot write into an empty buffer".to_string(),
            )),
        }
    }

    /// Writes a plain-old-data value at `offset`.
    pub fn write_pod<T: bytemuck::Pod>(&mut self, offset: vk::DeviceSize, value: &T) -> RhiResult<()> {
        self.write_data(offset, bytemuck::bytes_of(value))
    }

    /// Reads `len` bytes starting at `offset`. Host-visible memory only.
    pub fn read_data(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let offset = to_usize(offset)?;
        match &self.memory {
            Some(memory) => memory.read(offset, len),
            None => Err(RhiError::InvalidHandle(
                "cannot read from an empty buffer".to_string(),
            )),
        }
    }

    /// Whether the CPU can read and write the buffer directly.
    pub fn is_host_visible(&self) -> bool {
        self.memory
            .as_ref()
            .is_some_and(MemoryBlock::is_host_visible)
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Descriptor info covering the whole buffer.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(memory) = self.memory.take() {
            self.device.destroy_buffer(self.buffer, memory);
            debug!("Destroyed {} buffer", self.name);
        }
    }
}

fn to_usize(offset: vk::DeviceSize) -> RhiResult<usize> {
    usize::try_from(offset)
        .map_err(|_| RhiError::InvalidHandle(format!("offset {offset} exceeds address space")))
}
