//! Device memory owned by buffers and images.

use gpu_allocator::vulkan::Allocation;

use crate::error::{RhiError, RhiResult};

/// Memory bound to a buffer or image.
///
/// Real devices hand out `gpu-allocator` allocations. The headless device
/// backs every block with a shared host vector so copies executed "on the
/// GPU" are observable from tests.
#[derive(Debug)]
pub enum MemoryBlock {
    /// Sub-allocation from `gpu-allocator`.
    Allocated(Allocation),
    /// Host memory owned by the headless device.
    #[cfg(any(test, feature = "headless"))]
    Host(crate::headless::HostMemory),
}

impl MemoryBlock {
    /// Returns `true` if the CPU can write and read this block directly.
    pub fn is_host_visible(&self) -> bool {
        match self {
            MemoryBlock::Allocated(allocation) => allocation.mapped_ptr().is_some(),
            #[cfg(any(test, feature = "headless"))]
            MemoryBlock::Host(_) => true,
        }
    }

    /// Copies `data` into the mapped block at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] if the block is not host visible
    /// or the write would run past its end.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> RhiResult<()> {
        match self {
            MemoryBlock::Allocated(allocation) => {
                let slice = allocation.mapped_slice_mut().ok_or_else(|| {
                    RhiError::InvalidHandle("memory block is not host visible".to_string())
                })?;
                let end = checked_end(offset, data.len(), slice.len())?;
                slice[offset..end].copy_from_slice(data);
                Ok(())
            }
            #[cfg(any(test, feature = "headless"))]
            MemoryBlock::Host(host) => host.write(offset, data),
        }
    }

    /// Reads `len` bytes starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> RhiResult<Vec<u8>> {
        match self {
            MemoryBlock::Allocated(allocation) => {
                let slice = allocation.mapped_slice().ok_or_else(|| {
                    RhiError::InvalidHandle("memory block is not host visible".to_string())
                })?;
                let end = checked_end(offset, len, slice.len())?;
                Ok(slice[offset..end].to_vec())
            }
            #[cfg(any(test, feature = "headless"))]
            MemoryBlock::Host(host) => host.read(offset, len),
        }
    }
}

pub(crate) fn checked_end(offset: usize, len: usize, capacity: usize) -> RhiResult<usize> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(end),
        _ => Err(RhiError::InvalidHandle(format!(
            "memory access out of bounds: offset {offset} + {len} bytes > {capacity}"
        ))),
    }
}
