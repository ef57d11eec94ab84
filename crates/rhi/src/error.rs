//! RHI-specific error types.
//!
//! Raw `vk::Result` codes are classified on conversion so callers can tell
//! recoverable surface staleness apart from fatal conditions without
//! matching on Vulkan codes themselves.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Memory or handle allocation failed (out of host/device memory, pool exhausted).
    #[error("Device resources exhausted: {0}")]
    DeviceResourceExhausted(String),

    /// No candidate format, present mode, memory type or device satisfies the requirements.
    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// The presentation surface is out of date or suboptimal.
    #[error("Surface is stale ({0:?})")]
    SurfaceStale(vk::Result),

    /// A bounded fence or acquire wait expired.
    #[error("Synchronization timeout: {0}")]
    SynchronizationTimeout(String),

    /// Any other Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error that is not an out-of-memory condition
    #[error("Allocator error: {0}")]
    AllocatorError(gpu_allocator::AllocationError),

    /// Shader module error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Invalid handle or argument
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RhiError {
    /// Returns `false` only for conditions that are recovered locally by
    /// recreating the swapchain.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RhiError::SurfaceStale(_))
    }

    /// Returns `true` if this error reports an out-of-date or suboptimal surface.
    pub fn is_surface_stale(&self) -> bool {
        matches!(self, RhiError::SurfaceStale(_))
    }
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_TOO_MANY_OBJECTS
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL => {
                RhiError::DeviceResourceExhausted(format!("{result:?}"))
            }
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED
            | vk::Result::ERROR_FEATURE_NOT_PRESENT
            | vk::Result::ERROR_EXTENSION_NOT_PRESENT
            | vk::Result::ERROR_LAYER_NOT_PRESENT
            | vk::Result::ERROR_INCOMPATIBLE_DRIVER => {
                RhiError::UnsupportedCapability(format!("{result:?}"))
            }
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
                RhiError::SurfaceStale(result)
            }
            vk::Result::TIMEOUT | vk::Result::NOT_READY => {
                RhiError::SynchronizationTimeout(format!("{result:?}"))
            }
            other => RhiError::Vulkan(other),
        }
    }
}

impl From<gpu_allocator::AllocationError> for RhiError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        match err {
            gpu_allocator::AllocationError::OutOfMemory => {
                RhiError::DeviceResourceExhausted("allocator out of memory".to_string())
            }
            gpu_allocator::AllocationError::NoCompatibleMemoryTypeFound => {
                RhiError::UnsupportedCapability("no compatible memory type".to_string())
            }
            other => RhiError::AllocatorError(other),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_is_resource_exhaustion() {
        let err = RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(matches!(err, RhiError::DeviceResourceExhausted(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_out_of_date_is_recoverable() {
        let err = RhiError::from(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(err.is_surface_stale());
        assert!(!err.is_fatal());

        let err = RhiError::from(vk::Result::SUBOPTIMAL_KHR);
        assert!(err.is_surface_stale());
    }

    #[test]
    fn test_timeout_classification() {
        let err = RhiError::from(vk::Result::TIMEOUT);
        assert!(matches!(err, RhiError::SynchronizationTimeout(_)));
    }

    #[test]
    fn test_unclassified_result_is_kept() {
        let err = RhiError::from(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, RhiError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
    }

    #[test]
    fn test_allocator_out_of_memory() {
        let err = RhiError::from(gpu_allocator::AllocationError::OutOfMemory);
        assert!(matches!(err, RhiError::DeviceResourceExhausted(_)));
    }
}
