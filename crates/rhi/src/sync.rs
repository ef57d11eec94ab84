//! Synchronization primitives.
//!
//! - [`Semaphore`]: GPU-to-GPU ordering between queue operations. Never
//!   observed from the CPU.
//! - [`Fence`]: GPU-to-CPU signal the host can block on.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::device::DeviceRef;
//! use vkframe_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: DeviceRef) -> vkframe_rhi::RhiResult<()> {
//! let image_available = Semaphore::new(device.clone())?;
//! let in_flight = Fence::new(device, true)?;
//!
//! in_flight.wait(u64::MAX)?;
//! in_flight.reset()?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::device::DeviceRef;
use crate::error::RhiResult;

/// Vulkan semaphore wrapper.
pub struct Semaphore {
    device: DeviceRef,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: DeviceRef) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
        debug!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: DeviceRef,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled.
    ///
    /// Per-frame fences start signaled so the first wait on them returns
    /// immediately.
    pub fn new(device: DeviceRef, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    ///
    /// `timeout` is in nanoseconds; `u64::MAX` waits forever.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SynchronizationTimeout`](crate::RhiError::SynchronizationTimeout)
    /// if the timeout expires.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        self.device.wait_for_fence(self.fence, timeout)
    }

    /// Returns the fence to the unsignaled state. It must not be pending.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.fence)
    }

    /// Non-blocking status query. Errors read as "not signaled".
    pub fn is_signaled(&self) -> bool {
        matches!(self.device.fence_status(self.fence), Ok(true))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
        debug!("Destroyed fence");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RhiError;
    use crate::headless::{HeadlessDevice, ObjectKind};

    #[test]
    fn test_sync_objects_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
    }

    #[test]
    fn test_fence_signal_state() {
        let device = HeadlessDevice::new_ref();
        let fence = Fence::new(device.clone(), true).unwrap();
        assert!(fence.is_signaled());
        fence.wait(u64::MAX).unwrap();

        fence.reset().unwrap();
        assert!(!fence.is_signaled());
        assert!(matches!(
            fence.wait(1_000),
            Err(RhiError::SynchronizationTimeout(_))
        ));
    }

    #[test]
    fn test_drop_releases_handles() {
        let headless = HeadlessDevice::builder().build();
        let device: DeviceRef = headless.clone();
        {
            let _semaphore = Semaphore::new(device.clone()).unwrap();
            let _fence = Fence::new(device, false).unwrap();
            assert_eq!(headless.live_count(ObjectKind::Semaphore), 1);
            assert_eq!(headless.live_count(ObjectKind::Fence), 1);
        }
        assert_eq!(headless.live_count(ObjectKind::Semaphore), 0);
        assert_eq!(headless.live_count(ObjectKind::Fence), 0);
    }
}
