//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Everything GPU-facing goes through the [`device::GpuDevice`] trait. The
//! crate provides:
//! - the `ash` implementation of that trait with instance, surface and
//!   device creation ([`vulkan::VulkanDevice`])
//! - RAII wrappers for buffers, images, samplers, render passes,
//!   framebuffers, descriptors, pipelines, shaders and sync objects
//! - swapchain creation with predicate-based format and present mode choice
//! - staging uploads for buffers and textures
//! - an in-process device for tests (`headless` feature)

mod error;

pub mod buffer;
pub mod command;
pub mod depth;
pub mod descriptor;
pub mod device;
#[cfg(any(test, feature = "headless"))]
pub mod headless;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod upload;
pub mod vertex;
pub mod vulkan;

pub use device::{DeviceRef, GpuDevice};
pub use error::{RhiError, RhiResult};
pub use surface::{ResizeFlag, SurfaceProvider};

// Re-export ash types that users might need
pub use ash::vk;
pub use gpu_allocator::MemoryLocation;
