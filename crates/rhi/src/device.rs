//! The GPU device seam.
//!
//! Everything above this module talks to the GPU through [`GpuDevice`], an
//! object-safe trait whose vocabulary is plain `ash` handles and create-info
//! structs. Two implementations exist:
//!
//! - [`VulkanDevice`](crate::vulkan::VulkanDevice): the real logical device,
//!   backed by `ash` and `gpu-allocator`.
//! - [`HeadlessDevice`](crate::headless::HeadlessDevice) (feature
//!   `headless`): an in-process device that records commands and keeps all
//!   memory on the host, used by tests.
//!
//! RAII wrappers in this crate hold a [`DeviceRef`] and release their handle
//! through it on drop, so a wrapper never outlives the device it came from.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::device::{BufferDesc, DeviceRef};
//! use vkframe_rhi::vk;
//! use gpu_allocator::MemoryLocation;
//!
//! # fn example(device: DeviceRef) -> vkframe_rhi::RhiResult<()> {
//! let (buffer, memory) = device.create_buffer(&BufferDesc {
//!     name: "scratch",
//!     size: 256,
//!     usage: vk::BufferUsageFlags::TRANSFER_SRC,
//!     location: MemoryLocation::CpuToGpu,
//! })?;
//! device.destroy_buffer(buffer, memory);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::error::RhiResult;
use crate::memory::MemoryBlock;
use crate::physical_device::QueueFamilyIndices;
use crate::swapchain::SwapchainSupportDetails;

/// Shared handle to the device every RAII wrapper is created from.
pub type DeviceRef = Arc<dyn GpuDevice>;

/// Parameters for a memory-backed buffer.
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc<'a> {
    /// Debug name passed to the allocator.
    pub name: &'a str,
    /// Size in bytes. Must be non-zero.
    pub size: vk::DeviceSize,
    /// Vulkan usage flags.
    pub usage: vk::BufferUsageFlags,
    /// Where the backing memory lives.
    pub location: MemoryLocation,
}

/// Parameters for a memory-backed image.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc<'a> {
    /// Debug name passed to the allocator.
    pub name: &'a str,
    /// Width and height in pixels.
    pub extent: vk::Extent2D,
    /// Texel format.
    pub format: vk::Format,
    /// Vulkan usage flags.
    pub usage: vk::ImageUsageFlags,
    /// Tiling mode.
    pub tiling: vk::ImageTiling,
}

/// Everything the renderer core needs from a logical device.
///
/// Handles passed in must have been created by the same device and must
/// still be alive. Recording methods (`cmd_*`) require the command buffer to
/// be in the recording state.
pub trait GpuDevice: Send + Sync {
    /// Human readable adapter name.
    fn name(&self) -> &str;

    /// Queue family indices used for graphics and presentation.
    fn queue_families(&self) -> QueueFamilyIndices;

    /// Maximum sampler anisotropy, or `None` if anisotropic filtering is unavailable.
    fn max_sampler_anisotropy(&self) -> Option<f32>;

    // =========================================================================
    // Memory-backed resources
    // =========================================================================

    /// Creates a buffer and binds freshly allocated memory to it.
    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<(vk::Buffer, MemoryBlock)>;

    /// Destroys a buffer and releases its memory.
    fn destroy_buffer(&self, buffer: vk::Buffer, memory: MemoryBlock);

    /// Creates a 2D image (one mip, one layer) in device-local memory.
    fn create_image(&self, desc: &ImageDesc<'_>) -> RhiResult<(vk::Image, MemoryBlock)>;

    /// Destroys an image and releases its memory.
    fn destroy_image(&self, image: vk::Image, memory: MemoryBlock);

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> RhiResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    /// Format feature support of the physical device.
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    // =========================================================================
    // Command pools and command buffers
    // =========================================================================

    /// Creates a command pool on the graphics queue family.
    fn create_command_pool(&self, flags: vk::CommandPoolCreateFlags)
    -> RhiResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    );
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D);
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    );

    // =========================================================================
    // Synchronization and queues
    // =========================================================================

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);

    /// Blocks until `fence` is signaled or `timeout_ns` elapses.
    ///
    /// Expiry is reported as [`RhiError::SynchronizationTimeout`](crate::RhiError::SynchronizationTimeout).
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;
    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool>;

    /// Submits work to the graphics queue.
    fn submit_graphics(&self, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> RhiResult<()>;

    /// Blocks until the graphics queue is idle.
    fn graphics_queue_wait_idle(&self) -> RhiResult<()>;

    /// Blocks until all queues are idle.
    fn wait_idle(&self) -> RhiResult<()>;

    // =========================================================================
    // Descriptors
    // =========================================================================

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>>;
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);

    // =========================================================================
    // Render passes, framebuffers and pipelines
    // =========================================================================

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>)
    -> RhiResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>)
    -> RhiResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // =========================================================================
    // Presentation
    // =========================================================================

    /// Queries capabilities, formats and present modes of the device's surface.
    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails>;

    /// The surface every swapchain of this device presents to.
    fn surface(&self) -> vk::SurfaceKHR;

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RhiResult<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;

    /// Acquires the next presentable image.
    ///
    /// Returns `(image_index, suboptimal)`. The raw `vk::Result` is kept on
    /// the error path so callers can branch on `ERROR_OUT_OF_DATE_KHR`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result>;

    /// Queues an image for presentation. Returns `true` if the swapchain is suboptimal.
    fn queue_present(&self, info: &vk::PresentInfoKHR<'_>) -> Result<bool, vk::Result>;
}

/// Returns `true` if `format` supports depth-stencil attachment usage with `tiling`.
pub fn supports_depth_attachment(
    device: &dyn GpuDevice,
    format: vk::Format,
    tiling: vk::ImageTiling,
) -> bool {
    let props = device.format_properties(format);
    let features = match tiling {
        vk::ImageTiling::LINEAR => props.linear_tiling_features,
        _ => props.optimal_tiling_features,
    };
    features.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
}
