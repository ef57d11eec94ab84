//! The ash-backed [`GpuDevice`].
//!
//! [`VulkanDevice`] owns the whole Vulkan stack below the renderer: instance
//! (with optional validation), window surface, logical device, graphics and
//! present queues, the swapchain loader and the `gpu-allocator` allocator.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::surface::SurfaceProvider;
//! use vkframe_rhi::vulkan::VulkanDevice;
//!
//! # fn example(window: &dyn SurfaceProvider) -> vkframe_rhi::RhiResult<()> {
//! let device = VulkanDevice::new("demo", false, window)?;
//! device.wait_for_idle()?;
//! # Ok(())
//! # }
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::device::{BufferDesc, GpuDevice, ImageDesc};
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::memory::MemoryBlock;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device};
use crate::surface::SurfaceProvider;
use crate::swapchain::SwapchainSupportDetails;

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device plus everything it depends on.
///
/// Field order is destruction order for the fields without manual teardown:
/// `instance` is dropped last.
pub struct VulkanDevice {
    device: ash::Device,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical: PhysicalDeviceInfo,
    name: String,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    instance: Instance,
}

impl VulkanDevice {
    /// Creates instance, surface and logical device for the window behind `window`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedCapability`] if no GPU can render and
    /// present to the surface, or any error from instance, surface, device
    /// or allocator creation.
    pub fn new(
        application_name: &str,
        enable_validation: bool,
        window: &dyn SurfaceProvider,
    ) -> RhiResult<Arc<Self>> {
        let extensions = window.required_instance_extensions()?;
        let instance = Instance::new(application_name, &extensions, enable_validation)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        match Self::create_logical(&instance, &surface_loader, surface) {
            Ok((physical, device, allocator)) => {
                let families = physical.queue_families;
                let (Some(graphics_family), Some(present_family)) =
                    (families.graphics_family, families.present_family)
                else {
                    unreachable!("select_physical_device only returns complete families")
                };
                // SAFETY: both families were requested with one queue each.
                let (graphics_queue, present_queue) = unsafe {
                    (
                        device.get_device_queue(graphics_family, 0),
                        device.get_device_queue(present_family, 0),
                    )
                };
                let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);
                let name = physical.device_name().to_string();

                info!("GPU device ready: {}", name);

                Ok(Arc::new(Self {
                    device,
                    allocator: ManuallyDrop::new(Mutex::new(allocator)),
                    swapchain_loader,
                    surface_loader,
                    surface,
                    physical,
                    name,
                    graphics_queue,
                    present_queue,
                    instance,
                }))
            }
            Err(e) => {
                // SAFETY: nothing else references the surface yet.
                unsafe { surface_loader.destroy_surface(surface, None) };
                Err(e)
            }
        }
    }

    fn create_logical(
        instance: &Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<(PhysicalDeviceInfo, ash::Device, Allocator)> {
        let physical = select_physical_device(instance.handle(), surface, surface_loader)?;

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = physical
            .queue_families
            .unique_families()
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(physical.max_sampler_anisotropy().is_some());

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        // SAFETY: create_info only borrows locals that outlive the call.
        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };
        debug!(
            "Logical device created with {} queue(s)",
            queue_create_infos.len()
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                // SAFETY: the device has no children yet.
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };
        info!("GPU memory allocator initialized");

        Ok((physical, device, allocator))
    }

    /// Information about the selected GPU.
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Blocks until the device is idle.
    pub fn wait_for_idle(&self) -> RhiResult<()> {
        GpuDevice::wait_idle(self)
    }

    fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::InvalidHandle("allocator lock poisoned".to_string()))
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> RhiResult<gpu_allocator::vulkan::Allocation> {
        Ok(self.allocator()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?)
    }

    fn free(&self, memory: MemoryBlock, what: &str) {
        match memory {
            MemoryBlock::Allocated(allocation) => match self.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} allocation: {:?}", what, e);
                    }
                }
                Err(e) => error!("Failed to free {} allocation: {}", what, e),
            },
            #[cfg(any(test, feature = "headless"))]
            MemoryBlock::Host(_) => {}
        }
    }
}

impl GpuDevice for VulkanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.physical.queue_families
    }

    fn max_sampler_anisotropy(&self) -> Option<f32> {
        self.physical.max_sampler_anisotropy()
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<(vk::Buffer, MemoryBlock)> {
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(
                "buffer size must be non-zero".to_string(),
            ));
        }
        let info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: valid create info on a live device.
        let buffer = unsafe { self.device.create_buffer(&info, None)? };
        // SAFETY: `buffer` was just created.
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(desc.name, requirements, desc.location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: the buffer is unused.
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // SAFETY: the allocation satisfies the buffer's requirements.
        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            // SAFETY: the buffer is unused.
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free(MemoryBlock::Allocated(allocation), desc.name);
            return Err(e.into());
        }

        Ok((buffer, MemoryBlock::Allocated(allocation)))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, memory: MemoryBlock) {
        // SAFETY: the owner guarantees the GPU no longer uses the buffer.
        unsafe { self.device.destroy_buffer(buffer, None) };
        self.free(memory, "buffer");
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> RhiResult<(vk::Image, MemoryBlock)> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: valid create info on a live device.
        let image = unsafe { self.device.create_image(&info, None)? };
        // SAFETY: `image` was just created.
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let linear = desc.tiling == vk::ImageTiling::LINEAR;
        let allocation =
            match self.allocate(desc.name, requirements, MemoryLocation::GpuOnly, linear) {
                Ok(allocation) => allocation,
                Err(e) => {
                    // SAFETY: the image is unused.
                    unsafe { self.device.destroy_image(image, None) };
                    return Err(e);
                }
            };

        // SAFETY: the allocation satisfies the image's requirements.
        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            // SAFETY: the image is unused.
            unsafe { self.device.destroy_image(image, None) };
            self.free(MemoryBlock::Allocated(allocation), desc.name);
            return Err(e.into());
        }

        Ok((image, MemoryBlock::Allocated(allocation)))
    }

    fn destroy_image(&self, image: vk::Image, memory: MemoryBlock) {
        // SAFETY: the owner guarantees the GPU no longer uses the image.
        unsafe { self.device.destroy_image(image, None) };
        self.free(memory, "image");
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView> {
        // SAFETY: valid create info on a live device.
        Ok(unsafe { self.device.create_image_view(info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        // SAFETY: the owner guarantees the view is no longer referenced.
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> RhiResult<vk::Sampler> {
        // SAFETY: valid create info on a live device.
        Ok(unsafe { self.device.create_sampler(info, None)? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        // SAFETY: the owner guarantees the sampler is no longer referenced.
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        // SAFETY: the physical device belongs to the instance.
        unsafe {
            self.instance
                .handle()
                .get_physical_device_format_properties(self.physical.device, format)
        }
    }

    fn create_command_pool(
        &self,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool> {
        let family = self.physical.queue_families.graphics_family.ok_or_else(|| {
            RhiError::UnsupportedCapability("no graphics queue family".to_string())
        })?;
        let info = vk::CommandPoolCreateInfo::default()
            .flags(flags)
            .queue_family_index(family);
        // SAFETY: valid create info on a live device.
        Ok(unsafe { self.device.create_command_pool(&info, None)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: the owner guarantees no buffer from the pool is pending.
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        // SAFETY: `pool` is a live pool of this device.
        Ok(unsafe { self.device.allocate_command_buffers(&info)? })
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        // SAFETY: the buffers came from `pool` and are not pending.
        unsafe { self.device.free_command_buffers(pool, buffers) };
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        // SAFETY: `cmd` is not pending execution.
        unsafe { self.device.begin_command_buffer(cmd, &info)? };
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        // SAFETY: `cmd` is recording.
        unsafe { self.device.end_command_buffer(cmd)? };
        Ok(())
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        // SAFETY: `cmd` is not pending execution and its pool allows resets.
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) {
        // SAFETY: recording-state precondition of the trait.
        unsafe { self.device.cmd_begin_render_pass(cmd, info, contents) };
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        // SAFETY: recording-state precondition of the trait.
        unsafe { self.device.cmd_end_render_pass(cmd) };
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        // SAFETY: recording-state precondition of the trait.
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) };
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport) {
        // SAFETY: recording-state precondition of the trait.
        unsafe {
            self.device
                .cmd_set_viewport(cmd, 0, std::slice::from_ref(viewport))
        };
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D) {
        // SAFETY: recording-state precondition of the trait.
        unsafe {
            self.device
                .cmd_set_scissor(cmd, 0, std::slice::from_ref(scissor))
        };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        // SAFETY: recording-state precondition of the trait.
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                layout,
                first_set,
                sets,
                dynamic_offsets,
            )
        };
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        // SAFETY: recording-state precondition of the trait.
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd, first_binding, buffers, offsets)
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        // SAFETY: recording-state precondition of the trait.
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, offset, index_type)
        };
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        // SAFETY: recording-state precondition of the trait.
        unsafe {
            self.device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        // SAFETY: recording-state precondition of the trait.
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        // SAFETY: recording-state precondition of the trait.
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cmd, src, dst, dst_layout, regions)
        };
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        // SAFETY: recording-state precondition of the trait.
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            )
        };
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        // SAFETY: default create info on a live device.
        Ok(unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: the owner guarantees no pending operation waits on it.
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        // SAFETY: valid create info on a live device.
        Ok(unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        // SAFETY: the owner guarantees no pending submission signals it.
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<()> {
        // SAFETY: `fence` is a live fence of this device.
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns)? };
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        // SAFETY: `fence` is not associated with a pending submission.
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool> {
        // SAFETY: `fence` is a live fence of this device.
        Ok(unsafe { self.device.get_fence_status(fence)? })
    }

    fn submit_graphics(&self, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> RhiResult<()> {
        // SAFETY: the caller recorded every command buffer and owns the fence.
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submits, fence)?
        };
        Ok(())
    }

    fn graphics_queue_wait_idle(&self) -> RhiResult<()> {
        // SAFETY: the queue belongs to this device.
        unsafe { self.device.queue_wait_idle(self.graphics_queue)? };
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        // SAFETY: no host-side synchronization requirements.
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        // SAFETY: valid create info on a live device.
        Ok(unsafe { self.device.create_descriptor_set_layout(info, None)? })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        // SAFETY: the owner guarantees the layout is no longer referenced.
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorPool> {
        // SAFETY: valid create info on a live device.
        Ok(unsafe { self.device.create_descriptor_pool(info, None)? })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        // SAFETY: the owner guarantees no set from the pool is in use.
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        // SAFETY: `pool` and `layouts` are live objects of this device.
        Ok(unsafe { self.device.allocate_descriptor_sets(&info)? })
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        // SAFETY: the written sets are not in use by pending command buffers.
        unsafe { self.device.update_descriptor_sets(writes, &[]) };
    }

    fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> RhiResult<vk::RenderPass> {
        // SAFETY: valid create info on a live device.
        Ok(unsafe { self.device.create_render_pass(info, None)? })
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        // SAFETY: the owner guarantees the render pass is no longer referenced.
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> RhiResult<vk::Framebuffer> {
        // SAFETY: valid create info on a live device.
        Ok(unsafe { self.device.create_framebuffer(info, None)? })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        // SAFETY: the owner guarantees the framebuffer is no longer referenced.
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::PipelineLayout> {
        // SAFETY: valid create info on a live device.
        Ok(unsafe { self.device.create_pipeline_layout(info, None)? })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        // SAFETY: the owner guarantees the layout is no longer referenced.
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        // SAFETY: `code` is SPIR-V words owned by the caller.
        unsafe { self.device.create_shader_module(&info, None) }
            .map_err(|e| RhiError::ShaderError(format!("Failed to create shader module: {}", e)))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        // SAFETY: modules may be destroyed once pipelines are built.
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline> {
        // SAFETY: every state struct referenced by `info` outlives the call.
        let pipelines = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(info),
                None,
            )
        }
        .map_err(|(_, result)| RhiError::from(result))?;

        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::PipelineError("driver returned no pipeline".to_string()))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        // SAFETY: the owner guarantees the pipeline is no longer referenced.
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails> {
        SwapchainSupportDetails::query(self.physical.device, self.surface, &self.surface_loader)
    }

    fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RhiResult<vk::SwapchainKHR> {
        // SAFETY: the surface in `info` is this device's surface.
        Ok(unsafe { self.swapchain_loader.create_swapchain(info, None)? })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        // SAFETY: the owner destroyed the image views and waited for idle.
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        // SAFETY: `swapchain` is live.
        Ok(unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? })
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        // SAFETY: `semaphore` is unsignaled with no pending signal operation.
        unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    fn queue_present(&self, info: &vk::PresentInfoKHR<'_>) -> Result<bool, vk::Result> {
        // SAFETY: the presented image was acquired and its render semaphore will signal.
        unsafe { self.swapchain_loader.queue_present(self.present_queue, info) }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        // SAFETY: all wrappers holding this device have been dropped (they
        // hold an Arc to it), so only the device, surface and instance remain.
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        info!("Logical device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert_eq!(DEVICE_EXTENSIONS, &[ash::khr::swapchain::NAME]);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanDevice>();
    }
}
