//! In-process [`GpuDevice`] that never touches a driver.
//!
//! The headless device mints unique handles, keeps every buffer in host
//! memory and records every command recorded into its command buffers. On
//! submit it "executes" buffer-to-buffer copies and signals the fence right
//! away, so fence waits never block. Tests inspect what happened through
//! [`HeadlessDevice::submissions`], [`HeadlessDevice::events`] and the
//! live-object counters.
//!
//! Acquire and present results can be scripted per call to exercise
//! swapchain recreation:
//!
//! ```ignore
//! use vkframe_rhi::headless::HeadlessDevice;
//! use vkframe_rhi::vk;
//!
//! let device = HeadlessDevice::builder().build();
//! device.fail_acquire_at(5, vk::Result::ERROR_OUT_OF_DATE_KHR);
//! ```

use std::collections::{HashMap, VecDeque};
use std::ffi::c_char;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk::{self, Handle};
use tracing::debug;

use crate::device::{BufferDesc, DeviceRef, GpuDevice, ImageDesc};
use crate::error::{RhiError, RhiResult};
use crate::memory::{MemoryBlock, checked_end};
use crate::physical_device::QueueFamilyIndices;
use crate::surface::{ResizeFlag, SurfaceProvider};
use crate::swapchain::SwapchainSupportDetails;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads a Vulkan `(pointer, count)` pair as a slice.
///
/// # Safety
///
/// `ptr` must point to `len` valid elements when `len` is non-zero.
unsafe fn raw_slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if len == 0 || ptr.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len as usize) }
    }
}

// ============================================================================
// Host memory
// ============================================================================

/// Shared host-side backing store of a headless memory block.
#[derive(Clone, Debug, Default)]
pub struct HostMemory(Arc<Mutex<Vec<u8>>>);

impl HostMemory {
    /// Allocates `len` zeroed bytes.
    pub fn zeroed(len: usize) -> Self {
        Self(Arc::new(Mutex::new(vec![0; len])))
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> RhiResult<()> {
        let mut bytes = lock(&self.0);
        let end = checked_end(offset, data.len(), bytes.len())?;
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn read(&self, offset: usize, len: usize) -> RhiResult<Vec<u8>> {
        let bytes = lock(&self.0);
        let end = checked_end(offset, len, bytes.len())?;
        Ok(bytes[offset..end].to_vec())
    }
}

// ============================================================================
// Recording
// ============================================================================

/// Kinds of objects the headless device tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Buffer,
    Image,
    ImageView,
    Sampler,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    RenderPass,
    Framebuffer,
    PipelineLayout,
    ShaderModule,
    Pipeline,
    Swapchain,
}

/// A command recorded into a headless command buffer.
#[derive(Clone, Debug)]
pub enum RecordedCommand {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_value_count: u32,
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    BindVertexBuffers(Vec<vk::Buffer>),
    BindIndexBuffer(vk::Buffer),
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
    },
    ImageBarrier {
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
}

/// One `vkQueueSubmit` as seen by the headless device.
#[derive(Clone, Debug, Default)]
pub struct Submission {
    pub command_buffers: Vec<vk::CommandBuffer>,
    /// Commands of all submitted command buffers, in submission order.
    pub commands: Vec<RecordedCommand>,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

impl Submission {
    /// Index counts of every indexed draw, in order.
    pub fn draw_counts(&self) -> Vec<u32> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                RecordedCommand::DrawIndexed { index_count, .. } => Some(*index_count),
                _ => None,
            })
            .collect()
    }

    /// Number of render pass instances begun.
    pub fn render_pass_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|cmd| matches!(cmd, RecordedCommand::BeginRenderPass { .. }))
            .count()
    }

    /// Framebuffers targeted by each render pass instance.
    pub fn framebuffers(&self) -> Vec<vk::Framebuffer> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                RecordedCommand::BeginRenderPass { framebuffer, .. } => Some(*framebuffer),
                _ => None,
            })
            .collect()
    }
}

/// Ordered journal of device-level events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    SwapchainCreated(vk::SwapchainKHR),
    SwapchainDestroyed(vk::SwapchainKHR),
    ImageCreated {
        image: vk::Image,
        format: vk::Format,
    },
    ImageDestroyed(vk::Image),
    FramebufferCreated(vk::Framebuffer),
    FramebufferDestroyed(vk::Framebuffer),
    Acquire(Result<u32, vk::Result>),
    BeginCommandBuffer(vk::CommandBuffer),
    /// Index into [`HeadlessDevice::submissions`].
    Submit(usize),
    Present(vk::Result),
    WaitIdle,
}

// ============================================================================
// Device
// ============================================================================

struct HeadlessSwapchain {
    images: Vec<vk::Image>,
    next_image: u32,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    live: HashMap<ObjectKind, usize>,
    created: HashMap<ObjectKind, usize>,
    buffers: HashMap<vk::Buffer, HostMemory>,
    command_buffers: HashMap<vk::CommandBuffer, Vec<RecordedCommand>>,
    fences: HashMap<vk::Fence, bool>,
    swapchains: HashMap<vk::SwapchainKHR, HeadlessSwapchain>,
    submissions: Vec<Submission>,
    events: Vec<DeviceEvent>,
    acquire_calls: u64,
    present_calls: u64,
    acquire_script: HashMap<u64, vk::Result>,
    present_script: HashMap<u64, vk::Result>,
    surface_extent: vk::Extent2D,
}

impl State {
    fn mint<H: Handle>(&mut self, kind: ObjectKind) -> H {
        self.next_handle += 1;
        *self.live.entry(kind).or_default() += 1;
        *self.created.entry(kind).or_default() += 1;
        H::from_raw(self.next_handle)
    }

    fn release(&mut self, kind: ObjectKind) {
        let live = self.live.entry(kind).or_default();
        *live = live.saturating_sub(1);
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: RecordedCommand) {
        self.command_buffers.entry(cmd).or_default().push(command);
    }
}

/// Builder for [`HeadlessDevice`].
#[derive(Clone, Debug)]
pub struct HeadlessDeviceBuilder {
    name: String,
    surface_formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    min_image_count: u32,
    max_image_count: u32,
    extent: vk::Extent2D,
    depth_formats: Vec<vk::Format>,
    max_anisotropy: Option<f32>,
    separate_present_family: bool,
}

impl Default for HeadlessDeviceBuilder {
    fn default() -> Self {
        Self {
            name: "headless".to_string(),
            surface_formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            min_image_count: 2,
            max_image_count: 3,
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            depth_formats: vec![vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT],
            max_anisotropy: Some(16.0),
            separate_present_family: false,
        }
    }
}

impl HeadlessDeviceBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn surface_formats(mut self, formats: &[vk::SurfaceFormatKHR]) -> Self {
        self.surface_formats = formats.to_vec();
        self
    }

    pub fn present_modes(mut self, modes: &[vk::PresentModeKHR]) -> Self {
        self.present_modes = modes.to_vec();
        self
    }

    /// Sets `minImageCount` and `maxImageCount` reported by the surface (0 = unbounded).
    pub fn image_counts(mut self, min: u32, max: u32) -> Self {
        self.min_image_count = min;
        self.max_image_count = max;
        self
    }

    pub fn extent(mut self, width: u32, height: u32) -> Self {
        self.extent = vk::Extent2D { width, height };
        self
    }

    /// Formats that report depth-stencil attachment support with optimal tiling.
    pub fn depth_formats(mut self, formats: &[vk::Format]) -> Self {
        self.depth_formats = formats.to_vec();
        self
    }

    pub fn max_anisotropy(mut self, max: Option<f32>) -> Self {
        self.max_anisotropy = max;
        self
    }

    /// Reports distinct graphics and present queue families.
    pub fn separate_present_family(mut self, separate: bool) -> Self {
        self.separate_present_family = separate;
        self
    }

    pub fn build(self) -> Arc<HeadlessDevice> {
        let state = State {
            surface_extent: self.extent,
            ..State::default()
        };
        Arc::new(HeadlessDevice {
            config: self,
            state: Mutex::new(state),
        })
    }
}

/// GPU-free device used by tests.
pub struct HeadlessDevice {
    config: HeadlessDeviceBuilder,
    state: Mutex<State>,
}

impl HeadlessDevice {
    pub fn builder() -> HeadlessDeviceBuilder {
        HeadlessDeviceBuilder::default()
    }

    /// Convenience: default device as a [`DeviceRef`].
    pub fn new_ref() -> DeviceRef {
        Self::builder().build()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Changes the extent reported as the surface's current extent.
    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state().surface_extent = vk::Extent2D { width, height };
    }

    pub fn surface_extent(&self) -> vk::Extent2D {
        self.state().surface_extent
    }

    /// Makes the `call`-th acquire (1-based) return `result`.
    ///
    /// `SUBOPTIMAL_KHR` still hands out an image; error codes do not.
    pub fn fail_acquire_at(&self, call: u64, result: vk::Result) {
        self.state().acquire_script.insert(call, result);
    }

    /// Makes the `call`-th present (1-based) return `result`.
    pub fn fail_present_at(&self, call: u64, result: vk::Result) {
        self.state().present_script.insert(call, result);
    }

    /// Number of live objects of `kind`.
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state().live.get(&kind).copied().unwrap_or(0)
    }

    /// Number of objects of `kind` ever created.
    pub fn created_count(&self, kind: ObjectKind) -> usize {
        self.state().created.get(&kind).copied().unwrap_or(0)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    pub fn last_submission(&self) -> Option<Submission> {
        self.state().submissions.last().cloned()
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state().events.clone()
    }

    pub fn acquire_count(&self) -> u64 {
        self.state().acquire_calls
    }

    pub fn present_count(&self) -> u64 {
        self.state().present_calls
    }

    /// Images of a live swapchain.
    pub fn swapchain_image_handles(&self, swapchain: vk::SwapchainKHR) -> Vec<vk::Image> {
        self.state()
            .swapchains
            .get(&swapchain)
            .map(|sc| sc.images.clone())
            .unwrap_or_default()
    }

    fn supports_depth(&self, format: vk::Format) -> bool {
        self.config.depth_formats.contains(&format)
    }
}

impl GpuDevice for HeadlessDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(if self.config.separate_present_family { 1 } else { 0 }),
        }
    }

    fn max_sampler_anisotropy(&self) -> Option<f32> {
        self.config.max_anisotropy
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<(vk::Buffer, MemoryBlock)> {
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(
                "buffer size must be non-zero".to_string(),
            ));
        }
        let len = usize::try_from(desc.size).map_err(|_| {
            RhiError::DeviceResourceExhausted(format!("buffer '{}' too large", desc.name))
        })?;
        let memory = HostMemory::zeroed(len);
        let mut state = self.state();
        let buffer: vk::Buffer = state.mint(ObjectKind::Buffer);
        state.buffers.insert(buffer, memory.clone());
        debug!("headless: buffer '{}' ({} bytes)", desc.name, desc.size);
        Ok((buffer, MemoryBlock::Host(memory)))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, _memory: MemoryBlock) {
        let mut state = self.state();
        state.buffers.remove(&buffer);
        state.release(ObjectKind::Buffer);
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> RhiResult<(vk::Image, MemoryBlock)> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "image extent must be non-zero".to_string(),
            ));
        }
        let mut state = self.state();
        let image: vk::Image = state.mint(ObjectKind::Image);
        state.events.push(DeviceEvent::ImageCreated {
            image,
            format: desc.format,
        });
        Ok((image, MemoryBlock::Host(HostMemory::default())))
    }

    fn destroy_image(&self, image: vk::Image, _memory: MemoryBlock) {
        let mut state = self.state();
        state.events.push(DeviceEvent::ImageDestroyed(image));
        state.release(ObjectKind::Image);
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView> {
        Ok(self.state().mint(ObjectKind::ImageView))
    }

    fn destroy_image_view(&self, _view: vk::ImageView) {
        self.state().release(ObjectKind::ImageView);
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> RhiResult<vk::Sampler> {
        Ok(self.state().mint(ObjectKind::Sampler))
    }

    fn destroy_sampler(&self, _sampler: vk::Sampler) {
        self.state().release(ObjectKind::Sampler);
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        if self.supports_depth(format) {
            vk::FormatProperties {
                optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::FormatFeatureFlags::SAMPLED_IMAGE,
                ..Default::default()
            }
        } else if is_depth_format(format) {
            vk::FormatProperties::default()
        } else {
            let color = vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::TRANSFER_DST;
            vk::FormatProperties {
                linear_tiling_features: color,
                optimal_tiling_features: color,
                ..Default::default()
            }
        }
    }

    fn create_command_pool(
        &self,
        _flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool> {
        Ok(self.state().mint(ObjectKind::CommandPool))
    }

    fn destroy_command_pool(&self, _pool: vk::CommandPool) {
        self.state().release(ObjectKind::CommandPool);
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        Ok((0..count)
            .map(|_| {
                let cmd: vk::CommandBuffer = state.mint(ObjectKind::CommandBuffer);
                state.command_buffers.insert(cmd, Vec::new());
                cmd
            })
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state();
        for cmd in buffers {
            state.command_buffers.remove(cmd);
            state.release(ObjectKind::CommandBuffer);
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        let mut state = self.state();
        state.command_buffers.insert(cmd, Vec::new());
        state.events.push(DeviceEvent::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> RhiResult<()> {
        Ok(())
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.state().command_buffers.insert(cmd, Vec::new());
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        _contents: vk::SubpassContents,
    ) {
        self.state().record(
            cmd,
            RecordedCommand::BeginRenderPass {
                render_pass: info.render_pass,
                framebuffer: info.framebuffer,
                render_area: info.render_area,
                clear_value_count: info.clear_value_count,
            },
        );
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.state().record(cmd, RecordedCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.state()
            .record(cmd, RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport) {
        self.state()
            .record(cmd, RecordedCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D) {
        self.state()
            .record(cmd, RecordedCommand::SetScissor(*scissor));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        _dynamic_offsets: &[u32],
    ) {
        self.state().record(
            cmd,
            RecordedCommand::BindDescriptorSets {
                layout,
                first_set,
                sets: sets.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        _first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.state()
            .record(cmd, RecordedCommand::BindVertexBuffers(buffers.to_vec()));
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
        self.state()
            .record(cmd, RecordedCommand::BindIndexBuffer(buffer));
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.state().record(
            cmd,
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.state().record(
            cmd,
            RecordedCommand::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        self.state().record(
            cmd,
            RecordedCommand::CopyBufferToImage {
                src,
                dst,
                layout: dst_layout,
            },
        );
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        let mut state = self.state();
        for barrier in image_barriers {
            state.record(
                cmd,
                RecordedCommand::ImageBarrier {
                    image: barrier.image,
                    old_layout: barrier.old_layout,
                    new_layout: barrier.new_layout,
                },
            );
        }
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        Ok(self.state().mint(ObjectKind::Semaphore))
    }

    fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {
        self.state().release(ObjectKind::Semaphore);
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state();
        let fence: vk::Fence = state.mint(ObjectKind::Fence);
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.fences.remove(&fence);
        state.release(ObjectKind::Fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> RhiResult<()> {
        match self.state().fences.get(&fence) {
            Some(true) => Ok(()),
            Some(false) => Err(RhiError::SynchronizationTimeout(format!(
                "fence {:#x} is never signaled",
                fence.as_raw()
            ))),
            None => Err(RhiError::InvalidHandle(format!(
                "unknown fence {:#x}",
                fence.as_raw()
            ))),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        match self.state().fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!(
                "unknown fence {:#x}",
                fence.as_raw()
            ))),
        }
    }

    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool> {
        self.state()
            .fences
            .get(&fence)
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown fence {:#x}", fence.as_raw())))
    }

    fn submit_graphics(&self, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.state();
        for info in submits {
            // SAFETY: the pointer/count pairs come from ash builders over live slices.
            let (command_buffers, wait_semaphores, wait_stages, signal_semaphores) = unsafe {
                (
                    raw_slice(info.p_command_buffers, info.command_buffer_count).to_vec(),
                    raw_slice(info.p_wait_semaphores, info.wait_semaphore_count).to_vec(),
                    raw_slice(info.p_wait_dst_stage_mask, info.wait_semaphore_count).to_vec(),
                    raw_slice(info.p_signal_semaphores, info.signal_semaphore_count).to_vec(),
                )
            };

            let mut commands = Vec::new();
            for cmd in &command_buffers {
                let recorded = state.command_buffers.get(cmd).ok_or_else(|| {
                    RhiError::InvalidHandle(format!("unknown command buffer {:#x}", cmd.as_raw()))
                })?;
                commands.extend(recorded.iter().cloned());
            }

            for command in &commands {
                if let RecordedCommand::CopyBuffer { src, dst, regions } = command {
                    let (Some(src_mem), Some(dst_mem)) =
                        (state.buffers.get(src), state.buffers.get(dst))
                    else {
                        return Err(RhiError::InvalidHandle(
                            "copy between unknown buffers".to_string(),
                        ));
                    };
                    for region in regions {
                        let bytes = src_mem.read(region.src_offset as usize, region.size as usize)?;
                        dst_mem.write(region.dst_offset as usize, &bytes)?;
                    }
                }
            }

            let index = state.submissions.len();
            state.submissions.push(Submission {
                command_buffers,
                commands,
                wait_semaphores,
                wait_stages,
                signal_semaphores,
                fence,
            });
            state.events.push(DeviceEvent::Submit(index));
        }

        if fence != vk::Fence::null() {
            match state.fences.get_mut(&fence) {
                Some(signaled) => *signaled = true,
                None => {
                    return Err(RhiError::InvalidHandle(format!(
                        "unknown fence {:#x}",
                        fence.as_raw()
                    )));
                }
            }
        }
        Ok(())
    }

    fn graphics_queue_wait_idle(&self) -> RhiResult<()> {
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.state().events.push(DeviceEvent::WaitIdle);
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        Ok(self.state().mint(ObjectKind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&self, _layout: vk::DescriptorSetLayout) {
        self.state().release(ObjectKind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(
        &self,
        _info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorPool> {
        Ok(self.state().mint(ObjectKind::DescriptorPool))
    }

    fn destroy_descriptor_pool(&self, _pool: vk::DescriptorPool) {
        self.state().release(ObjectKind::DescriptorPool);
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state();
        Ok(layouts
            .iter()
            .map(|_| state.mint(ObjectKind::DescriptorSet))
            .collect())
    }

    fn update_descriptor_sets(&self, _writes: &[vk::WriteDescriptorSet<'_>]) {}

    fn create_render_pass(
        &self,
        _info: &vk::RenderPassCreateInfo<'_>,
    ) -> RhiResult<vk::RenderPass> {
        Ok(self.state().mint(ObjectKind::RenderPass))
    }

    fn destroy_render_pass(&self, _render_pass: vk::RenderPass) {
        self.state().release(ObjectKind::RenderPass);
    }

    fn create_framebuffer(
        &self,
        _info: &vk::FramebufferCreateInfo<'_>,
    ) -> RhiResult<vk::Framebuffer> {
        let mut state = self.state();
        let framebuffer: vk::Framebuffer = state.mint(ObjectKind::Framebuffer);
        state.events.push(DeviceEvent::FramebufferCreated(framebuffer));
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state();
        state
            .events
            .push(DeviceEvent::FramebufferDestroyed(framebuffer));
        state.release(ObjectKind::Framebuffer);
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::PipelineLayout> {
        Ok(self.state().mint(ObjectKind::PipelineLayout))
    }

    fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {
        self.state().release(ObjectKind::PipelineLayout);
    }

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(RhiError::ShaderError("empty SPIR-V".to_string()));
        }
        Ok(self.state().mint(ObjectKind::ShaderModule))
    }

    fn destroy_shader_module(&self, _module: vk::ShaderModule) {
        self.state().release(ObjectKind::ShaderModule);
    }

    fn create_graphics_pipeline(
        &self,
        _info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline> {
        Ok(self.state().mint(ObjectKind::Pipeline))
    }

    fn destroy_pipeline(&self, _pipeline: vk::Pipeline) {
        self.state().release(ObjectKind::Pipeline);
    }

    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails> {
        let extent = self.state().surface_extent;
        Ok(SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: self.config.min_image_count,
                max_image_count: self.config.max_image_count,
                current_extent: extent,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            formats: self.config.surface_formats.clone(),
            present_modes: self.config.present_modes.clone(),
        })
    }

    fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(u64::MAX)
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RhiResult<vk::SwapchainKHR> {
        let mut state = self.state();
        let swapchain: vk::SwapchainKHR = state.mint(ObjectKind::Swapchain);
        // Swapchain images are owned by the swapchain, not counted as images.
        let images = (0..info.min_image_count)
            .map(|_| {
                state.next_handle += 1;
                vk::Image::from_raw(state.next_handle)
            })
            .collect();
        state.swapchains.insert(
            swapchain,
            HeadlessSwapchain {
                images,
                next_image: 0,
            },
        );
        state.events.push(DeviceEvent::SwapchainCreated(swapchain));
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        state.swapchains.remove(&swapchain);
        state.events.push(DeviceEvent::SwapchainDestroyed(swapchain));
        state.release(ObjectKind::Swapchain);
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        self.state()
            .swapchains
            .get(&swapchain)
            .map(|sc| sc.images.clone())
            .ok_or_else(|| RhiError::InvalidHandle("unknown swapchain".to_string()))
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        _semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        let mut state = self.state();
        state.acquire_calls += 1;
        let call = state.acquire_calls;
        let scripted = state.acquire_script.remove(&call);

        if let Some(result) = scripted
            && result != vk::Result::SUBOPTIMAL_KHR
        {
            state.events.push(DeviceEvent::Acquire(Err(result)));
            return Err(result);
        }

        let Some(chain) = state.swapchains.get_mut(&swapchain) else {
            state
                .events
                .push(DeviceEvent::Acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR)));
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };
        let count = chain.images.len().max(1) as u32;
        let index = chain.next_image % count;
        chain.next_image = (index + 1) % count;
        state.events.push(DeviceEvent::Acquire(Ok(index)));
        Ok((index, scripted.is_some()))
    }

    fn queue_present(&self, info: &vk::PresentInfoKHR<'_>) -> Result<bool, vk::Result> {
        let mut state = self.state();
        state.present_calls += 1;
        let call = state.present_calls;

        // SAFETY: the pointer/count pair comes from an ash builder over a live slice.
        let swapchains = unsafe { raw_slice(info.p_swapchains, info.swapchain_count) };
        if swapchains
            .iter()
            .any(|sc| !state.swapchains.contains_key(sc))
        {
            state
                .events
                .push(DeviceEvent::Present(vk::Result::ERROR_SURFACE_LOST_KHR));
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        }

        match state.present_script.remove(&call) {
            Some(vk::Result::SUBOPTIMAL_KHR) => {
                state
                    .events
                    .push(DeviceEvent::Present(vk::Result::SUBOPTIMAL_KHR));
                Ok(true)
            }
            Some(result) => {
                state.events.push(DeviceEvent::Present(result));
                Err(result)
            }
            None => {
                state.events.push(DeviceEvent::Present(vk::Result::SUCCESS));
                Ok(false)
            }
        }
    }
}

fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

// ============================================================================
// Surface
// ============================================================================

struct HeadlessSurfaceState {
    hooks: Vec<ResizeFlag>,
    sizes_after_wait: VecDeque<(u32, u32)>,
    wait_calls: usize,
}

/// [`SurfaceProvider`] driven by a [`HeadlessDevice`].
///
/// The framebuffer size is the device's surface extent, so resizing the
/// surface is visible both to the renderer and to swapchain creation.
/// Clones share state.
#[derive(Clone)]
pub struct HeadlessSurface {
    device: Arc<HeadlessDevice>,
    state: Arc<Mutex<HeadlessSurfaceState>>,
}

impl HeadlessSurface {
    pub fn new(device: &Arc<HeadlessDevice>) -> Self {
        Self {
            device: Arc::clone(device),
            state: Arc::new(Mutex::new(HeadlessSurfaceState {
                hooks: Vec::new(),
                sizes_after_wait: VecDeque::new(),
                wait_calls: 0,
            })),
        }
    }

    /// Simulates a window resize: updates the surface extent and raises every hook.
    pub fn resize(&self, width: u32, height: u32) {
        self.device.set_surface_extent(width, height);
        for hook in &lock(&self.state).hooks {
            hook.raise();
        }
    }

    /// Queues a size that becomes current on the next `wait_events` call.
    pub fn push_size_after_wait(&self, width: u32, height: u32) {
        lock(&self.state)
            .sizes_after_wait
            .push_back((width, height));
    }

    /// Number of `wait_events` calls so far.
    pub fn wait_calls(&self) -> usize {
        lock(&self.state).wait_calls
    }

    /// Number of registered resize hooks.
    pub fn hook_count(&self) -> usize {
        lock(&self.state).hooks.len()
    }
}

impl SurfaceProvider for HeadlessSurface {
    fn framebuffer_size(&self) -> (u32, u32) {
        let extent = self.device.surface_extent();
        (extent.width, extent.height)
    }

    fn register_resize_hook(&mut self, hook: ResizeFlag) {
        lock(&self.state).hooks.push(hook);
    }

    fn wait_events(&mut self) {
        let next = {
            let mut state = lock(&self.state);
            state.wait_calls += 1;
            state.sizes_after_wait.pop_front()
        };
        if let Some((width, height)) = next {
            self.device.set_surface_extent(width, height);
        }
    }

    fn required_instance_extensions(&self) -> RhiResult<Vec<*const c_char>> {
        Ok(Vec::new())
    }

    fn create_surface(
        &self,
        _entry: &ash::Entry,
        _instance: &ash::Instance,
    ) -> RhiResult<vk::SurfaceKHR> {
        Err(RhiError::SurfaceError(
            "headless surface has no window".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_counted() {
        let device = HeadlessDevice::builder().build();
        let a = device.create_semaphore().unwrap();
        let b = device.create_semaphore().unwrap();
        assert_ne!(a, b);
        assert_eq!(device.live_count(ObjectKind::Semaphore), 2);

        device.destroy_semaphore(a);
        assert_eq!(device.live_count(ObjectKind::Semaphore), 1);
        assert_eq!(device.created_count(ObjectKind::Semaphore), 2);
    }

    #[test]
    fn test_submit_executes_copies_and_signals_fence() {
        let device = HeadlessDevice::builder().build();
        let desc = |name| BufferDesc {
            name,
            size: 4,
            usage: vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            location: gpu_allocator::MemoryLocation::CpuToGpu,
        };
        let (src, mut src_mem) = device.create_buffer(&desc("src")).unwrap();
        let (dst, dst_mem) = device.create_buffer(&desc("dst")).unwrap();
        src_mem.write(0, &[1, 2, 3, 4]).unwrap();

        let pool = device
            .create_command_pool(vk::CommandPoolCreateFlags::empty())
            .unwrap();
        let cmd = device.allocate_command_buffers(pool, 1).unwrap()[0];
        device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .unwrap();
        device.cmd_copy_buffer(cmd, src, dst, &[vk::BufferCopy::default().size(4)]);
        device.end_command_buffer(cmd).unwrap();

        let fence = device.create_fence(false).unwrap();
        assert!(device.wait_for_fence(fence, 0).is_err());

        let cmds = [cmd];
        let submit = vk::SubmitInfo::default().command_buffers(&cmds);
        device.submit_graphics(&[submit], fence).unwrap();

        assert!(device.fence_status(fence).unwrap());
        assert_eq!(dst_mem.read(0, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(device.submissions().len(), 1);
    }

    #[test]
    fn test_unsignaled_fence_wait_times_out() {
        let device = HeadlessDevice::builder().build();
        let fence = device.create_fence(false).unwrap();
        let err = device.wait_for_fence(fence, u64::MAX).unwrap_err();
        assert!(matches!(err, RhiError::SynchronizationTimeout(_)));
    }

    #[test]
    fn test_scripted_acquire_failure() {
        let device = HeadlessDevice::builder().build();
        let info = vk::SwapchainCreateInfoKHR::default().min_image_count(3);
        let swapchain = device.create_swapchain(&info).unwrap();
        let semaphore = device.create_semaphore().unwrap();

        device.fail_acquire_at(2, vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, semaphore),
            Ok((0, false))
        );
        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, semaphore),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, semaphore),
            Ok((1, false))
        );
    }

    #[test]
    fn test_surface_wait_applies_queued_size() {
        let device = HeadlessDevice::builder().extent(0, 0).build();
        let mut surface = HeadlessSurface::new(&device);
        surface.push_size_after_wait(640, 480);

        assert_eq!(surface.framebuffer_size(), (0, 0));
        surface.wait_events();
        assert_eq!(surface.framebuffer_size(), (640, 480));
        assert_eq!(surface.wait_calls(), 1);
    }

    #[test]
    fn test_surface_resize_raises_hooks() {
        let device = HeadlessDevice::builder().build();
        let mut surface = HeadlessSurface::new(&device);
        let flag = ResizeFlag::default();
        surface.register_resize_hook(flag.clone());

        surface.resize(1024, 768);
        assert!(flag.take());
        assert!(!flag.take());
        assert_eq!(device.surface_extent().width, 1024);
    }
}
