//! Command pools, command buffer recording and one-shot transfers.
//!
//! - [`CommandPool`] owns a `VkCommandPool` on the graphics queue family.
//! - [`CommandBuffer`] is a non-owning recording handle; its storage belongs
//!   to the pool it was allocated from.
//! - [`TransferContext`] runs one-shot command sequences (staging copies,
//!   layout transitions) and waits for them to finish.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::command::TransferContext;
//! use vkframe_rhi::device::DeviceRef;
//! use vkframe_rhi::vk;
//!
//! # fn example(device: DeviceRef, src: vk::Buffer, dst: vk::Buffer) -> vkframe_rhi::RhiResult<()> {
//! let transfer = TransferContext::new(device)?;
//! transfer.one_shot(|cmd| {
//!     cmd.copy_buffer(src, dst, &[vk::BufferCopy::default().size(64)]);
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, info};

use crate::device::DeviceRef;
use crate::error::{RhiError, RhiResult};

/// Vulkan command pool wrapper.
pub struct CommandPool {
    device: DeviceRef,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Creates a pool whose buffers can be reset individually.
    pub fn new(device: DeviceRef) -> RhiResult<Self> {
        Self::with_flags(device, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    /// Creates a pool for short-lived buffers.
    pub fn new_transient(device: DeviceRef) -> RhiResult<Self> {
        Self::with_flags(device, vk::CommandPoolCreateFlags::TRANSIENT)
    }

    fn with_flags(device: DeviceRef, flags: vk::CommandPoolCreateFlags) -> RhiResult<Self> {
        let pool = device.create_command_pool(flags)?;
        info!("Command pool created ({:?})", flags);
        Ok(Self { device, pool })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate(&self, count: u32) -> RhiResult<Vec<CommandBuffer>> {
        Ok(self
            .device
            .allocate_command_buffers(self.pool, count)?
            .into_iter()
            .map(|buffer| CommandBuffer::from_handle(self.device.clone(), buffer))
            .collect())
    }

    /// Returns command buffers to the pool. They must not be pending.
    pub fn free(&self, buffers: &[CommandBuffer]) {
        let handles: Vec<vk::CommandBuffer> = buffers.iter().map(CommandBuffer::handle).collect();
        self.device.free_command_buffers(self.pool, &handles);
    }

    #[inline]
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Buffers allocated from the pool are freed with it.
        self.device.destroy_command_pool(self.pool);
        debug!("Command pool destroyed");
    }
}

/// Recording handle for a primary command buffer.
#[derive(Clone)]
pub struct CommandBuffer {
    device: DeviceRef,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn from_handle(device: DeviceRef, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        self.device
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    pub fn end(&self) -> RhiResult<()> {
        self.device.end_command_buffer(self.buffer)
    }

    /// Resets the buffer so it can be re-recorded.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_command_buffer(self.buffer)
    }

    // =========================================================================
    // Render Passes
    // =========================================================================

    /// Begins `render_pass` on `framebuffer` covering `extent`, with inline contents.
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);
        self.device
            .cmd_begin_render_pass(self.buffer, &info, vk::SubpassContents::INLINE);
    }

    pub fn end_render_pass(&self) {
        self.device.cmd_end_render_pass(self.buffer);
    }

    // =========================================================================
    // Pipeline State
    // =========================================================================

    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        self.device
            .cmd_bind_pipeline(self.buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
    }

    /// Sets a full-extent viewport (depth 0..1) and matching scissor.
    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        self.device.cmd_set_viewport(self.buffer, &viewport);
        self.device.cmd_set_scissor(self.buffer, &scissor);
    }

    /// Binds graphics descriptor sets starting at `first_set`.
    pub fn bind_descriptor_sets(
        &self,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.device.cmd_bind_descriptor_sets(
            self.buffer,
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            first_set,
            sets,
            &[],
        );
    }

    // =========================================================================
    // Draw Commands
    // =========================================================================

    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[vk::Buffer]) {
        let offsets = vec![0; buffers.len()];
        self.device
            .cmd_bind_vertex_buffers(self.buffer, first_binding, buffers, &offsets);
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, index_type: vk::IndexType) {
        self.device
            .cmd_bind_index_buffer(self.buffer, buffer, 0, index_type);
    }

    /// Draws `index_count` indices of a single instance.
    pub fn draw_indexed(&self, index_count: u32) {
        self.device
            .cmd_draw_indexed(self.buffer, index_count, 1, 0, 0, 0);
    }

    // =========================================================================
    // Transfers and Barriers
    // =========================================================================

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.device.cmd_copy_buffer(self.buffer, src, dst, regions);
    }

    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.device
            .cmd_copy_buffer_to_image(self.buffer, src, dst, dst_layout, regions);
    }

    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        self.device
            .cmd_pipeline_barrier(self.buffer, src_stage, dst_stage, image_barriers);
    }

    /// Transitions a single-mip color image between the layouts this crate uses.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for a layout pair without a known
    /// access/stage mapping.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> RhiResult<()> {
        let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            ),
            _ => {
                return Err(RhiError::InvalidHandle(format!(
                    "unsupported layout transition {:?} -> {:?}",
                    old_layout, new_layout
                )));
            }
        };

        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );

        self.pipeline_barrier(src_stage, dst_stage, &[barrier]);
        Ok(())
    }
}

/// Runs one-shot command sequences on the graphics queue.
///
/// Each call allocates a command buffer from a transient pool, records it,
/// submits it, waits for the queue to drain and frees the buffer.
pub struct TransferContext {
    pool: CommandPool,
}

impl TransferContext {
    pub fn new(device: DeviceRef) -> RhiResult<Self> {
        Ok(Self {
            pool: CommandPool::new_transient(device)?,
        })
    }

    #[inline]
    pub fn device(&self) -> &DeviceRef {
        self.pool.device()
    }

    /// Records `record` into a fresh command buffer and executes it to completion.
    ///
    /// The command buffer is freed on every path, including errors from `record`.
    pub fn one_shot<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        let buffers = self.pool.allocate(1)?;
        let result = match buffers.first() {
            Some(cmd) => self.execute(cmd, record),
            None => Err(RhiError::DeviceResourceExhausted(
                "no command buffer allocated".to_string(),
            )),
        };
        self.pool.free(&buffers);
        result
    }

    fn execute<F>(&self, cmd: &CommandBuffer, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        cmd.begin()?;
        record(cmd)?;
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        let device = self.pool.device();
        device.submit_graphics(&[submit], vk::Fence::null())?;
        device.graphics_queue_wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    use crate::headless::{HeadlessDevice, ObjectKind, RecordedCommand};

    #[test]
    fn test_command_types_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
        assert_send::<CommandPool>();
        assert_send::<TransferContext>();
    }

    #[test]
    fn test_one_shot_submits_and_frees() {
        let headless = HeadlessDevice::builder().build();
        let transfer = TransferContext::new(headless.clone()).unwrap();

        transfer
            .one_shot(|cmd| {
                cmd.draw_indexed(3);
                Ok(())
            })
            .unwrap();

        let submission = headless.last_submission().unwrap();
        assert_eq!(submission.draw_counts(), vec![3]);
        assert_eq!(submission.fence, vk::Fence::null());
        assert_eq!(headless.live_count(ObjectKind::CommandBuffer), 0);
    }

    #[test]
    fn test_one_shot_frees_on_record_error() {
        let headless = HeadlessDevice::builder().build();
        let transfer = TransferContext::new(headless.clone()).unwrap();

        let result = transfer.one_shot(|_| Err(RhiError::InvalidHandle("boom".to_string())));
        assert!(result.is_err());
        assert!(headless.submissions().is_empty());
        assert_eq!(headless.live_count(ObjectKind::CommandBuffer), 0);
    }

    #[test]
    fn test_transition_records_barrier() {
        let headless = HeadlessDevice::builder().build();
        let transfer = TransferContext::new(headless.clone()).unwrap();
        let image = vk::Image::from_raw(42);

        transfer
            .one_shot(|cmd| {
                cmd.transition_image_layout(
                    image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                )
            })
            .unwrap();

        let commands = headless.last_submission().unwrap().commands;
        assert_eq!(commands.len(), 1);
        assert!(matches!(
            commands[0],
            RecordedCommand::ImageBarrier {
                image: barrier_image,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            } if barrier_image == image
        ));
    }

    #[test]
    fn test_unknown_transition_is_rejected() {
        let device = HeadlessDevice::new_ref();
        let pool = CommandPool::new(device).unwrap();
        let cmd = &pool.allocate(1).unwrap()[0];
        assert!(
            cmd.transition_image_layout(
                vk::Image::null(),
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::PRESENT_SRC_KHR
            )
            .is_err()
        );
    }
}
