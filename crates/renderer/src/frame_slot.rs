//! Per-frame-in-flight resources.
//!
//! Every slot owns what one frame needs while the GPU may still be
//! working on the previous frames:
//!
//! - a primary command buffer, re-recorded every time the slot comes round
//! - an image-available semaphore signaled by acquire
//! - a render-finished semaphore waited on by present
//! - an in-flight fence signaled when the slot's submission retires
//! - a persistently mapped uniform buffer and the global descriptor set
//!   pointing at it
//!
//! The fence starts signaled so the first wait on each slot returns at once.
//! Slots are used round-robin through [`FrameSlots::advance`].

use ash::vk;
use tracing::{debug, info};

use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::command::{CommandBuffer, CommandPool};
use vkframe_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, write_uniform_buffer};
use vkframe_rhi::sync::{Fence, Semaphore};
use vkframe_rhi::{DeviceRef, RhiResult};

use crate::error::{RendererError, Result};

/// Resources for a single frame in flight.
pub struct FrameSlot {
    command_buffer: CommandBuffer,
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
    uniform: Buffer,
    global_set: vk::DescriptorSet,
}

impl FrameSlot {
    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    #[inline]
    pub fn in_flight(&self) -> vk::Fence {
        self.in_flight.handle()
    }

    #[inline]
    pub fn global_set(&self) -> vk::DescriptorSet {
        self.global_set
    }

    pub fn uniform(&self) -> &Buffer {
        &self.uniform
    }

    /// Blocks until the slot's previous submission has retired.
    pub fn wait(&self) -> RhiResult<()> {
        self.in_flight.wait(u64::MAX)
    }

    /// Unsignals the fence right before the slot's next submission.
    pub fn reset_fence(&self) -> RhiResult<()> {
        self.in_flight.reset()
    }

    /// Copies `data` into the mapped uniform buffer.
    ///
    /// The caller must have waited on the slot first.
    pub fn write_uniform<T: bytemuck::Pod>(&mut self, data: &T) -> RhiResult<()> {
        self.uniform.write_pod(0, data)
    }
}

/// The ring of frame slots and the index of the current one.
pub struct FrameSlots {
    slots: Vec<FrameSlot>,
    current: usize,
}

impl FrameSlots {
    /// Creates `count` slots.
    ///
    /// Each slot gets a uniform buffer of `uniform_size` bytes and a set of
    /// `global_layout` from `global_pool` whose binding 0 points at it.
    ///
    /// # Errors
    ///
    /// A zero `count` is a configuration error; resource creation failures
    /// are passed through.
    pub fn new(
        device: &DeviceRef,
        command_pool: &CommandPool,
        global_layout: &DescriptorSetLayout,
        global_pool: &DescriptorPool,
        count: usize,
        uniform_size: vk::DeviceSize,
    ) -> Result<Self> {
        if count == 0 {
            return Err(RendererError::Core(vkframe_core::Error::Config(
                "at least one frame in flight is required".to_string(),
            )));
        }

        let command_buffers = command_pool.allocate(count as u32)?;
        let layouts = vec![global_layout.handle(); count];
        let global_sets = global_pool.allocate(&layouts)?;

        let mut slots = Vec::with_capacity(count);
        for (i, (command_buffer, global_set)) in
            command_buffers.into_iter().zip(global_sets).enumerate()
        {
            let uniform = Buffer::with_usage(device.clone(), BufferUsage::Uniform, uniform_size)?;
            write_uniform_buffer(device.as_ref(), global_set, 0, uniform.descriptor_info());

            slots.push(FrameSlot {
                command_buffer,
                image_available: Semaphore::new(device.clone())?,
                render_finished: Semaphore::new(device.clone())?,
                in_flight: Fence::new(device.clone(), true)?,
                uniform,
                global_set,
            });
            debug!("Created frame slot {}", i);
        }

        info!("Frame slots created with {} frames in flight", count);

        Ok(Self { slots, current: 0 })
    }

    /// The slot used by the next frame.
    #[inline]
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn get(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Number of frames in flight.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Moves to the next slot, wrapping after the last one.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSlot> {
        self.slots.iter()
    }
}
