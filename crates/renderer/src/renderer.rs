//! The frame loop orchestrator.
//!
//! [`Renderer`] owns the device, the swapchain, the depth image, the frame
//! slots and the arena of pipeline setups. Each [`Renderer::draw_frame`]:
//!
//! 1. waits on the current slot's fence
//! 2. acquires a swapchain image
//! 3. resets the fence
//! 4. re-records the slot's command buffer from the draw registry
//! 5. submits, waiting on image-available at color attachment output
//! 6. presents, waiting on render-finished
//! 7. advances to the next slot
//!
//! A stale surface (out of date, suboptimal, or a resize notification)
//! rebuilds the swapchain, the depth image and every setup's framebuffers.

use std::rc::Rc;

use ash::vk;
use tracing::{debug, error, info, warn};

use vkframe_core::RendererConfig;
use vkframe_rhi::command::{CommandPool, TransferContext};
use vkframe_rhi::depth::DepthImage;
use vkframe_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
use vkframe_rhi::swapchain::{Swapchain, SwapchainPreferences};
use vkframe_rhi::vulkan::VulkanDevice;
use vkframe_rhi::{DeviceRef, ResizeFlag, RhiError, SurfaceProvider};

use crate::drawable::{DrawRegistry, Drawable};
use crate::error::{RendererError, Result};
use crate::frame_slot::FrameSlots;
use crate::setup::{GLOBAL_SET_INDEX, PipelineSetup, RendererView, SetupBinder, SetupId};
use crate::ubo::GlobalUbo;

/// Outcome of a successful [`Renderer::draw_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and queued for presentation.
    Presented,
    /// The surface went stale and was rebuilt. The frame may have been
    /// dropped; call `draw_frame` again.
    SurfaceRecreated,
}

struct RegisteredSetup {
    setup: PipelineSetup,
    binder: Rc<dyn SetupBinder>,
}

/// Drives the per-frame loop over a set of pipeline setups.
///
/// Fields are dropped in declaration order after [`Drop`] waits for the
/// device to go idle, so setups go first and the device last.
pub struct Renderer {
    setups: Vec<RegisteredSetup>,
    registry: DrawRegistry,
    frames: FrameSlots,
    /// Owns the frame slots' global sets.
    _global_pool: DescriptorPool,
    global_layout: DescriptorSetLayout,
    /// Owns the frame slots' command buffers.
    _command_pool: CommandPool,
    transfer: TransferContext,
    depth_image: DepthImage,
    swapchain: Swapchain,
    swapchain_preferences: SwapchainPreferences,
    resized: ResizeFlag,
    surface: Box<dyn SurfaceProvider>,
    config: RendererConfig,
    device: DeviceRef,
}

impl Renderer {
    /// Creates the Vulkan device for `surface` and initializes the renderer on it.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, if no GPU can present to the
    /// surface, or if any resource creation fails.
    pub fn init(config: RendererConfig, surface: Box<dyn SurfaceProvider>) -> Result<Self> {
        config.validate()?;
        let device: DeviceRef = VulkanDevice::new(
            &config.application_name,
            config.enable_validation,
            surface.as_ref(),
        )?;
        Self::with_device(config, device, surface)
    }

    /// Initializes the renderer on an existing device.
    ///
    /// Builds the swapchain, the depth image, the global descriptor layout
    /// (binding 0, a vertex-stage uniform buffer), one frame slot per frame
    /// in flight and registers a resize hook with `surface`.
    pub fn with_device(
        config: RendererConfig,
        device: DeviceRef,
        mut surface: Box<dyn SurfaceProvider>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing renderer on {} ({} frames in flight)",
            device.name(),
            config.frames_in_flight
        );

        let swapchain_preferences = SwapchainPreferences::from_config(&config.swapchain);
        let size = wait_for_nonzero_size(surface.as_mut());
        let swapchain = Swapchain::new(device.clone(), &swapchain_preferences, size)?;
        let depth_image = DepthImage::new(
            device.clone(),
            swapchain.extent(),
            &config.depth_format_candidates,
        )?;

        let transfer = TransferContext::new(device.clone())?;
        let command_pool = CommandPool::new(device.clone())?;

        let global_bindings = [DescriptorBindingBuilder::uniform_buffer(
            0,
            vk::ShaderStageFlags::VERTEX,
        )];
        let global_layout = DescriptorSetLayout::new(device.clone(), &global_bindings)?;
        let global_pool = DescriptorPool::for_bindings(
            device.clone(),
            &global_bindings,
            config.frames_in_flight as u32,
        )?;

        let frames = FrameSlots::new(
            &device,
            &command_pool,
            &global_layout,
            &global_pool,
            config.frames_in_flight,
            GlobalUbo::SIZE as vk::DeviceSize,
        )?;

        let resized = ResizeFlag::default();
        surface.register_resize_hook(resized.clone());

        info!(
            "Renderer initialized: {} swapchain images, depth {:?}",
            swapchain.image_count(),
            depth_image.format()
        );

        Ok(Self {
            setups: Vec::new(),
            registry: DrawRegistry::new(),
            frames,
            _global_pool: global_pool,
            global_layout,
            _command_pool: command_pool,
            transfer,
            depth_image,
            swapchain,
            swapchain_preferences,
            resized,
            surface,
            config,
            device,
        })
    }

    // =========================================================================
    // Setup and draw list
    // =========================================================================

    /// Builds `binder`'s pipeline setup and stores it under a fresh id.
    ///
    /// The id is also handed to the binder so its drawables can report it.
    ///
    /// # Errors
    ///
    /// Propagates the binder's error, or [`RendererError::InvalidSetup`] if
    /// the setup does not have one framebuffer per swapchain image or is
    /// the first setup and its render pass does not clear.
    pub fn register_setup(&mut self, binder: Rc<dyn SetupBinder>) -> Result<SetupId> {
        let id = SetupId::new(self.setups.len());
        let setup = binder.create_setup(
            &self.view(),
            self.global_layout.handle(),
            self.frames.len(),
        )?;

        if self.setups.is_empty() && !setup.render_pass.clears() {
            return Err(RendererError::InvalidSetup(format!(
                "setup {} renders first each frame but its render pass does not clear",
                id
            )));
        }
        if setup.framebuffers.len() != self.swapchain.image_count() {
            return Err(RendererError::InvalidSetup(format!(
                "setup {} has {} framebuffers for {} swapchain images",
                id,
                setup.framebuffers.len(),
                self.swapchain.image_count()
            )));
        }

        binder.set_setup_id(id);
        self.setups.push(RegisteredSetup { setup, binder });
        info!("Registered pipeline setup {}", id);
        Ok(id)
    }

    /// Replaces the draw list. Objects are grouped by setup; within a
    /// group they are drawn in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::UnknownSetup`] if an object references a
    /// setup that was never registered; the previous draw list stays.
    pub fn set_drawable_objects(&mut self, objects: &[Rc<dyn Drawable>]) -> Result<()> {
        self.registry.rebuild(objects, self.setups.len())?;
        debug!(
            "Draw list: {} objects in {} setups",
            self.registry.len(),
            self.registry.group_count()
        );
        Ok(())
    }

    /// Writes `data` into the current frame slot's global uniform buffer.
    ///
    /// Waits for the slot's previous submission first, so the GPU is never
    /// reading the region being written.
    pub fn update_global_uniform<T: bytemuck::Pod>(&mut self, data: &T) -> Result<()> {
        let slot = self.frames.current_mut();
        slot.wait()?;
        slot.write_uniform(data)?;
        Ok(())
    }

    // =========================================================================
    // Frame loop
    // =========================================================================

    /// Renders and presents one frame.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned. A stale surface is rebuilt in place
    /// and reported as [`FrameStatus::SurfaceRecreated`].
    pub fn draw_frame(&mut self) -> Result<FrameStatus> {
        let frame_index = self.frames.current_index();
        self.frames.current().wait()?;

        let acquired = self
            .swapchain
            .acquire_next_image(self.frames.current().image_available());
        let (image_index, acquire_suboptimal) = match acquired {
            Ok(acquired) => acquired,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date on acquire");
                self.recreate_swapchain()?;
                return Ok(FrameStatus::SurfaceRecreated);
            }
            Err(e) => return Err(RhiError::from(e).into()),
        };

        self.frames.current().reset_fence()?;
        self.record(frame_index, image_index)?;
        self.submit(frame_index)?;

        let presented = self
            .swapchain
            .present(image_index, self.frames.current().render_finished());
        self.frames.advance();

        let present_stale = match presented {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(RhiError::from(e).into()),
        };

        let resized = self.resized.take();
        if acquire_suboptimal || present_stale || resized {
            debug!(
                "Surface stale after present (acquire suboptimal: {}, present stale: {}, resized: {})",
                acquire_suboptimal, present_stale, resized
            );
            self.recreate_swapchain()?;
            return Ok(FrameStatus::SurfaceRecreated);
        }

        Ok(FrameStatus::Presented)
    }

    /// Records the frame: one render pass per setup in the registry.
    fn record(&self, frame_index: usize, image_index: u32) -> Result<()> {
        let slot = self
            .frames
            .get(frame_index)
            .ok_or_else(|| RhiError::InvalidHandle(format!("no frame slot {}", frame_index)))?;
        let cmd = slot.command_buffer();
        let extent = self.swapchain.extent();

        cmd.reset()?;
        cmd.begin()?;

        if self.registry.is_empty() {
            // Nothing renders to the image, so it only needs presentable layout.
            let image = self
                .swapchain
                .images()
                .get(image_index as usize)
                .copied()
                .ok_or_else(|| {
                    RhiError::InvalidHandle(format!("no swapchain image {}", image_index))
                })?;
            cmd.transition_image_layout(
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::PRESENT_SRC_KHR,
            )?;
        }

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.config.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.config.clear_depth,
                    stencil: 0,
                },
            },
        ];

        // Loading passes need a cleared image; the first setup always clears.
        let first_loads = match self.registry.groups().next() {
            Some((setup_id, _)) => !self.registered(setup_id)?.setup.render_pass.clears(),
            None => false,
        };
        if first_loads {
            let clearing = &self.registered(SetupId::new(0))?.setup;
            let framebuffer = Self::framebuffer_for(clearing, SetupId::new(0), image_index)?;
            cmd.begin_render_pass(clearing.render_pass.handle(), framebuffer, extent, &clear_values);
            cmd.end_render_pass();
        }

        for (setup_id, objects) in self.registry.groups() {
            let registered = self.registered(setup_id)?;
            let setup = &registered.setup;
            let layout = setup.pipeline_layout.handle();
            let framebuffer = Self::framebuffer_for(setup, setup_id, image_index)?;

            cmd.begin_render_pass(setup.render_pass.handle(), framebuffer, extent, &clear_values);
            cmd.bind_graphics_pipeline(setup.pipeline.handle());
            cmd.set_viewport_and_scissor(extent);
            cmd.bind_descriptor_sets(layout, GLOBAL_SET_INDEX, &[slot.global_set()]);
            registered.binder.bind_setup_resources(cmd, setup, frame_index)?;

            for object in objects.iter().filter_map(|o| o.upgrade()) {
                object.bind(cmd, layout, frame_index)?;
                cmd.draw_indexed(object.index_count());
            }

            cmd.end_render_pass();
        }

        cmd.end()?;
        Ok(())
    }

    fn registered(&self, id: SetupId) -> Result<&RegisteredSetup> {
        self.setups
            .get(id.index())
            .ok_or(RendererError::UnknownSetup(id))
    }

    fn framebuffer_for(
        setup: &PipelineSetup,
        id: SetupId,
        image_index: u32,
    ) -> Result<vk::Framebuffer> {
        setup.framebuffer(image_index).ok_or_else(|| {
            RendererError::InvalidSetup(format!(
                "setup {} has no framebuffer for image {}",
                id, image_index
            ))
        })
    }

    fn submit(&self, frame_index: usize) -> Result<()> {
        let slot = self
            .frames
            .get(frame_index)
            .ok_or_else(|| RhiError::InvalidHandle(format!("no frame slot {}", frame_index)))?;

        let wait_semaphores = [slot.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.command_buffer().handle()];
        let signal_semaphores = [slot.render_finished()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        self.device
            .submit_graphics(&[submit_info], slot.in_flight())?;
        Ok(())
    }

    // =========================================================================
    // Surface changes
    // =========================================================================

    /// Flags the swapchain for recreation at the end of the next frame.
    pub fn notify_resized(&self) {
        self.resized.raise();
    }

    /// Rebuilds the swapchain, the depth image and every setup's framebuffers
    /// at the current framebuffer size, blocking while that size is zero.
    fn recreate_swapchain(&mut self) -> Result<()> {
        let size = wait_for_nonzero_size(self.surface.as_mut());
        self.resized.take();
        self.device.wait_idle()?;

        for registered in &mut self.setups {
            registered.setup.release_framebuffers();
        }
        self.swapchain.clear();
        self.swapchain = Swapchain::new(self.device.clone(), &self.swapchain_preferences, size)?;
        self.depth_image = DepthImage::new(
            self.device.clone(),
            self.swapchain.extent(),
            &self.config.depth_format_candidates,
        )?;

        let view = RendererView {
            device: &self.device,
            swapchain: &self.swapchain,
            depth_image: &self.depth_image,
            transfer: &self.transfer,
            clears_frame: false,
        };
        for registered in &mut self.setups {
            registered.setup.recreate_framebuffers(&view)?;
        }

        info!(
            "Swapchain recreated: {}x{}, {} images, {} setups",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            self.swapchain.image_count(),
            self.setups.len()
        );
        Ok(())
    }

    /// Blocks until all submitted GPU work has completed.
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()?;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Borrowed state for binders and drawables building GPU resources.
    pub fn view(&self) -> RendererView<'_> {
        RendererView {
            device: &self.device,
            swapchain: &self.swapchain,
            depth_image: &self.depth_image,
            transfer: &self.transfer,
            clears_frame: self.setups.is_empty(),
        }
    }

    #[inline]
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    #[inline]
    pub fn transfer(&self) -> &TransferContext {
        &self.transfer
    }

    /// Index of the frame slot the next `draw_frame` uses.
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.frames.current_index()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_slots(&self) -> &FrameSlots {
        &self.frames
    }

    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_image.format()
    }

    pub fn setup(&self, id: SetupId) -> Option<&PipelineSetup> {
        self.setups.get(id.index()).map(|registered| &registered.setup)
    }

    pub fn setup_count(&self) -> usize {
        self.setups.len()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during shutdown: {}", e);
        }
        self.registry.clear();
        if !self.setups.is_empty() {
            debug!("Destroying {} pipeline setups", self.setups.len());
        }
        info!("Renderer shutting down");
    }
}

/// Returns the framebuffer size, calling `wait_events` while it is zero.
fn wait_for_nonzero_size(surface: &mut dyn SurfaceProvider) -> (u32, u32) {
    let mut logged = false;
    loop {
        let (width, height) = surface.framebuffer_size();
        if surface.has_area() {
            return (width, height);
        }
        if !logged {
            warn!("Framebuffer is {}x{}, waiting for a usable size", width, height);
            logged = true;
        }
        surface.wait_events();
    }
}
