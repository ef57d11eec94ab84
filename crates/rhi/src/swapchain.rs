//! Swapchain management.
//!
//! A [`Swapchain`] owns the presentable images' views and the
//! `VkSwapchainKHR` itself. It is never resized in place: recreation is
//! wait-idle, [`Swapchain::clear`], then a fresh [`Swapchain::new`] with the
//! new framebuffer size.
//!
//! Format and present mode are picked by first match against the predicates
//! in [`SwapchainPreferences`]. When nothing matches, the first reported
//! format and FIFO (always available) are used.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::device::DeviceRef;
//! use vkframe_rhi::swapchain::{Swapchain, SwapchainPreferences};
//!
//! # fn example(device: DeviceRef) -> vkframe_rhi::RhiResult<()> {
//! let mut swapchain = Swapchain::new(device, &SwapchainPreferences::default(), (800, 600))?;
//! // ... window resized ...
//! swapchain.clear();
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, info, warn};
use vkframe_core::config::SwapchainConfig;

use crate::device::DeviceRef;
use crate::error::{RhiError, RhiResult};

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format and color space combinations
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        // SAFETY: the physical device and surface belong to the loader's instance.
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Predicate over reported surface formats.
pub type SurfaceFormatPredicate = Box<dyn Fn(&vk::SurfaceFormatKHR) -> bool>;

/// Predicate over reported present modes.
pub type PresentModePredicate = Box<dyn Fn(vk::PresentModeKHR) -> bool>;

/// Selection predicates for swapchain creation.
pub struct SwapchainPreferences {
    pub surface_format: SurfaceFormatPredicate,
    pub present_mode: PresentModePredicate,
}

impl SwapchainPreferences {
    pub fn new(
        surface_format: impl Fn(&vk::SurfaceFormatKHR) -> bool + 'static,
        present_mode: impl Fn(vk::PresentModeKHR) -> bool + 'static,
    ) -> Self {
        Self {
            surface_format: Box::new(surface_format),
            present_mode: Box::new(present_mode),
        }
    }

    /// Exact-match predicates for the configured format, color space and mode.
    pub fn from_config(config: &SwapchainConfig) -> Self {
        let SwapchainConfig {
            preferred_surface_format,
            preferred_color_space,
            preferred_present_mode,
        } = *config;
        Self::new(
            move |f| f.format == preferred_surface_format && f.color_space == preferred_color_space,
            move |mode| mode == preferred_present_mode,
        )
    }
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self::from_config(&SwapchainConfig::default())
    }
}

impl std::fmt::Debug for SwapchainPreferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapchainPreferences").finish_non_exhaustive()
    }
}

/// Vulkan swapchain wrapper.
///
/// Owns the image views; the images themselves belong to the swapchain.
pub struct Swapchain {
    device: DeviceRef,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates a swapchain for the device's surface.
    ///
    /// `framebuffer_size` is only used when the surface leaves the extent to
    /// the application; it is clamped to the surface limits.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedCapability`] if the surface reports no
    /// formats or present modes, or any error from swapchain or image view
    /// creation.
    pub fn new(
        device: DeviceRef,
        preferences: &SwapchainPreferences,
        framebuffer_size: (u32, u32),
    ) -> RhiResult<Self> {
        let support = device.surface_support()?;

        if !support.is_adequate() {
            return Err(RhiError::UnsupportedCapability(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats, &*preferences.surface_format)?;
        let present_mode = choose_present_mode(&support.present_modes, &*preferences.present_mode);
        let extent = choose_extent(&support.capabilities, framebuffer_size);
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        let concurrent = device.queue_families().concurrent_families();
        let (sharing_mode, family_indices): (vk::SharingMode, &[u32]) = match &concurrent {
            Some(families) => {
                debug!(
                    "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                    families[0], families[1]
                );
                (vk::SharingMode::CONCURRENT, families.as_slice())
            }
            None => (vk::SharingMode::EXCLUSIVE, &[]),
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = device.create_swapchain(&create_info)?;

        // From here on `Drop` cleans up whatever was created.
        let mut this = Self {
            device,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
            present_mode,
        };

        this.images = this.device.swapchain_images(swapchain)?;
        for &image in &this.images {
            let view = this
                .device
                .create_image_view(&color_view_info(image, surface_format.format))?;
            this.image_views.push(view);
        }

        info!("Swapchain created with {} images", this.images.len());
        Ok(this)
    }

    /// Destroys the image views and the swapchain, leaving the surface usable
    /// for the next [`Swapchain::new`]. Idempotent.
    ///
    /// The caller must ensure no submitted work still references the images.
    pub fn clear(&mut self) {
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view);
        }
        self.images.clear();

        if self.swapchain != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
            debug!(
                "Swapchain cleared (was {}x{})",
                self.extent.width, self.extent.height
            );
        }
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// Returns `(image_index, suboptimal)`. Waits without a timeout.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        self.device
            .acquire_next_image(self.swapchain, u64::MAX, semaphore)
    }

    /// Queues `image_index` for presentation after `wait_semaphore`.
    ///
    /// Returns true if the swapchain is suboptimal.
    pub fn present(
        &self,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        self.device.queue_present(&present_info)
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns false after [`Swapchain::clear`].
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.swapchain != vk::SwapchainKHR::null()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    #[inline]
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.clear();
    }
}

/// First format accepted by `predicate`, else the first reported format.
///
/// # Errors
///
/// Returns [`RhiError::UnsupportedCapability`] if `formats` is empty.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    predicate: &dyn Fn(&vk::SurfaceFormatKHR) -> bool,
) -> RhiResult<vk::SurfaceFormatKHR> {
    if let Some(&format) = formats.iter().find(|f| predicate(f)) {
        debug!(
            "Selected preferred surface format: {:?} / {:?}",
            format.format, format.color_space
        );
        return Ok(format);
    }

    let &first = formats.first().ok_or_else(|| {
        RhiError::UnsupportedCapability("surface reports no formats".to_string())
    })?;
    warn!(
        "Preferred surface format unavailable, using {:?} / {:?}",
        first.format, first.color_space
    );
    Ok(first)
}

/// First present mode accepted by `predicate`, else FIFO.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    predicate: &dyn Fn(vk::PresentModeKHR) -> bool,
) -> vk::PresentModeKHR {
    match present_modes.iter().copied().find(|&mode| predicate(mode)) {
        Some(mode) => {
            debug!("Selected present mode {:?}", mode);
            mode
        }
        None => {
            debug!("Preferred present mode unavailable, using FIFO");
            vk::PresentModeKHR::FIFO
        }
    }
}

/// Chooses the swapchain extent.
///
/// Uses the surface's current extent when it is defined; otherwise clamps
/// the framebuffer size to the surface's min/max extents.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer_size;
    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, width, height
    );

    extent
}

/// One more image than the minimum, capped at the maximum when there is one.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    // max_image_count == 0 means no limit
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn color_view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        )
}
