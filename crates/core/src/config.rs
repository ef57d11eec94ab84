//! Renderer configuration.
//!
//! [`RendererConfig`] is plain data with serde defaults, so a TOML file only
//! needs the keys it overrides:
//!
//! ```
//! use vkframe_core::config::RendererConfig;
//!
//! let config = RendererConfig::from_toml_str(
//!     r#"
//!     frames_in_flight = 3
//!     clear_color = [0.1, 0.1, 0.1, 1.0]
//!
//!     [window]
//!     title = "viewer"
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.frames_in_flight, 3);
//! assert_eq!(config.window.width, 800);
//! ```
//!
//! Vulkan enums are stored as their raw `i32` values.

use std::path::Path;

use ash::vk;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Upper bound for `frames_in_flight`.
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Top-level renderer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Reported to the driver in `VkApplicationInfo`.
    pub application_name: String,
    /// Enables the Khronos validation layer when available.
    pub enable_validation: bool,
    /// Depth formats tried in order; the first one usable as an optimal-tiling
    /// depth attachment wins.
    #[serde(with = "raw::formats")]
    pub depth_format_candidates: Vec<vk::Format>,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub swapchain: SwapchainConfig,
    pub window: WindowConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            application_name: "vkframe".to_string(),
            enable_validation: cfg!(debug_assertions),
            depth_format_candidates: vec![
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            swapchain: SwapchainConfig::default(),
            window: WindowConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&source)?;
        debug!("Loaded renderer config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        if self.depth_format_candidates.is_empty() {
            return Err(Error::Config(
                "depth_format_candidates must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.clear_depth) {
            return Err(Error::Config(format!(
                "clear_depth must be in [0, 1], got {}",
                self.clear_depth
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config("window size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Preferred swapchain settings. Anything the surface does not offer falls
/// back to the first reported format and to FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    #[serde(with = "raw::format")]
    pub preferred_surface_format: vk::Format,
    #[serde(with = "raw::color_space")]
    pub preferred_color_space: vk::ColorSpaceKHR,
    #[serde(with = "raw::present_mode")]
    pub preferred_present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            preferred_surface_format: vk::Format::R8G8B8A8_SRGB,
            preferred_color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
        }
    }
}

/// Demo window settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "vkframe".to_string(),
        }
    }
}

mod raw {
    macro_rules! raw_vk_enum {
        ($module:ident, $ty:ty) => {
            pub mod $module {
                use serde::{Deserialize, Deserializer, Serializer};

                pub fn serialize<S: Serializer>(
                    value: &$ty,
                    serializer: S,
                ) -> Result<S::Ok, S::Error> {
                    serializer.serialize_i32(value.as_raw())
                }

                pub fn deserialize<'de, D: Deserializer<'de>>(
                    deserializer: D,
                ) -> Result<$ty, D::Error> {
                    i32::deserialize(deserializer).map(<$ty>::from_raw)
                }
            }
        };
    }

    raw_vk_enum!(format, ash::vk::Format);
    raw_vk_enum!(color_space, ash::vk::ColorSpaceKHR);
    raw_vk_enum!(present_mode, ash::vk::PresentModeKHR);

    pub mod formats {
        use ash::vk;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(
            value: &[vk::Format],
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            let raw: Vec<i32> = value.iter().map(|f| f.as_raw()).collect();
            raw.serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<vk::Format>, D::Error> {
            Ok(Vec::<i32>::deserialize(deserializer)?
                .into_iter()
                .map(vk::Format::from_raw)
                .collect())
        }
    }
}
