//! Shared foundations for the vkframe crates.
//!
//! - Error type and result alias
//! - Logging initialization
//! - Renderer configuration (TOML)
//! - Frame timing

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::RendererConfig;
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::{FpsCounter, Timer};
