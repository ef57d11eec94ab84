//! Renderer error type.

use thiserror::Error;
use vkframe_rhi::RhiError;

use crate::setup::SetupId;

/// Errors surfaced by [`Renderer`](crate::Renderer).
///
/// Stale-surface conditions never show up here; `draw_frame` recovers from
/// them and reports [`FrameStatus::SurfaceRecreated`](crate::FrameStatus).
#[derive(Error, Debug)]
pub enum RendererError {
    /// GPU layer failure
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Configuration or windowing failure
    #[error(transparent)]
    Core(#[from] vkframe_core::Error),

    /// A drawable names a setup id that was never registered
    #[error("unknown pipeline setup {0}")]
    UnknownSetup(SetupId),

    /// A setup binder returned a setup that breaks the renderer's invariants
    #[error("invalid pipeline setup: {0}")]
    InvalidSetup(String),
}

impl RendererError {
    /// Whether the render loop has to stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Rhi(e) => e.is_fatal(),
            _ => true,
        }
    }
}

/// Result type alias for renderer operations.
pub type Result<T> = std::result::Result<T, RendererError>;
