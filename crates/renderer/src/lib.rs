//! Frame orchestration for the vkframe renderer.
//!
//! This crate sits on top of `vkframe-rhi` and drives rendering:
//! - frame slots for frames in flight ([`frame_slot`])
//! - pipeline setups built by setup binders ([`setup`])
//! - the drawable registry grouped by setup ([`drawable`])
//! - the per-frame loop and surface recreation ([`Renderer`])

mod error;

pub mod drawable;
pub mod frame_slot;
pub mod renderer;
pub mod setup;
pub mod ubo;

pub use drawable::{DrawRegistry, Drawable};
pub use error::{RendererError, Result};
pub use frame_slot::{FrameSlot, FrameSlots};
pub use renderer::{FrameStatus, Renderer};
pub use setup::{
    GLOBAL_SET_INDEX, OBJECT_SET_INDEX, PipelineSetup, RecreateFn, RendererView, SetupBinder,
    SetupId, framebuffer_recreator,
};
pub use ubo::{GlobalUbo, ObjectUbo};
