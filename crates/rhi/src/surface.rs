//! The presentation-surface collaborator.
//!
//! The renderer never talks to a windowing system directly. It asks a
//! [`SurfaceProvider`] for the current framebuffer size, registers a
//! [`ResizeFlag`] that the provider raises on resize, and blocks in
//! [`SurfaceProvider::wait_events`] while the window is minimized.

use std::ffi::c_char;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;

use crate::error::RhiResult;

/// A shared "framebuffer was resized" flag.
///
/// Clones observe the same flag. The provider raises it from its event
/// handler; the renderer takes it between frames.
#[derive(Clone, Debug, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    /// Marks the framebuffer as resized.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether the flag was raised and clears it.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Window-side collaborator consumed by the renderer.
pub trait SurfaceProvider {
    /// Current framebuffer size in pixels. `(0, 0)` while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Whether the framebuffer has a non-zero width and height.
    ///
    /// Applications driving the event loop should skip frames while this
    /// is false instead of letting the renderer block in
    /// [`wait_events`](Self::wait_events).
    fn has_area(&self) -> bool {
        let (width, height) = self.framebuffer_size();
        width > 0 && height > 0
    }

    /// Registers a flag to be raised whenever the framebuffer is resized.
    fn register_resize_hook(&mut self, hook: ResizeFlag);

    /// Blocks until the framebuffer size may have changed.
    ///
    /// The renderer calls this in a loop while [`has_area`](Self::has_area)
    /// is false. An implementation either processes pending window events
    /// itself or, when the event loop is owned by the caller, sleeps and
    /// relies on another thread to update the size. In the latter case the
    /// caller must not draw from the event thread while the window has no
    /// area, or the loop never ends.
    fn wait_events(&mut self);

    /// Instance extensions needed to create a surface for this window.
    fn required_instance_extensions(&self) -> RhiResult<Vec<*const c_char>>;

    /// Creates the Vulkan surface. Ownership passes to the caller.
    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> RhiResult<vk::SurfaceKHR>;
}
