//! Platform layer for the vkframe renderer.
//!
//! Provides the winit [`Window`] that serves as the renderer's surface
//! provider.

mod window;

pub use window::Window;

// Re-export winit types that users might need
pub use winit::event::{ElementState, KeyEvent, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
pub use winit::keyboard::{KeyCode, PhysicalKey};
