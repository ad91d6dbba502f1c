//! Platform window-system collaborator.
//!
//! The driver never talks to an OS windowing API directly. Everything it
//! needs from the platform goes through [`WindowSystem`], which lets tests
//! and headless runs inject their own windows and contexts.

use crate::event::{PlatformEvent, WindowId};
use crossbeam_channel::Receiver;
use glam::UVec2;
use pane_gl::RenderingContext;
use std::sync::Arc;
use thiserror::Error;

/// Platform failures
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("Failed to create window: {0}")]
    WindowCreation(String),

    #[error("No rendering context for {0}")]
    NoContext(WindowId),

    #[error("Unknown {0}")]
    UnknownWindow(WindowId),

    #[error("Failed to present {window}: {reason}")]
    Present { window: WindowId, reason: String },
}

/// The windowing system the driver runs on.
pub trait WindowSystem: Send + Sync {
    /// Create a platform window of the given size and return its identifier.
    fn create_window(&self, size: UVec2, title: &str) -> Result<WindowId, PlatformError>;

    /// Obtain the rendering context attached to a window.
    fn attach_context(&self, id: WindowId) -> Result<Arc<dyn RenderingContext>, PlatformError>;

    /// Present the window's current surface contents.
    ///
    /// Called with the context mutex held.
    fn present(&self, id: WindowId, gl: &dyn RenderingContext) -> Result<(), PlatformError>;

    /// Tear down the platform window. Unknown ids are ignored.
    fn destroy_window(&self, id: WindowId);

    /// Stream of window-system events (mapped, paint, resize, close).
    fn events(&self) -> Receiver<PlatformEvent>;
}
