//! Event types exchanged between the platform, the driver and applications.

use glam::UVec2;
use std::fmt;

/// Platform identifier of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl WindowId {
    /// Create a new window ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Window({})", self.0)
    }
}

/// Events delivered to a window, first by the platform and then, after the
/// driver has acted on them, to the application's event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    /// The platform has mapped the window; it is now interactable
    Mapped,
    /// The drawable was resized (physical pixels)
    Resized(UVec2),
    /// The platform asks for the window contents to be repainted
    Paint,
    /// The window's painter returned an error
    DrawFailed(String),
    /// The window has been closed; no further events follow
    Closed,
}

/// An event addressed to one platform window.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformEvent {
    pub window: WindowId,
    pub event: WindowEvent,
}

impl PlatformEvent {
    pub fn new(window: WindowId, event: WindowEvent) -> Self {
        Self { window, event }
    }
}

/// Options for opening a window.
///
/// Only the title is forwarded to the platform; every window is created at
/// the configured default size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowOptions {
    pub title: Option<String>,
}

impl WindowOptions {
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
        }
    }
}
