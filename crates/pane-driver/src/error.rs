//! Driver errors

use crate::config::ConfigError;
use crate::event::WindowId;
use crate::gl_mutex::ContextId;
use crate::platform::PlatformError;
use pane_gl::{GlError, Rect};
use thiserror::Error;

/// Errors surfaced by the driver API.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Texture creation was attempted while no window had a context.
    #[error("No rendering context available; open a window first")]
    NoContextAvailable,

    #[error("Rendering context error: {0}")]
    Gl(#[from] GlError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("{0} is closed")]
    WindowClosed(WindowId),

    #[error("Texture belongs to {texture}, but the target draws with {target}")]
    ContextMismatch { texture: ContextId, target: ContextId },

    #[error("Failed to spawn draw loop thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Region {region:?} is outside bounds {bounds:?}")]
    InvalidRegion { region: Rect, bounds: Rect },

    #[error("Invalid size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("Pixel data has {actual} bytes, expected {expected}")]
    PixelLength { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T, E = DriverError> = std::result::Result<T, E>;
