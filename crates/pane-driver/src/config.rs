//! Driver Configuration
//!
//! Settings shared by every window opened through a [`Screen`](crate::Screen).
//! Loaded from JSON; every field has a default so partial files work.

use glam::UVec2;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Window size in physical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl WindowSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn to_uvec2(self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(1024, 768)
    }
}

/// Complete driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Size given to every new window
    /// Default: 1024x768
    pub default_window_size: WindowSize,

    /// Title used when the window options carry none
    pub default_title: String,

    /// Name prefix for draw-loop threads ("<prefix>-<window id>")
    pub draw_thread_prefix: String,

    /// Clear the surface before each painter run
    pub clear_on_draw: bool,

    /// Clear color (premultiplied RGBA)
    pub clear_color: [f32; 4],

    /// How long closing a window waits for its draw loop to exit
    pub shutdown_timeout_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            default_window_size: WindowSize::default(),
            default_title: String::from("pane"),
            draw_thread_prefix: String::from("draw-loop"),
            clear_on_draw: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shutdown_timeout_ms: 2_000,
        }
    }
}

impl DriverConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let WindowSize { width, height } = self.default_window_size;
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidWindowSize { width, height });
        }
        if self.draw_thread_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyThreadPrefix);
        }
        if self.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(ConfigError::InvalidClearColor);
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Window size {width}x{height} must be non-zero")]
    InvalidWindowSize { width: u32, height: u32 },

    #[error("Draw thread prefix cannot be empty")]
    EmptyThreadPrefix,

    #[error("Clear color channels must lie in [0, 1]")]
    InvalidClearColor,

    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
