//! Pane Driver - Window and Rendering Driver Core
//!
//! Drives a stateful, non-reentrant rendering context from many threads at
//! once:
//!
//! - [`ContextMutex`]: every multi-call context operation (texture creation,
//!   upload, window draw, program compilation) runs as one locked sequence
//! - [`Screen`]: registry of open windows, the event dispatcher, and the
//!   factory for textures and buffers
//! - [`Window`]: per-window draw loop thread fed by a coalescing
//!   [`DrawPump`], plus an application event queue
//! - [`WindowSystem`]: the platform seam; [`HeadlessWindowSystem`] runs
//!   everything off-screen on software contexts
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pane_driver::{DrawOp, HeadlessWindowSystem, Screen, WindowOptions};
//! use pane_driver::pane_gl::{Color, Rect};
//!
//! let platform = Arc::new(HeadlessWindowSystem::new());
//! let screen = Screen::with_defaults(platform.clone()).unwrap();
//! let window = screen.new_window(WindowOptions::with_title("demo")).unwrap();
//!
//! window
//!     .set_painter(|frame| frame.fill(Rect::new(0, 0, 8, 8), Color::RED, DrawOp::Src))
//!     .unwrap();
//! let drawn = window.frames_drawn().unwrap();
//! window.send_draw_request().unwrap();
//! assert!(window.wait_drawn_since(drawn, Duration::from_secs(5)).unwrap());
//! ```

mod buffer;
mod config;
mod draw;
mod error;
mod event;
mod gl_mutex;
mod headless;
mod platform;
mod programs;
mod pump;
mod screen;
mod texture;
mod window;

pub use buffer::Buffer;
pub use config::{ConfigError, DriverConfig, WindowSize};
pub use draw::{DrawOp, Frame};
pub use error::{DriverError, Result};
pub use event::{PlatformEvent, WindowEvent, WindowId, WindowOptions};
pub use gl_mutex::{ContextId, ContextMutex, GlContext, Locked};
pub use headless::HeadlessWindowSystem;
pub use platform::{PlatformError, WindowSystem};
pub use programs::{FillProgram, TextureProgram};
pub use pump::{DrawPump, EventPump, PumpState};
pub use screen::Screen;
pub use texture::Texture;
pub use window::{Painter, Window};

pub use pane_gl;
