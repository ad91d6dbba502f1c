//! Pane GL - Rendering Context Layer
//!
//! Defines the call surface of a stateful, GL-shaped rendering context and
//! ships a CPU reference implementation of it.
//!
//! The context carries hidden global state (bound texture, bound array
//! buffer, current program, blend state). Each call is individually safe to
//! issue from any thread, but a sequence of calls that forms one logical
//! operation must not interleave with another sequence. Serializing those
//! sequences is the job of the caller (see `pane-driver`).

mod color;
mod context;
mod error;
mod geometry;
mod software;
mod types;

pub use color::Color;
pub use context::RenderingContext;
pub use error::GlError;
pub use geometry::Rect;
pub use software::SoftwareContext;
pub use types::{
    AttribLocation, BlendFactor, BufferId, BufferUsage, Capability, Filter, Primitive,
    ProgramId, ShaderId, ShaderKind, TexParam, TextureId, UniformLocation, Wrap,
};

/// Number of bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;
