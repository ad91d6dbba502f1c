//! Rendering context errors

use crate::types::ShaderKind;
use thiserror::Error;

/// Errors reported by a rendering context.
#[derive(Debug, Clone, Error)]
pub enum GlError {
    #[error("Failed to create {0} object")]
    CreateObject(&'static str),

    #[error("Unknown {kind} object {id}")]
    UnknownObject { kind: &'static str, id: u32 },

    #[error("{kind} shader failed to compile: {log}")]
    ShaderCompile { kind: ShaderKind, log: String },

    #[error("Program failed to link: {0}")]
    ProgramLink(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
