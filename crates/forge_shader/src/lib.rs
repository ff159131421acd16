//! # Forge Shader
//!
//! Shader source handling for the Forge renderer:
//! - Named snippet library resolved through `#include "Name"`
//! - `#define`-based variants (`SHADOW_MAP`, `JOINT_COUNT=N`, ...)
//! - Single-file sources split on `#shader vertex|geometry|fragment`
//! - GLSL uniform reflection into a [`ShaderInterface`] at compile time
//!
//! ## Architecture
//!
//! ```text
//! Source (.glsl) ──► ShaderSource::parse ──► includes ──► defines ──► Preprocessor
//!                                                                        │
//!                                                                        ▼
//!                                     CompiledShader ◄── ShaderInterface ◄── reflect
//! ```
//!
//! Nothing here talks to a GPU. The renderer hands [`CompiledShader`] stage
//! text to its device and keeps the interface for uniform binding.

pub mod compiler;
pub mod library;
pub mod preprocess;
pub mod reflect;
pub mod source;
pub mod variants;

pub use compiler::{CompiledShader, ShaderCompiler};
pub use library::{
    ShaderLibrary, MAX_CLIPPING_PLANES, MAX_LIGHT_COUNT, MAX_POINT_SHADOW_MAPS, MAX_SHADOW_MAPS,
};
pub use preprocess::{PreprocessedSource, Preprocessor};
pub use reflect::{ShaderDataType, ShaderInterface, StructField, StructLayout, UniformDescriptor};
pub use source::{ShaderSource, ShaderStage};
pub use variants::{ShaderDefine, ShaderVariant, SHADOW_FORMATION_DEFINE, SHADOW_MAP_DEFINE};

use thiserror::Error;

/// Errors from loading, expanding or reflecting shader sources
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("Failed to read shader file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Shader '{shader}' has no {stage} stage")]
    MissingStage { shader: String, stage: ShaderStage },

    #[error("Unknown shader stage '{0}'")]
    UnknownStage(String),

    #[error("Included file '{0}' is not in the shader library")]
    IncludeNotFound(String),

    #[error("Include cycle through '{0}'")]
    IncludeCycle(String),

    #[error("Preprocessor error on line {line}: {message}")]
    Preprocess { line: usize, message: String },

    #[error("Parse error in '{shader}': {message}")]
    Parse { shader: String, message: String },
}

pub type Result<T> = std::result::Result<T, ShaderError>;
