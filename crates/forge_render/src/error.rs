//! Renderer error types

use forge_shader::ShaderError;
use thiserror::Error;

use crate::uniform::UniformError;

/// Errors surfaced by resource creation and frame orchestration
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Shader error: {0}")]
    Shader(#[from] ShaderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to link program '{name}': {log}")]
    ProgramLink { name: String, log: String },

    #[error("Framebuffer incomplete: {0}")]
    FramebufferIncomplete(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Asset manager used before init() or after shutdown()")]
    AssetsNotInitialized,

    #[error("Post-processor not prepared: {0}")]
    PostProcessorNotPrepared(String),

    #[error("Framebuffer {0} has no integer attachment to pick from")]
    PickUnsupported(u32),

    #[error("Uniform error: {0}")]
    Uniform(#[from] UniformError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RenderError>;
