//! Scene error types

use forge_render::RenderError;
use thiserror::Error;

use crate::entity::Entity;
use crate::transform::TransformId;

/// Failures of transform hierarchy edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HierarchyError {
    /// The transform was destroyed, or never existed in this tree
    #[error("Invalid transform handle: {0:?}")]
    InvalidHandle(TransformId),
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Entity not found: {0:?}")]
    EntityNotFound(Entity),

    #[error("Entity {entity:?} has no {component} component")]
    MissingComponent { entity: Entity, component: &'static str },

    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

pub type Result<T> = std::result::Result<T, SceneError>;
