//! # forge_scene
//!
//! Scene layer on top of `forge_render`:
//! - [`TransformTree`]: generational arena of hierarchical transforms
//! - [`Scene`]: entity store with camera, light and model components
//! - The scene driver, which turns components into light lists and
//!   [`Renderer3D`](forge_render::Renderer3D) calls camera by camera

pub mod components;
pub mod entity;
pub mod error;
pub mod scene;
pub mod transform;

pub use components::{
    shadow_mask_for, CameraComponent, LightComponent, ModelRendererComponent, ShadowPass, DEFAULT_LIGHT_AMBIENT,
};
pub use entity::{Entity, EntityRecord};
pub use error::{HierarchyError, Result, SceneError};
pub use scene::{entity_id, Scene};
pub use transform::{Space, Transform, TransformId, TransformNode, TransformTree};

pub mod prelude {
    pub use crate::components::{CameraComponent, LightComponent, ModelRendererComponent};
    pub use crate::entity::Entity;
    pub use crate::scene::Scene;
    pub use crate::transform::{Space, Transform, TransformId, TransformTree};
    pub use forge_render::prelude::*;
}
