//! Entity records
//!
//! An entity is a generational handle into the scene's record storage.
//! Every entity owns exactly one transform. Camera, light and model
//! components are optional and at most one of each kind is attached.

use core::fmt;

use forge_core::{Handle, LayerMask};

use crate::components::{CameraComponent, LightComponent, ModelRendererComponent};
use crate::transform::TransformId;

pub type Entity = Handle<EntityRecord>;

/// Component storage for a single entity
pub struct EntityRecord {
    pub(crate) name: String,
    pub(crate) enabled: bool,
    pub(crate) layer: LayerMask,
    pub(crate) transform: TransformId,
    pub(crate) camera: Option<CameraComponent>,
    pub(crate) light: Option<LightComponent>,
    pub(crate) model: Option<ModelRendererComponent>,
}

impl EntityRecord {
    pub(crate) fn new(name: String, transform: TransformId) -> Self {
        Self {
            name,
            enabled: true,
            layer: LayerMask::DEFAULT,
            transform,
            camera: None,
            light: None,
            model: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn layer(&self) -> LayerMask {
        self.layer
    }

    pub fn transform(&self) -> TransformId {
        self.transform
    }

    pub fn camera(&self) -> Option<&CameraComponent> {
        self.camera.as_ref()
    }

    pub fn light(&self) -> Option<&LightComponent> {
        self.light.as_ref()
    }

    pub fn model(&self) -> Option<&ModelRendererComponent> {
        self.model.as_ref()
    }

    /// Enabled and on a layer `mask` can see
    pub(crate) fn visible_to(&self, mask: LayerMask) -> bool {
        self.enabled && self.layer.intersects(mask)
    }
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRecord")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("layer", &self.layer)
            .field("transform", &self.transform)
            .field("camera", &self.camera.is_some())
            .field("light", &self.light.is_some())
            .field("model", &self.model.is_some())
            .finish()
    }
}
