//! Light sources as seen by the renderer

use std::sync::Arc;

use forge_core::LayerMask;
use glam::Vec3;

use crate::resource::Framebuffer;

/// Matches the `*_LIGHT` constants in `LightingUtils.h`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum LightType {
    #[default]
    Point = 0,
    Directional = 1,
    Spot = 2,
}

/// Depth target a light renders its shadow into
#[derive(Clone, Debug)]
pub struct LightShadow {
    /// Cubemap for point lights, 2D otherwise. `None` once shadows are disabled.
    pub render_target: Option<Arc<Framebuffer>>,
    /// Layers whose cameras receive this shadow
    pub layer_mask: LayerMask,
}

#[derive(Clone, Debug)]
pub struct LightSource {
    pub ty: LightType,
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub ambient: f32,
    /// Constant, linear and quadratic terms
    pub attenuation: Vec3,
    pub intensity: f32,
    /// Far plane of shadow projections
    pub range: f32,
    pub shadow: Option<LightShadow>,
}

impl Default for LightSource {
    fn default() -> Self {
        Self {
            ty: LightType::Point,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Y,
            color: Vec3::ONE,
            ambient: 0.1,
            attenuation: Vec3::new(1.0, 0.0, 0.0),
            intensity: 1.0,
            range: 100.0,
            shadow: None,
        }
    }
}

impl LightSource {
    pub fn point(position: Vec3, color: Vec3) -> Self {
        Self {
            ty: LightType::Point,
            position,
            color,
            ..Default::default()
        }
    }

    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Self {
            ty: LightType::Directional,
            direction: direction.normalize_or_zero(),
            color,
            ..Default::default()
        }
    }

    pub fn spot(position: Vec3, direction: Vec3, color: Vec3) -> Self {
        Self {
            ty: LightType::Spot,
            position,
            direction: direction.normalize_or_zero(),
            color,
            ..Default::default()
        }
    }

    pub fn with_shadow(mut self, render_target: Arc<Framebuffer>, layer_mask: LayerMask) -> Self {
        self.shadow = Some(LightShadow {
            render_target: Some(render_target),
            layer_mask,
        });
        self
    }

    pub fn with_range(mut self, range: f32) -> Self {
        self.range = range;
        self
    }

    /// Shadow target, when one is attached and still live
    pub fn shadow_target(&self) -> Option<&Arc<Framebuffer>> {
        self.shadow.as_ref()?.render_target.as_ref()
    }

    /// Whether this light renders a shadow for a camera on `camera_mask`
    pub fn casts_shadows_for(&self, camera_mask: LayerMask) -> bool {
        match &self.shadow {
            Some(shadow) => shadow.render_target.is_some() && shadow.layer_mask.intersects(camera_mask),
            None => false,
        }
    }
}
