//! Per-scene camera description handed to the renderer
//!
//! # Example
//!
//! ```ignore
//! use forge_render::camera::{CameraData, Frustum};
//!
//! let camera = CameraData::new(view, Frustum::perspective(60f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0))
//!     .with_viewport(Viewport::full(1280, 720));
//! ```

use forge_core::LayerMask;
use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::device::Viewport;

/// Projection volume
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Frustum {
    Perspective {
        /// Vertical field of view in radians
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Frustum {
    fn default() -> Self {
        Frustum::perspective(core::f32::consts::FRAC_PI_3, 1.0, 0.1, 1000.0)
    }
}

impl Frustum {
    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Frustum::Perspective {
            fov_y,
            aspect,
            near,
            far,
        }
    }

    pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        Frustum::Orthographic {
            left,
            right,
            bottom,
            top,
            near,
            far,
        }
    }

    pub fn projection_matrix(&self) -> Mat4 {
        match *self {
            Frustum::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh_gl(fov_y, aspect, near, far),
            Frustum::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh_gl(left, right, bottom, top, near, far),
        }
    }

    pub fn near(&self) -> f32 {
        match *self {
            Frustum::Perspective { near, .. } | Frustum::Orthographic { near, .. } => near,
        }
    }

    pub fn far(&self) -> f32 {
        match *self {
            Frustum::Perspective { far, .. } | Frustum::Orthographic { far, .. } => far,
        }
    }

    /// Adjust the aspect ratio of a perspective frustum to a target size
    pub fn with_aspect(self, aspect: f32) -> Self {
        match self {
            Frustum::Perspective { fov_y, near, far, .. } => Frustum::perspective(fov_y, aspect, near, far),
            ortho => ortho,
        }
    }
}

/// How a camera composes with earlier cameras on the same target
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraMode {
    #[default]
    Normal,
    /// Keeps the color of earlier cameras, clears depth only
    Overlay,
}

/// Everything the renderer needs to know about one view
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraData {
    pub view_matrix: Mat4,
    pub frustum: Frustum,
    pub viewport: Viewport,
    pub clear_color: Vec4,
    pub mode: CameraMode,
    /// World-space planes `(n, d)`, fragments with `dot(p, plane) < 0` are clipped
    pub clipping_planes: Vec<Vec4>,
    pub layer_mask: LayerMask,
    pub use_post_processing: bool,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            view_matrix: Mat4::IDENTITY,
            frustum: Frustum::default(),
            viewport: Viewport::default(),
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            mode: CameraMode::Normal,
            clipping_planes: Vec::new(),
            layer_mask: LayerMask::ALL,
            use_post_processing: true,
        }
    }
}

impl CameraData {
    pub fn new(view_matrix: Mat4, frustum: Frustum) -> Self {
        Self {
            view_matrix,
            frustum,
            ..Default::default()
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_mode(mut self, mode: CameraMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_layer_mask(mut self, mask: LayerMask) -> Self {
        self.layer_mask = mask;
        self
    }

    pub fn with_clipping_planes(mut self, planes: Vec<Vec4>) -> Self {
        self.clipping_planes = planes;
        self
    }

    pub fn with_post_processing(mut self, enabled: bool) -> Self {
        self.use_post_processing = enabled;
        self
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.frustum.projection_matrix()
    }

    /// World-space eye position
    pub fn position(&self) -> Vec3 {
        self.view_matrix.inverse().w_axis.truncate()
    }
}
