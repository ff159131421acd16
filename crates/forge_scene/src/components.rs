//! Components attached to scene entities
//!
//! - [`CameraComponent`] - projection, target and compositing options of a view
//! - [`LightComponent`] - light parameters plus an optional shadow pass
//! - [`ModelRendererComponent`] - a shared model drawn at the entity transform

use std::sync::Arc;

use forge_core::LayerMask;
use forge_render::{
    CameraData, CameraMode, Framebuffer, Frustum, GraphicsDevice, LightShadow, LightSource, LightType, Model,
    RenderOptions, Renderer3D, Viewport,
};
use glam::{Mat4, Vec3, Vec4};

// ============================================================================
// Camera
// ============================================================================

#[derive(Clone, Debug)]
pub struct CameraComponent {
    pub frustum: Frustum,
    /// Zero-sized means the whole target
    pub viewport: Viewport,
    pub layer_mask: LayerMask,
    /// Lower priorities render first
    pub priority: i32,
    /// `None` renders into the scene's default target
    pub render_target: Option<Arc<Framebuffer>>,
    pub clipping_planes: Vec<Vec4>,
    pub clear_color: Vec4,
    pub mode: CameraMode,
    pub use_post_processing: bool,
}

impl Default for CameraComponent {
    fn default() -> Self {
        Self {
            frustum: Frustum::default(),
            viewport: Viewport::default(),
            layer_mask: LayerMask::ALL,
            priority: 0,
            render_target: None,
            clipping_planes: Vec::new(),
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            mode: CameraMode::Normal,
            use_post_processing: true,
        }
    }
}

impl CameraComponent {
    pub fn new(frustum: Frustum) -> Self {
        Self {
            frustum,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_render_target(mut self, target: Arc<Framebuffer>) -> Self {
        self.render_target = Some(target);
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

    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_post_processing(mut self, enabled: bool) -> Self {
        self.use_post_processing = enabled;
        self
    }

    /// Renderer view of this camera, seen through `view_matrix`
    ///
    /// Perspective frusta take the aspect ratio of the viewport, or of
    /// `target` when the viewport is zero-sized.
    pub fn camera_data(&self, view_matrix: Mat4, target: &Framebuffer) -> CameraData {
        let aspect = if self.viewport.width > 0 && self.viewport.height > 0 {
            self.viewport.width as f32 / self.viewport.height as f32
        } else {
            target.aspect()
        };
        CameraData {
            view_matrix,
            frustum: self.frustum.with_aspect(aspect),
            viewport: self.viewport,
            clear_color: self.clear_color,
            mode: self.mode,
            clipping_planes: self.clipping_planes.clone(),
            layer_mask: self.layer_mask,
            use_post_processing: self.use_post_processing,
        }
    }
}

// ============================================================================
// Light
// ============================================================================

/// Ambient term used by light components
pub const DEFAULT_LIGHT_AMBIENT: f32 = 0.03;

/// Depth pass state of a light
#[derive(Clone, Debug)]
pub struct ShadowPass {
    enabled: bool,
    render_target: Option<Arc<Framebuffer>>,
    /// Cameras on these layers receive the shadow
    pub layer_mask: LayerMask,
}

impl Default for ShadowPass {
    fn default() -> Self {
        Self {
            enabled: false,
            render_target: None,
            layer_mask: LayerMask::ALL,
        }
    }
}

impl ShadowPass {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn render_target(&self) -> Option<&Arc<Framebuffer>> {
        self.render_target.as_ref()
    }
}

#[derive(Clone, Debug)]
pub struct LightComponent {
    pub ty: LightType,
    pub color: Vec3,
    pub ambient: f32,
    pub intensity: f32,
    /// Constant, linear and quadratic terms
    pub attenuation: Vec3,
    /// Far plane of the shadow projection
    pub range: f32,
    shadows: ShadowPass,
}

impl LightComponent {
    pub fn new(ty: LightType, color: Vec3) -> Self {
        Self {
            ty,
            color,
            ambient: DEFAULT_LIGHT_AMBIENT,
            intensity: 1.0,
            attenuation: Vec3::new(1.0, 0.0, 0.0),
            range: 100.0,
            shadows: ShadowPass::default(),
        }
    }

    pub fn point(color: Vec3) -> Self {
        Self::new(LightType::Point, color)
    }

    pub fn directional(color: Vec3) -> Self {
        Self::new(LightType::Directional, color)
    }

    pub fn spot(color: Vec3) -> Self {
        Self::new(LightType::Spot, color)
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_range(mut self, range: f32) -> Self {
        self.range = range;
        self
    }

    pub fn shadows(&self) -> &ShadowPass {
        &self.shadows
    }

    pub fn shadows_mut(&mut self) -> &mut ShadowPass {
        &mut self.shadows
    }

    /// Allocate a shadow target matching the light type
    ///
    /// Point lights get a depth cubemap, the others a 2D depth map sized by
    /// the renderer config. Enabling twice keeps the existing target.
    pub fn enable_shadows(
        &mut self,
        renderer: &Renderer3D,
        device: &mut dyn GraphicsDevice,
    ) -> forge_render::Result<()> {
        if self.shadows.render_target.is_none() {
            self.shadows.render_target = Some(renderer.create_shadow_target(device, self.ty)?);
        }
        self.shadows.enabled = true;
        Ok(())
    }

    /// Release the shadow target; later frames render this light unshadowed
    pub fn disable_shadows(&mut self, device: &mut dyn GraphicsDevice) {
        self.shadows.enabled = false;
        if let Some(target) = self.shadows.render_target.take() {
            target.destroy(device);
        }
    }

    /// Runtime light placed by a world matrix
    ///
    /// The position is the matrix translation and the direction its forward
    /// (-Z) axis.
    pub fn to_light_source(&self, world: Mat4) -> LightSource {
        let shadow = self
            .shadows
            .enabled
            .then(|| LightShadow {
                render_target: self.shadows.render_target.clone(),
                layer_mask: self.shadows.layer_mask,
            });
        LightSource {
            ty: self.ty,
            position: world.w_axis.truncate(),
            direction: world.transform_vector3(Vec3::NEG_Z).normalize_or_zero(),
            color: self.color,
            ambient: self.ambient,
            attenuation: self.attenuation,
            intensity: self.intensity,
            range: self.range,
            shadow,
        }
    }
}

// ============================================================================
// Model renderer
// ============================================================================

#[derive(Clone, Debug)]
pub struct ModelRendererComponent {
    pub model: Arc<Model>,
    pub casts_shadows: bool,
}

impl ModelRendererComponent {
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            casts_shadows: true,
        }
    }

    pub fn without_shadows(mut self) -> Self {
        self.casts_shadows = false;
        self
    }

    /// Draw options for an entity on `layer` lit by `lights`
    pub(crate) fn render_options(&self, entity_id: i32, layer: LayerMask, lights: &[LightSource]) -> RenderOptions {
        let shadow_mask = if self.casts_shadows { shadow_mask_for(layer, lights) } else { 0 };
        RenderOptions::default()
            .with_entity_id(entity_id)
            .with_shadow_mask(shadow_mask)
    }
}

/// Bit `i` set when a model on `layer` casts a shadow from `lights[i]`
///
/// A light's shadow takes casters from the layers in its shadow mask. Only
/// the first 64 lights have a bit.
pub fn shadow_mask_for(layer: LayerMask, lights: &[LightSource]) -> u64 {
    lights
        .iter()
        .take(64)
        .enumerate()
        .filter(|(_, light)| light.shadow.as_ref().is_some_and(|s| s.layer_mask.intersects(layer)))
        .fold(0u64, |mask, (index, _)| mask | 1u64 << index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_render::prelude::ShaderLibrary;
    use forge_render::{AssetManager, HeadlessDevice, RendererConfig};

    #[test]
    fn test_light_source_from_world_matrix() {
        let light = LightComponent::spot(Vec3::ONE).with_range(25.0);
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)) * Mat4::from_rotation_x(-core::f32::consts::FRAC_PI_2);
        let source = light.to_light_source(world);

        assert_eq!(source.ty, LightType::Spot);
        assert!(source.position.abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-5));
        assert!(source.direction.abs_diff_eq(Vec3::NEG_Y, 1e-5));
        assert_eq!(source.ambient, DEFAULT_LIGHT_AMBIENT);
        assert_eq!(source.range, 25.0);
        assert!(source.shadow.is_none());
    }

    #[test]
    fn test_camera_aspect_follows_target() {
        let camera = CameraComponent::new(Frustum::perspective(1.0, 1.0, 0.1, 10.0));
        let target = Framebuffer::default_target(200, 100);
        let data = camera.camera_data(Mat4::IDENTITY, &target);
        assert!(matches!(data.frustum, Frustum::Perspective { aspect, .. } if aspect == 2.0));
    }

    #[test]
    fn test_render_options_follow_shadow_flag_and_layers() {
        let target = Framebuffer::default_target(8, 8);
        let lights = [
            LightSource::directional(Vec3::NEG_Y, Vec3::ONE).with_shadow(target.clone(), LayerMask::layer(1)),
            LightSource::point(Vec3::Y, Vec3::ONE),
            LightSource::point(Vec3::X, Vec3::ONE).with_shadow(target, LayerMask::ALL),
        ];
        let model = Arc::new(Model::default());

        let options = ModelRendererComponent::new(model.clone()).render_options(3, LayerMask::layer(1), &lights);
        assert_eq!(options.entity_id, 3);
        assert_eq!(options.shadow_mask, 0b101);
        let options = ModelRendererComponent::new(model.clone()).render_options(3, LayerMask::layer(2), &lights);
        assert_eq!(options.shadow_mask, 0b100);
        let options = ModelRendererComponent::new(model)
            .without_shadows()
            .render_options(3, LayerMask::ALL, &lights);
        assert_eq!(options.shadow_mask, 0);
    }

    #[test]
    fn test_shadow_toggle_releases_target() {
        let mut device = HeadlessDevice::new();
        let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
        assets.init(&mut device).unwrap();
        let renderer = Renderer3D::new(&mut assets, &mut device, RendererConfig::default()).unwrap();
        let framebuffers = device.live_framebuffer_count();

        let mut light = LightComponent::point(Vec3::ONE);
        light.enable_shadows(&renderer, &mut device).unwrap();
        assert!(light.shadows().render_target().unwrap().is_cubemap());
        assert_eq!(device.live_framebuffer_count(), framebuffers + 1);

        light.disable_shadows(&mut device);
        assert!(light.shadows().render_target().is_none());
        assert!(!light.shadows().is_enabled());
        assert_eq!(device.live_framebuffer_count(), framebuffers);
        assert!(light.to_light_source(Mat4::IDENTITY).shadow.is_none());
    }
}
