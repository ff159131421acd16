//! Multi-pass scene renderer
//!
//! Every camera goes through the same phases, in order:
//!
//! ```text
//! Setup -> ShadowPasses -> MainPass -> PostProcess -> Done
//! ```
//!
//! - **ShadowPasses** render each shadow-casting light visible to the
//!   camera's layers into its depth target. Point lights render a cubemap in
//!   one layered draw per mesh.
//! - **MainPass** draws every queued submodel with its material's
//!   `WithShadow` program if any shadow pass ran, `WithoutShadow` otherwise.
//! - **PostProcess** chains the enabled post-processing stages into the
//!   camera's target.
//!
//! A camera's destination is cleared at most once per frame, however many
//! cameras draw into it, whether directly or through the last
//! post-processing stage. Post-processing inputs are scratch and are fully
//! cleared by every camera that renders into them. [`Renderer3D::flush`]
//! ends the frame.
//!
//! # Example
//!
//! ```ignore
//! renderer.begin_scene(&target, &camera, &lights);
//! renderer.render_model(&model, transform, RenderOptions::default());
//! renderer.end_scene(&mut device)?;
//! let stats = renderer.flush();
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::asset::AssetManager;
use crate::camera::{CameraData, CameraMode, Frustum};
use crate::config::RendererConfig;
use crate::context::{RendererContext, ShaderRequirements, ShadowRenderData, ENTITY_ID_UNIFORM, MODEL_MATRIX_UNIFORM};
use crate::device::{ClearMode, FramebufferId, GraphicsDevice, Viewport};
use crate::error::{RenderError, Result};
use crate::light::{LightSource, LightType};
use crate::material::{Material, RenderPass};
use crate::mesh::Mesh;
use crate::model::Model;
use crate::picking::NO_ENTITY;
use crate::post::PostProcessor;
use crate::resource::{Framebuffer, FramebufferDesc};
use crate::stats::RenderStats;
use crate::uniform::UniformValue;

/// Near plane of every shadow projection
pub const SHADOW_NEAR_PLANE: f32 = 0.1;
/// Half extent of the directional shadow volume
pub const DIRECTIONAL_SHADOW_EXTENT: f32 = 10.0;

/// Look direction and up vector of each cubemap face, in layer order
const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// View-projection per cube face for a point light at `position`
pub fn point_shadow_matrices(position: Vec3, far_plane: f32) -> [Mat4; 6] {
    let projection = Mat4::perspective_rh_gl(90f32.to_radians(), 1.0, SHADOW_NEAR_PLANE, far_plane);
    CUBE_FACES.map(|(direction, up)| projection * Mat4::look_at_rh(position, position + direction, up))
}

/// View and projection a directional or spot light renders its shadow with
pub fn light_space_camera(light: &LightSource) -> CameraData {
    match light.ty {
        LightType::Spot => {
            let direction = light.direction.normalize_or_zero();
            let view = Mat4::look_at_rh(light.position, light.position + direction, up_for(direction));
            CameraData::new(
                view,
                Frustum::perspective(90f32.to_radians(), 1.0, SHADOW_NEAR_PLANE, light.range),
            )
        }
        _ => {
            // Directional shadows cover a fixed volume around the origin
            let eye = if light.position == Vec3::ZERO {
                -light.direction.normalize_or_zero() * DIRECTIONAL_SHADOW_EXTENT
            } else {
                light.position
            };
            let view = Mat4::look_at_rh(eye, Vec3::ZERO, up_for(-eye));
            let e = DIRECTIONAL_SHADOW_EXTENT;
            CameraData::new(view, Frustum::orthographic(-e, e, -e, e, SHADOW_NEAR_PLANE, light.range))
        }
    }
}

/// `Y` unless looking straight along it
fn up_for(direction: Vec3) -> Vec3 {
    if direction.normalize_or_zero().dot(Vec3::Y).abs() > 0.999 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

// ============================================================================
// Scene state
// ============================================================================

/// Per-model draw options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderOptions {
    /// Written to `u_EntityId` in pick passes
    pub entity_id: i32,
    /// Bit `i` set: the model casts shadows from light `i`
    pub shadow_mask: u64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            entity_id: NO_ENTITY,
            shadow_mask: u64::MAX,
        }
    }
}

impl RenderOptions {
    pub fn with_entity_id(mut self, entity_id: i32) -> Self {
        self.entity_id = entity_id;
        self
    }

    pub fn with_shadow_mask(mut self, shadow_mask: u64) -> Self {
        self.shadow_mask = shadow_mask;
        self
    }

    fn casts_shadow_from(&self, light_index: usize) -> bool {
        light_index < 64 && self.shadow_mask & (1 << light_index) != 0
    }
}

/// Where the current camera is in its pass sequence
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScenePhase {
    #[default]
    Idle,
    Setup,
    ShadowPasses,
    MainPass,
    PostProcess,
    Done,
}

struct QueuedDraw {
    mesh: Arc<Mesh>,
    material: Arc<Material>,
    transform: Mat4,
    options: RenderOptions,
}

struct Scene {
    target: Arc<Framebuffer>,
    camera: CameraData,
    lights: Vec<LightSource>,
    draws: Vec<QueuedDraw>,
    pick: bool,
}

// ============================================================================
// Renderer3D
// ============================================================================

pub struct Renderer3D {
    config: RendererConfig,
    context: RendererContext,
    post_processor: PostProcessor,
    cleared: HashSet<FramebufferId>,
    stats: RenderStats,
    scene: Option<Scene>,
    phase: ScenePhase,
}

impl Renderer3D {
    /// Requires an initialized asset manager for the post-processing shaders
    pub fn new(assets: &mut AssetManager, device: &mut dyn GraphicsDevice, config: RendererConfig) -> Result<Self> {
        let post_processor = PostProcessor::new(assets, device, &config.post_processing)?;
        log::info!(
            "Renderer initialized (shadow maps {}px, post-processing {})",
            config.shadow_map_size,
            if config.post_processing.enabled { "on" } else { "off" }
        );
        Ok(Self {
            config,
            context: RendererContext::new(),
            post_processor,
            cleared: HashSet::new(),
            stats: RenderStats::default(),
            scene: None,
            phase: ScenePhase::Idle,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn context(&self) -> &RendererContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RendererContext {
        &mut self.context
    }

    pub fn post_processor(&self) -> &PostProcessor {
        &self.post_processor
    }

    pub fn post_processor_mut(&mut self) -> &mut PostProcessor {
        &mut self.post_processor
    }

    pub fn phase(&self) -> ScenePhase {
        self.phase
    }

    /// Counters of the frame in progress
    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    pub fn set_time(&mut self, time: f32) {
        self.context.set_time(time);
    }

    /// Depth target sized for a light of type `ty`: a cubemap for point
    /// lights, a 2D map otherwise
    pub fn create_shadow_target(&self, device: &mut dyn GraphicsDevice, ty: LightType) -> Result<Arc<Framebuffer>> {
        let size = self.config.shadow_map_size;
        let desc = match ty {
            LightType::Point => FramebufferDesc::point_shadow(size),
            LightType::Directional | LightType::Spot => FramebufferDesc::directional_shadow(size),
        };
        Framebuffer::create(device, desc)
    }

    fn enter(&mut self, phase: ScenePhase) {
        debug_assert!(phase > self.phase || phase == ScenePhase::Setup, "{:?} after {:?}", phase, self.phase);
        self.phase = phase;
    }

    pub fn begin_scene(&mut self, target: &Arc<Framebuffer>, camera: &CameraData, lights: &[LightSource]) {
        self.begin(target, camera, lights, false);
    }

    /// Scene rendered with each material's `Pick` program into an integer
    /// target. Lights and shadows are ignored.
    pub fn begin_pick_scene(&mut self, target: &Arc<Framebuffer>, camera: &CameraData) {
        self.begin(target, camera, &[], true);
    }

    fn begin(&mut self, target: &Arc<Framebuffer>, camera: &CameraData, lights: &[LightSource], pick: bool) {
        if self.scene.is_some() {
            log::warn!("begin_scene called twice; dropping the queued scene");
        }
        self.scene = Some(Scene {
            target: target.clone(),
            camera: camera.clone(),
            lights: lights.to_vec(),
            draws: Vec::new(),
            pick,
        });
        self.enter(ScenePhase::Setup);
    }

    /// Queue every submodel of `model` under `transform`
    ///
    /// # Panics
    ///
    /// Outside `begin_scene`/`end_scene`.
    pub fn render_model(&mut self, model: &Model, transform: Mat4, options: RenderOptions) {
        let Some(scene) = self.scene.as_mut() else {
            panic!("render_model called outside begin_scene/end_scene");
        };
        scene.draws.extend(model.sub_models.iter().map(|sub| QueuedDraw {
            mesh: sub.mesh.clone(),
            material: sub.material.clone(),
            transform: transform * sub.transform,
            options,
        }));
    }

    /// Render the queued scene
    ///
    /// # Panics
    ///
    /// Without a preceding `begin_scene`.
    pub fn end_scene(&mut self, device: &mut dyn GraphicsDevice) -> Result<()> {
        let Some(scene) = self.scene.take() else {
            panic!("end_scene called without begin_scene");
        };
        self.context.reset();
        self.context.new_scene();

        self.enter(ScenePhase::ShadowPasses);
        let mut shadowed = false;
        if !scene.pick {
            for (index, light) in scene.lights.iter().enumerate() {
                if !light.casts_shadows_for(scene.camera.layer_mask) {
                    continue;
                }
                let Some(target) = light.shadow_target() else {
                    continue;
                };
                let data = self.render_shadow(device, index, light, target, &scene.draws)?;
                shadowed |= self.context.add_shadow_data(device, data);
            }
        }

        let post = !scene.pick && scene.camera.use_post_processing && self.post_processor.is_active();
        let destination_clear = self.destination_clear(scene.target.id(), scene.camera.mode);
        let (main_target, main_clear) = if post {
            self.post_processor
                .prepare(device, scene.target.width(), scene.target.height(), true)?;
            self.post_processor.set_destination(scene.target.clone());
            self.post_processor.set_destination_clear(destination_clear);
            let input = self.post_processor.first_input().cloned().ok_or_else(|| {
                RenderError::PostProcessorNotPrepared("first stage has no input framebuffer".into())
            })?;
            // Stage inputs are scratch shared by every camera
            (input, ClearMode::Full)
        } else {
            (scene.target.clone(), destination_clear)
        };

        self.enter(ScenePhase::MainPass);
        self.setup_main(device, &scene, &main_target, main_clear);
        let pass = if scene.pick {
            RenderPass::Pick
        } else if shadowed {
            RenderPass::WithShadow
        } else {
            RenderPass::WithoutShadow
        };
        for draw in &scene.draws {
            self.draw(device, pass, draw);
        }

        self.enter(ScenePhase::PostProcess);
        if post {
            let stages = self.post_processor.render(device, &mut self.context)?;
            self.stats.post_process_stages += stages as u32;
        }

        self.enter(ScenePhase::Done);
        self.stats.scene_count += 1;
        Ok(())
    }

    /// End the frame: forget which targets were cleared and hand back the
    /// frame's counters
    pub fn flush(&mut self) -> RenderStats {
        self.cleared.clear();
        self.phase = ScenePhase::Idle;
        std::mem::take(&mut self.stats)
    }

    /// Destroy the shader programs no material holds any more and drop the
    /// state cached for them. Returns how many programs were destroyed.
    pub fn collect_unused_shaders(&mut self, assets: &mut AssetManager, device: &mut dyn GraphicsDevice) -> usize {
        let collected = assets.collect_unused(device);
        for program in &collected {
            self.context.evict(*program);
        }
        if !collected.is_empty() {
            log::debug!("Collected {} unused shader programs", collected.len());
        }
        collected.len()
    }

    /// Release post-processing framebuffers
    pub fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        self.post_processor.destroy(device);
    }

    /// Clear owed to a camera's destination: full on its first use this
    /// frame, depth only for later overlays, nothing otherwise
    fn destination_clear(&mut self, target: FramebufferId, mode: CameraMode) -> ClearMode {
        if self.cleared.insert(target) {
            self.stats.clear_count += 1;
            ClearMode::Full
        } else if mode == CameraMode::Overlay {
            ClearMode::DepthOnly
        } else {
            ClearMode::Keep
        }
    }

    fn setup_main(&mut self, device: &mut dyn GraphicsDevice, scene: &Scene, target: &Framebuffer, clear: ClearMode) {
        let camera = &scene.camera;
        device.bind_framebuffer(target.id());
        let viewport = if camera.viewport.width == 0 || camera.viewport.height == 0 {
            Viewport::full(target.width(), target.height())
        } else {
            camera.viewport
        };
        device.set_viewport(viewport);
        device.set_clear_color(camera.clear_color.to_array());
        clear.apply(device);

        device.enable_clipping_planes(camera.clipping_planes.len());
        self.context.set_camera(camera);
        self.context.set_clipping_planes(&camera.clipping_planes);
        self.context.set_lights(&scene.lights);
    }

    fn render_shadow(
        &mut self,
        device: &mut dyn GraphicsDevice,
        light_index: usize,
        light: &LightSource,
        target: &Arc<Framebuffer>,
        draws: &[QueuedDraw],
    ) -> Result<ShadowRenderData> {
        let shadow_map = target
            .depth_attachment()
            .cloned()
            .ok_or_else(|| RenderError::InvalidResource(format!("shadow target {:?} has no depth", target.id())))?;

        device.bind_framebuffer(target.id());
        device.set_viewport(Viewport::full(target.width(), target.height()));
        device.clear_depth();
        device.enable_clipping_planes(0);
        self.context.set_clipping_planes(&[]);

        let (pass, data) = match light.ty {
            LightType::Point => {
                let matrices = point_shadow_matrices(light.position, light.range);
                self.context
                    .set_point_shadow_matrices(light.position, light.range, matrices);
                (
                    RenderPass::PointShadowFormation,
                    ShadowRenderData::Point {
                        light_index,
                        shadow_map,
                        position: light.position,
                        far_plane: light.range,
                    },
                )
            }
            LightType::Directional | LightType::Spot => {
                let camera = light_space_camera(light);
                self.context.set_camera(&camera);
                (
                    RenderPass::ShadowFormation,
                    ShadowRenderData::Directional {
                        light_index,
                        shadow_map,
                        light_space: camera.projection_matrix() * camera.view_matrix,
                    },
                )
            }
        };

        for draw in draws.iter().filter(|d| d.options.casts_shadow_from(light_index)) {
            self.draw(device, pass, draw);
        }
        self.context.clear_point_shadow_matrices();
        self.stats.shadow_passes += 1;
        log::trace!("Shadow pass for light {} ({:?})", light_index, light.ty);
        Ok(data)
    }

    fn draw(&mut self, device: &mut dyn GraphicsDevice, pass: RenderPass, draw: &QueuedDraw) {
        let Some(shader) = draw.material.shader(pass) else {
            log::warn!("Material {:?} has no {:?} program; skipping draw", draw.material, pass);
            self.stats.skipped_draws += 1;
            return;
        };

        let settings = if pass.is_shadow_formation() {
            draw.material.settings().for_shadow_pass()
        } else {
            draw.material.settings()
        };
        self.context.apply_render_settings(device, settings);
        self.context.begin_draw();

        let requirements = self.context.shader_requirements(shader);
        self.context.bind_shader(device, shader, requirements);
        if requirements.contains(ShaderRequirements::MODEL_MATRIX) {
            shader.set_uniform(device, MODEL_MATRIX_UNIFORM, &UniformValue::Mat4(draw.transform));
        }
        if requirements.contains(ShaderRequirements::ENTITY_ID) {
            shader.set_uniform(device, ENTITY_ID_UNIFORM, &UniformValue::Int(draw.options.entity_id));
        }
        draw.material.apply(pass, device, &mut self.context);
        draw.mesh.apply(device, shader, requirements);

        device.draw_indexed(draw.mesh.id(), draw.mesh.draw_mode(), draw.mesh.index_count());
        self.stats.draw_count += 1;
    }
}

impl std::fmt::Debug for Renderer3D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer3D")
            .field("phase", &self.phase)
            .field("cleared", &self.cleared.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_faces_look_outward() {
        let matrices = point_shadow_matrices(Vec3::ZERO, 25.0);
        for (matrix, (direction, _)) in matrices.iter().zip(CUBE_FACES) {
            let clip = *matrix * (direction * 5.0).extend(1.0);
            let ndc = clip.truncate() / clip.w;
            assert!(clip.w > 0.0);
            assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "{:?}", ndc);
        }
    }

    #[test]
    fn test_directional_light_space_sees_origin() {
        let light = LightSource::directional(Vec3::new(-1.0, -1.0, 0.0), Vec3::ONE);
        let camera = light_space_camera(&light);
        let clip = camera.projection_matrix() * camera.view_matrix * glam::Vec4::W;
        assert!(clip.x.abs() < 1e-4 && clip.y.abs() < 1e-4);
        assert!(clip.z.abs() <= 1.0);
    }

    #[test]
    fn test_straight_down_light_has_valid_view() {
        let light = LightSource::directional(Vec3::NEG_Y, Vec3::ONE);
        let camera = light_space_camera(&light);
        assert!(camera.view_matrix.is_finite());
    }

    #[test]
    fn test_shadow_mask_bits() {
        let options = RenderOptions::default().with_shadow_mask(0b10);
        assert!(!options.casts_shadow_from(0));
        assert!(options.casts_shadow_from(1));
        assert!(!options.casts_shadow_from(64));
    }
}
