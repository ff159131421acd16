//! Per-frame render state and automatic uniform binding
//!
//! The [`RendererContext`] owns everything a draw needs besides its material:
//! camera matrices, the light list, clipping planes, shadow maps and the
//! texture-unit allocator. Shaders declare which of these they consume, and
//! [`RendererContext::shader_requirements`] turns that declaration into a
//! [`ShaderRequirements`] bitset once per program so later binds are O(1).
//!
//! ## Texture units
//!
//! | Units   | Use                                   |
//! |---------|---------------------------------------|
//! | 0..4    | Directional and spot shadow maps      |
//! | 4..8    | Point-light shadow cubemaps           |
//! | 8..32   | Allocated by [`RendererContext::bind_texture`] |

use std::collections::HashMap;
use std::sync::Arc;

use forge_shader::{ShaderInterface, MAX_CLIPPING_PLANES, MAX_LIGHT_COUNT, MAX_POINT_SHADOW_MAPS, MAX_SHADOW_MAPS};
use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::camera::CameraData;
use crate::device::{GraphicsDevice, ProgramId};
use crate::light::LightSource;
use crate::material::RenderSettings;
use crate::resource::Texture;
use crate::shader::Shader;
use crate::uniform::UniformValue;

/// Hardware texture units available to one draw
pub const MAX_TEXTURE_SLOTS: u32 = 32;
/// First unit of the directional shadow-map range
pub const SHADOW_MAP_SLOT: u32 = 0;
/// First unit of the point shadow-map range
pub const POINT_SHADOW_MAP_SLOT: u32 = SHADOW_MAP_SLOT + MAX_SHADOW_MAPS as u32;
/// First unit handed out by the allocator
pub const FIRST_FREE_TEXTURE_SLOT: u32 = POINT_SHADOW_MAP_SLOT + MAX_POINT_SHADOW_MAPS as u32;

// ============================================================================
// Automatic uniform names
// ============================================================================

pub const PROJECTION_MATRIX_UNIFORM: &str = "u_ProjectionMatrix";
pub const VIEW_MATRIX_UNIFORM: &str = "u_ViewMatrix";
pub const PROJ_VIEW_MATRIX_UNIFORM: &str = "u_ProjViewMatrix";
pub const MODEL_MATRIX_UNIFORM: &str = "u_ModelMatrix";
pub const CAMERA_POSITION_UNIFORM: &str = "u_CameraPosition";
pub const NEAR_PLANE_UNIFORM: &str = "u_NearPlane";
pub const FAR_PLANE_UNIFORM: &str = "u_FarPlane";
pub const TIME_UNIFORM: &str = "u_Time";
pub const LIGHT_SOURCES_UNIFORM: &str = "u_LightSources";
pub const USED_LIGHT_SOURCES_UNIFORM: &str = "u_UsedLightSources";
pub const CLIPPING_PLANES_UNIFORM: &str = "u_ClippingPlanes";
pub const USED_CLIPPING_PLANES_UNIFORM: &str = "u_UsedClippingPlanes";
pub const JOINT_TRANSFORMS_UNIFORM: &str = "u_JointTransforms";
pub const ENTITY_ID_UNIFORM: &str = "u_EntityId";
pub const SHADOW_MAPS_UNIFORM: &str = "u_ShadowMaps";
pub const LIGHT_SPACE_TRANSFORMS_UNIFORM: &str = "u_LightSpaceTransforms";
pub const USED_SHADOW_MAPS_UNIFORM: &str = "u_UsedShadowMaps";
pub const POINT_SHADOW_MAPS_UNIFORM: &str = "u_PointShadowMaps";
pub const POINT_SHADOW_POSITIONS_UNIFORM: &str = "u_PointShadowPositions";
pub const POINT_SHADOW_FAR_PLANES_UNIFORM: &str = "u_PointShadowFarPlanes";
pub const USED_POINT_SHADOW_MAPS_UNIFORM: &str = "u_UsedPointShadowMaps";
pub const SHADOW_POINT_MATRICES_UNIFORM: &str = "u_ShadowPointMatrices";
pub const SHADOW_LIGHT_POSITION_UNIFORM: &str = "u_ShadowLightPosition";
pub const SHADOW_FAR_PLANE_UNIFORM: &str = "u_ShadowFarPlane";

/// Uniforms supplied by the engine rather than by materials
pub const AUTOMATIC_UNIFORMS: &[&str] = &[
    PROJECTION_MATRIX_UNIFORM,
    VIEW_MATRIX_UNIFORM,
    PROJ_VIEW_MATRIX_UNIFORM,
    MODEL_MATRIX_UNIFORM,
    CAMERA_POSITION_UNIFORM,
    NEAR_PLANE_UNIFORM,
    FAR_PLANE_UNIFORM,
    TIME_UNIFORM,
    LIGHT_SOURCES_UNIFORM,
    USED_LIGHT_SOURCES_UNIFORM,
    CLIPPING_PLANES_UNIFORM,
    USED_CLIPPING_PLANES_UNIFORM,
    JOINT_TRANSFORMS_UNIFORM,
    ENTITY_ID_UNIFORM,
    SHADOW_MAPS_UNIFORM,
    LIGHT_SPACE_TRANSFORMS_UNIFORM,
    USED_SHADOW_MAPS_UNIFORM,
    POINT_SHADOW_MAPS_UNIFORM,
    POINT_SHADOW_POSITIONS_UNIFORM,
    POINT_SHADOW_FAR_PLANES_UNIFORM,
    USED_POINT_SHADOW_MAPS_UNIFORM,
    SHADOW_POINT_MATRICES_UNIFORM,
    SHADOW_LIGHT_POSITION_UNIFORM,
    SHADOW_FAR_PLANE_UNIFORM,
];

/// Whether a uniform location belongs to the engine set
pub fn is_automatic_uniform(location: &str) -> bool {
    let base = location.split(['[', '.']).next().unwrap_or(location);
    AUTOMATIC_UNIFORMS.contains(&base)
}

// ============================================================================
// Shader requirements
// ============================================================================

/// Automatic uniforms a program declares
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderRequirements(u32);

impl ShaderRequirements {
    pub const NONE: Self = Self(0);
    pub const PROJECTION_MATRIX: Self = Self(1 << 0);
    pub const VIEW_MATRIX: Self = Self(1 << 1);
    pub const PROJ_VIEW_MATRIX: Self = Self(1 << 2);
    pub const MODEL_MATRIX: Self = Self(1 << 3);
    pub const CAMERA_POSITION: Self = Self(1 << 4);
    /// Both `u_NearPlane` and `u_FarPlane`
    pub const CAMERA_PLANES: Self = Self(1 << 5);
    pub const LIGHT_SOURCES: Self = Self(1 << 6);
    pub const CLIPPING_PLANES: Self = Self(1 << 7);
    pub const ANIMATION: Self = Self(1 << 8);
    pub const SHADOW_MAPS: Self = Self(1 << 9);
    pub const POINT_SHADOW_MAPS: Self = Self(1 << 10);
    pub const POINT_SHADOW_FORMATION: Self = Self(1 << 11);
    pub const TIME: Self = Self(1 << 12);
    pub const ENTITY_ID: Self = Self(1 << 13);

    /// Probe an interface. A requirement holds only when every uniform it
    /// uploads is declared.
    pub fn from_interface(interface: &ShaderInterface) -> Self {
        let has = |names: &[&str]| names.iter().all(|n| interface.contains(n));
        let mut requirements = Self::NONE;
        requirements.set(Self::PROJECTION_MATRIX, has(&[PROJECTION_MATRIX_UNIFORM]));
        requirements.set(Self::VIEW_MATRIX, has(&[VIEW_MATRIX_UNIFORM]));
        requirements.set(Self::PROJ_VIEW_MATRIX, has(&[PROJ_VIEW_MATRIX_UNIFORM]));
        requirements.set(Self::MODEL_MATRIX, has(&[MODEL_MATRIX_UNIFORM]));
        requirements.set(Self::CAMERA_POSITION, has(&[CAMERA_POSITION_UNIFORM]));
        requirements.set(Self::CAMERA_PLANES, has(&[NEAR_PLANE_UNIFORM, FAR_PLANE_UNIFORM]));
        requirements.set(
            Self::LIGHT_SOURCES,
            has(&[LIGHT_SOURCES_UNIFORM, USED_LIGHT_SOURCES_UNIFORM]),
        );
        requirements.set(
            Self::CLIPPING_PLANES,
            has(&[CLIPPING_PLANES_UNIFORM, USED_CLIPPING_PLANES_UNIFORM]),
        );
        requirements.set(Self::ANIMATION, has(&[JOINT_TRANSFORMS_UNIFORM]));
        requirements.set(
            Self::SHADOW_MAPS,
            has(&[SHADOW_MAPS_UNIFORM, LIGHT_SPACE_TRANSFORMS_UNIFORM, USED_SHADOW_MAPS_UNIFORM]),
        );
        requirements.set(
            Self::POINT_SHADOW_MAPS,
            has(&[
                POINT_SHADOW_MAPS_UNIFORM,
                POINT_SHADOW_POSITIONS_UNIFORM,
                POINT_SHADOW_FAR_PLANES_UNIFORM,
                USED_POINT_SHADOW_MAPS_UNIFORM,
            ]),
        );
        requirements.set(
            Self::POINT_SHADOW_FORMATION,
            has(&[
                SHADOW_POINT_MATRICES_UNIFORM,
                SHADOW_LIGHT_POSITION_UNIFORM,
                SHADOW_FAR_PLANE_UNIFORM,
            ]),
        );
        requirements.set(Self::TIME, has(&[TIME_UNIFORM]));
        requirements.set(Self::ENTITY_ID, has(&[ENTITY_ID_UNIFORM]));
        requirements
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl core::ops::BitOr for ShaderRequirements {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

// ============================================================================
// Shadow data
// ============================================================================

/// Output of one shadow pass, sampled by the main pass
#[derive(Clone, Debug)]
pub enum ShadowRenderData {
    /// Directional or spot light
    Directional {
        light_index: usize,
        shadow_map: Arc<Texture>,
        light_space: Mat4,
    },
    Point {
        light_index: usize,
        shadow_map: Arc<Texture>,
        position: Vec3,
        far_plane: f32,
    },
}

#[derive(Clone, Debug)]
struct PointShadowFormation {
    matrices: [Mat4; 6],
    position: Vec3,
    far_plane: f32,
}

// ============================================================================
// RendererContext
// ============================================================================

pub struct RendererContext {
    projection: Mat4,
    view: Mat4,
    proj_view: Mat4,
    camera_position: Vec3,
    near_plane: f32,
    far_plane: f32,
    time: f32,
    lights: Vec<LightSource>,
    clipping_planes: Vec<Vec4>,

    directional_shadows: Vec<(Arc<Texture>, Mat4)>,
    point_shadows: Vec<(Arc<Texture>, Vec3, f32)>,
    shadow_indices: HashMap<usize, i32>,
    point_shadow_formation: Option<PointShadowFormation>,

    next_texture_slot: u32,
    applied_settings: Option<RenderSettings>,
    bound_program: Option<ProgramId>,
    requirements: HashMap<ProgramId, ShaderRequirements>,
    probe_count: usize,
}

impl Default for RendererContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererContext {
    pub fn new() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj_view: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            near_plane: 0.1,
            far_plane: 1000.0,
            time: 0.0,
            lights: Vec::new(),
            clipping_planes: Vec::new(),
            directional_shadows: Vec::new(),
            point_shadows: Vec::new(),
            shadow_indices: HashMap::new(),
            point_shadow_formation: None,
            next_texture_slot: FIRST_FREE_TEXTURE_SLOT,
            applied_settings: None,
            bound_program: None,
            requirements: HashMap::new(),
            probe_count: 0,
        }
    }

    /// Start a new scene: drop lights and pass-scoped shadow data, and
    /// rewind the texture allocator past the reserved shadow units.
    pub fn reset(&mut self) {
        self.lights.clear();
        self.clear_shadow_data();
        self.point_shadow_formation = None;
        self.next_texture_slot = FIRST_FREE_TEXTURE_SLOT;
        self.bound_program = None;
    }

    /// Forget the bound program so the next bind uploads scene uniforms again
    pub fn new_scene(&mut self) {
        self.bound_program = None;
    }

    /// Each draw starts a fresh texture-unit epoch
    pub fn begin_draw(&mut self) {
        self.next_texture_slot = FIRST_FREE_TEXTURE_SLOT;
    }

    pub fn set_camera(&mut self, camera: &CameraData) {
        self.projection = camera.projection_matrix();
        self.view = camera.view_matrix;
        self.proj_view = self.projection * self.view;
        self.camera_position = camera.position();
        self.near_plane = camera.frustum.near();
        self.far_plane = camera.frustum.far();
        self.bound_program = None;
    }

    /// # Panics
    ///
    /// If more than `MAX_LIGHT_COUNT` lights are given.
    pub fn set_lights(&mut self, lights: &[LightSource]) {
        assert!(
            lights.len() <= MAX_LIGHT_COUNT,
            "{} light sources exceed the maximum of {}",
            lights.len(),
            MAX_LIGHT_COUNT
        );
        self.lights = lights.to_vec();
        self.bound_program = None;
    }

    pub fn add_light(&mut self, light: LightSource) {
        assert!(self.lights.len() < MAX_LIGHT_COUNT, "Too many light sources");
        self.lights.push(light);
        self.bound_program = None;
    }

    pub fn lights(&self) -> &[LightSource] {
        &self.lights
    }

    /// # Panics
    ///
    /// If more than `MAX_CLIPPING_PLANES` planes are given.
    pub fn set_clipping_planes(&mut self, planes: &[Vec4]) {
        assert!(planes.len() <= MAX_CLIPPING_PLANES, "Too many clipping planes");
        self.clipping_planes = planes.to_vec();
        self.bound_program = None;
    }

    pub fn set_time(&mut self, time: f32) {
        self.time = time;
        self.bound_program = None;
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn proj_view_matrix(&self) -> Mat4 {
        self.proj_view
    }

    pub fn camera_position(&self) -> Vec3 {
        self.camera_position
    }

    /// Bind a shadow map to its reserved unit. Returns `false` once the
    /// reserved range for its kind is full.
    pub fn add_shadow_data(&mut self, device: &mut dyn GraphicsDevice, data: ShadowRenderData) -> bool {
        self.bound_program = None;
        match data {
            ShadowRenderData::Directional {
                light_index,
                shadow_map,
                light_space,
            } => {
                let index = self.directional_shadows.len();
                if index >= MAX_SHADOW_MAPS {
                    log::warn!("Dropping shadow map for light {}: {} already bound", light_index, index);
                    return false;
                }
                device.bind_texture(SHADOW_MAP_SLOT + index as u32, shadow_map.id());
                self.directional_shadows.push((shadow_map, light_space));
                self.shadow_indices.insert(light_index, index as i32);
            }
            ShadowRenderData::Point {
                light_index,
                shadow_map,
                position,
                far_plane,
            } => {
                let index = self.point_shadows.len();
                if index >= MAX_POINT_SHADOW_MAPS {
                    log::warn!("Dropping point shadow for light {}: {} already bound", light_index, index);
                    return false;
                }
                device.bind_texture(POINT_SHADOW_MAP_SLOT + index as u32, shadow_map.id());
                self.point_shadows.push((shadow_map, position, far_plane));
                self.shadow_indices.insert(light_index, index as i32);
            }
        }
        true
    }

    pub fn clear_shadow_data(&mut self) {
        self.directional_shadows.clear();
        self.point_shadows.clear();
        self.shadow_indices.clear();
        self.bound_program = None;
    }

    pub fn shadow_map_count(&self) -> usize {
        self.directional_shadows.len() + self.point_shadows.len()
    }

    /// Face matrices for the layered point-shadow pass
    pub fn set_point_shadow_matrices(&mut self, position: Vec3, far_plane: f32, matrices: [Mat4; 6]) {
        self.point_shadow_formation = Some(PointShadowFormation {
            matrices,
            position,
            far_plane,
        });
        self.bound_program = None;
    }

    pub fn clear_point_shadow_matrices(&mut self) {
        self.point_shadow_formation = None;
    }

    pub fn point_shadow_matrices(&self) -> Option<&[Mat4; 6]> {
        self.point_shadow_formation.as_ref().map(|f| &f.matrices)
    }

    /// Issue polygon-mode and culling changes that differ from the last
    /// applied settings
    pub fn apply_render_settings(&mut self, device: &mut dyn GraphicsDevice, settings: RenderSettings) {
        let previous = self.applied_settings;
        if previous.map(|s| s.polygon_mode) != Some(settings.polygon_mode) {
            device.set_polygon_mode(settings.polygon_mode);
        }
        if previous.map(|s| s.culling) != Some(settings.culling) {
            device.set_cull_face(settings.culling);
        }
        self.applied_settings = Some(settings);
    }

    pub fn shader_requirements(&mut self, shader: &Shader) -> ShaderRequirements {
        if let Some(requirements) = self.requirements.get(&shader.id()) {
            return *requirements;
        }
        self.probe_count += 1;
        let requirements = ShaderRequirements::from_interface(shader.interface());
        log::debug!(
            "Requirements for shader '{}' ({:?}): {:#06x}",
            shader.key(),
            shader.id(),
            requirements.bits()
        );
        self.requirements.insert(shader.id(), requirements);
        requirements
    }

    /// Number of interface probes performed so far
    pub fn probe_count(&self) -> usize {
        self.probe_count
    }

    /// Whether a requirement set is cached for `program`
    pub fn has_requirements(&self, program: ProgramId) -> bool {
        self.requirements.contains_key(&program)
    }

    /// Drop a cached requirement set for a destroyed program
    pub fn evict(&mut self, program: ProgramId) {
        self.requirements.remove(&program);
        if self.bound_program == Some(program) {
            self.bound_program = None;
        }
    }

    /// Make `shader` current and upload the automatic uniforms it requires.
    /// Scene uniforms are skipped when the program is already bound for the
    /// current scene state.
    pub fn bind_shader(
        &mut self,
        device: &mut dyn GraphicsDevice,
        shader: &Shader,
        requirements: ShaderRequirements,
    ) {
        if self.bound_program == Some(shader.id()) {
            return;
        }
        device.use_program(shader.id());
        self.bound_program = Some(shader.id());

        let mut set = |location: &str, value: UniformValue| shader.set_uniform(&mut *device, location, &value);

        if requirements.contains(ShaderRequirements::PROJECTION_MATRIX) {
            set(PROJECTION_MATRIX_UNIFORM, self.projection.into());
        }
        if requirements.contains(ShaderRequirements::VIEW_MATRIX) {
            set(VIEW_MATRIX_UNIFORM, self.view.into());
        }
        if requirements.contains(ShaderRequirements::PROJ_VIEW_MATRIX) {
            set(PROJ_VIEW_MATRIX_UNIFORM, self.proj_view.into());
        }
        if requirements.contains(ShaderRequirements::CAMERA_POSITION) {
            set(CAMERA_POSITION_UNIFORM, self.camera_position.into());
        }
        if requirements.contains(ShaderRequirements::CAMERA_PLANES) {
            set(NEAR_PLANE_UNIFORM, self.near_plane.into());
            set(FAR_PLANE_UNIFORM, self.far_plane.into());
        }
        if requirements.contains(ShaderRequirements::TIME) {
            set(TIME_UNIFORM, self.time.into());
        }
        if requirements.contains(ShaderRequirements::LIGHT_SOURCES) {
            set(USED_LIGHT_SOURCES_UNIFORM, (self.lights.len() as i32).into());
            for (i, light) in self.lights.iter().enumerate() {
                let base = format!("{}[{}]", LIGHT_SOURCES_UNIFORM, i);
                let shadow_index = self.shadow_indices.get(&i).copied().unwrap_or(-1);
                set(&format!("{}.Type", base), (light.ty as i32).into());
                set(&format!("{}.Position", base), light.position.into());
                set(&format!("{}.Direction", base), light.direction.into());
                set(&format!("{}.Attenuation", base), light.attenuation.into());
                set(&format!("{}.Color", base), light.color.into());
                set(&format!("{}.Ambient", base), light.ambient.into());
                set(&format!("{}.Intensity", base), light.intensity.into());
                set(&format!("{}.ShadowIndex", base), shadow_index.into());
            }
        }
        if requirements.contains(ShaderRequirements::CLIPPING_PLANES) {
            set(USED_CLIPPING_PLANES_UNIFORM, (self.clipping_planes.len() as i32).into());
            for (i, plane) in self.clipping_planes.iter().enumerate() {
                set(&format!("{}[{}]", CLIPPING_PLANES_UNIFORM, i), (*plane).into());
            }
        }
        if requirements.contains(ShaderRequirements::SHADOW_MAPS) {
            set(USED_SHADOW_MAPS_UNIFORM, (self.directional_shadows.len() as i32).into());
            for i in 0..MAX_SHADOW_MAPS {
                set(
                    &format!("{}[{}]", SHADOW_MAPS_UNIFORM, i),
                    ((SHADOW_MAP_SLOT + i as u32) as i32).into(),
                );
            }
            for (i, (_, light_space)) in self.directional_shadows.iter().enumerate() {
                set(&format!("{}[{}]", LIGHT_SPACE_TRANSFORMS_UNIFORM, i), (*light_space).into());
            }
        }
        if requirements.contains(ShaderRequirements::POINT_SHADOW_MAPS) {
            set(USED_POINT_SHADOW_MAPS_UNIFORM, (self.point_shadows.len() as i32).into());
            for i in 0..MAX_POINT_SHADOW_MAPS {
                set(
                    &format!("{}[{}]", POINT_SHADOW_MAPS_UNIFORM, i),
                    ((POINT_SHADOW_MAP_SLOT + i as u32) as i32).into(),
                );
            }
            for (i, (_, position, far_plane)) in self.point_shadows.iter().enumerate() {
                set(&format!("{}[{}]", POINT_SHADOW_POSITIONS_UNIFORM, i), (*position).into());
                set(&format!("{}[{}]", POINT_SHADOW_FAR_PLANES_UNIFORM, i), (*far_plane).into());
            }
        }
        if requirements.contains(ShaderRequirements::POINT_SHADOW_FORMATION) {
            if let Some(formation) = &self.point_shadow_formation {
                for (i, matrix) in formation.matrices.iter().enumerate() {
                    set(&format!("{}[{}]", SHADOW_POINT_MATRICES_UNIFORM, i), (*matrix).into());
                }
                set(SHADOW_LIGHT_POSITION_UNIFORM, formation.position.into());
                set(SHADOW_FAR_PLANE_UNIFORM, formation.far_plane.into());
            }
        }
    }

    /// Bind `texture` to the next free unit and return it
    ///
    /// # Panics
    ///
    /// When all `MAX_TEXTURE_SLOTS` units are taken.
    pub fn bind_texture(&mut self, device: &mut dyn GraphicsDevice, texture: &Texture) -> u32 {
        assert!(
            self.next_texture_slot < MAX_TEXTURE_SLOTS,
            "Too many textures bound ({} units)",
            MAX_TEXTURE_SLOTS
        );
        let slot = self.next_texture_slot;
        device.bind_texture(slot, texture.id());
        self.next_texture_slot += 1;
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CullFace, PolygonMode};
    use crate::headless::{DeviceCall, HeadlessDevice};
    use crate::resource::{TextureDesc, TextureFormat};
    use forge_shader::ShaderCompiler;

    const LIT: &str = "\
#shader vertex
uniform mat4 u_ProjViewMatrix;
uniform mat4 u_ModelMatrix;
void main() {}
#shader fragment
#include \"Lighting.h\"
uniform vec3 u_CameraPosition;
void main() {}
";

    fn shader(device: &mut HeadlessDevice, source: &str) -> Arc<Shader> {
        let compiled = ShaderCompiler::default().compile_str("test", source, &[]).unwrap();
        Shader::create(device, compiled).unwrap()
    }

    fn texture(device: &mut HeadlessDevice) -> Arc<Texture> {
        Texture::create(device, TextureDesc::new_2d("t", 1, 1, TextureFormat::Rgba8), None).unwrap()
    }

    #[test]
    fn test_automatic_names() {
        assert!(is_automatic_uniform("u_LightSources[3].Color"));
        assert!(is_automatic_uniform("u_ModelMatrix"));
        assert!(!is_automatic_uniform("u_Color"));
    }

    #[test]
    fn test_requirements_memoized() {
        let mut device = HeadlessDevice::new();
        let lit = shader(&mut device, LIT);
        let mut context = RendererContext::new();

        let first = context.shader_requirements(&lit);
        let second = context.shader_requirements(&lit);
        assert_eq!(first, second);
        assert_eq!(context.probe_count(), 1);

        assert!(first.contains(ShaderRequirements::PROJ_VIEW_MATRIX | ShaderRequirements::MODEL_MATRIX));
        assert!(first.contains(ShaderRequirements::LIGHT_SOURCES));
        assert!(first.contains(ShaderRequirements::CAMERA_POSITION));
        assert!(!first.contains(ShaderRequirements::SHADOW_MAPS));
        assert!(!first.contains(ShaderRequirements::VIEW_MATRIX));
    }

    #[test]
    fn test_texture_slots_increase_until_reset() {
        let mut device = HeadlessDevice::new();
        let tex = texture(&mut device);
        let mut context = RendererContext::new();

        let slots: Vec<u32> = (0..5).map(|_| context.bind_texture(&mut device, &tex)).collect();
        assert_eq!(slots, vec![8, 9, 10, 11, 12]);
        assert!(slots.windows(2).all(|w| w[0] < w[1]));

        context.reset();
        assert_eq!(context.bind_texture(&mut device, &tex), FIRST_FREE_TEXTURE_SLOT);
    }

    #[test]
    #[should_panic(expected = "Too many textures bound")]
    fn test_texture_slot_exhaustion_panics() {
        let mut device = HeadlessDevice::new();
        let tex = texture(&mut device);
        let mut context = RendererContext::new();
        for _ in FIRST_FREE_TEXTURE_SLOT..=MAX_TEXTURE_SLOTS {
            context.bind_texture(&mut device, &tex);
        }
    }

    #[test]
    fn test_render_settings_diffed() {
        let mut device = HeadlessDevice::new();
        let mut context = RendererContext::new();
        let settings = RenderSettings::default();

        context.apply_render_settings(&mut device, settings);
        context.apply_render_settings(&mut device, settings);
        context.apply_render_settings(
            &mut device,
            RenderSettings {
                polygon_mode: PolygonMode::Line,
                ..settings
            },
        );

        let modes = device.count(|c| matches!(c, DeviceCall::SetPolygonMode(_)));
        let culls = device.count(|c| matches!(c, DeviceCall::SetCullFace(_)));
        assert_eq!(modes, 2);
        assert_eq!(culls, 1);
        assert_eq!(device.cull_face(), CullFace::Back);
    }

    #[test]
    fn test_bind_shader_uploads_lights() {
        let mut device = HeadlessDevice::new();
        let lit = shader(&mut device, LIT);
        let mut context = RendererContext::new();
        context.set_lights(&[
            LightSource::point(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE),
            LightSource::directional(Vec3::NEG_Y, Vec3::X),
        ]);

        let requirements = context.shader_requirements(&lit);
        context.bind_shader(&mut device, &lit, requirements);

        assert_eq!(
            device.uniform(lit.id(), "u_UsedLightSources"),
            Some(&UniformValue::Int(2))
        );
        assert_eq!(
            device.uniform(lit.id(), "u_LightSources[0].Position"),
            Some(&UniformValue::Float3(Vec3::new(1.0, 2.0, 3.0)))
        );
        assert_eq!(
            device.uniform(lit.id(), "u_LightSources[1].Type"),
            Some(&UniformValue::Int(1))
        );
        assert_eq!(
            device.uniform(lit.id(), "u_LightSources[1].ShadowIndex"),
            Some(&UniformValue::Int(-1))
        );
        assert!(device.uniform_errors().is_empty(), "{:?}", device.uniform_errors());

        // Same program, same scene state: nothing re-uploaded
        let before = device.calls().len();
        context.bind_shader(&mut device, &lit, requirements);
        assert_eq!(device.calls().len(), before);

        context.new_scene();
        context.bind_shader(&mut device, &lit, requirements);
        assert!(device.calls().len() > before);
    }

    #[test]
    #[should_panic(expected = "exceed the maximum")]
    fn test_too_many_lights_panics() {
        let mut context = RendererContext::new();
        let lights = vec![LightSource::default(); MAX_LIGHT_COUNT + 1];
        context.set_lights(&lights);
    }

    #[test]
    fn test_shadow_maps_use_reserved_slots() {
        let mut device = HeadlessDevice::new();
        let tex = texture(&mut device);
        let mut context = RendererContext::new();

        for i in 0..MAX_SHADOW_MAPS + 1 {
            let added = context.add_shadow_data(
                &mut device,
                ShadowRenderData::Directional {
                    light_index: i,
                    shadow_map: tex.clone(),
                    light_space: Mat4::IDENTITY,
                },
            );
            assert_eq!(added, i < MAX_SHADOW_MAPS);
        }
        assert!(context.add_shadow_data(
            &mut device,
            ShadowRenderData::Point {
                light_index: 9,
                shadow_map: tex.clone(),
                position: Vec3::ZERO,
                far_plane: 25.0,
            },
        ));

        assert!(device.calls().contains(&DeviceCall::BindTexture {
            slot: POINT_SHADOW_MAP_SLOT,
            texture: tex.id(),
        }));
        assert_eq!(context.shadow_map_count(), MAX_SHADOW_MAPS + 1);
        // Allocator untouched by reserved units
        assert_eq!(context.bind_texture(&mut device, &tex), FIRST_FREE_TEXTURE_SLOT);

        context.reset();
        assert_eq!(context.shadow_map_count(), 0);
    }
}
