//! Materials: a shader per render pass plus shared uniform values
//!
//! A single `#shader` source becomes a family of programs by recompiling it
//! with extra defines: the plain variant for unshadowed scenes, `SHADOW_MAP`
//! for scenes with shadow passes, and `SHADOW_FORMATION` for rendering into
//! a shadow map. Point-shadow and pick programs are engine defaults.
//!
//! Materials are shared through `Arc`. Uniform edits through
//! [`Material::uniforms_mut`] are seen by every model using the material;
//! call [`Material::duplicate`] for per-instance values.

use std::path::Path;
use std::sync::Arc;

use forge_shader::{ShaderDefine, ShaderSource, SHADOW_FORMATION_DEFINE, SHADOW_MAP_DEFINE};
use glam::Vec4;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::asset::AssetManager;
use crate::context::RendererContext;
use crate::device::{CullFace, GraphicsDevice, PolygonMode};
use crate::error::Result;
use crate::shader::Shader;
use crate::uniform::UniformContext;

/// Which program of a material a draw uses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderPass {
    ShadowFormation,
    PointShadowFormation,
    WithShadow,
    WithoutShadow,
    Pick,
}

impl RenderPass {
    pub const COUNT: usize = 5;

    pub const ALL: [RenderPass; Self::COUNT] = [
        RenderPass::ShadowFormation,
        RenderPass::PointShadowFormation,
        RenderPass::WithShadow,
        RenderPass::WithoutShadow,
        RenderPass::Pick,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn is_shadow_formation(self) -> bool {
        matches!(self, RenderPass::ShadowFormation | RenderPass::PointShadowFormation)
    }
}

/// Fixed-function state applied before a material's draws
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderSettings {
    pub polygon_mode: PolygonMode,
    pub culling: CullFace,
}

impl RenderSettings {
    /// Shadow passes cull front faces to reduce acne, unless culling is off
    pub fn for_shadow_pass(self) -> Self {
        Self {
            culling: match self.culling {
                CullFace::None => CullFace::None,
                _ => CullFace::Front,
            },
            ..self
        }
    }
}

pub struct Material {
    shaders: [Option<Arc<Shader>>; RenderPass::COUNT],
    uniforms: RwLock<UniformContext>,
    settings: RwLock<RenderSettings>,
}

impl Material {
    /// Material drawn with `shader` in unshadowed scenes and `shadow_shader`
    /// (falling back to `shader`) in shadowed ones. Uniform slots come from
    /// the union of both interfaces.
    pub fn new(shader: Arc<Shader>, shadow_shader: Option<Arc<Shader>>) -> Self {
        let mut uniforms = UniformContext::from_interface(shader.interface());
        if let Some(shadow) = &shadow_shader {
            uniforms.add_from_interface(shadow.interface());
        }
        let mut shaders: [Option<Arc<Shader>>; RenderPass::COUNT] = Default::default();
        shaders[RenderPass::WithShadow.index()] = Some(shadow_shader.unwrap_or_else(|| shader.clone()));
        shaders[RenderPass::WithoutShadow.index()] = Some(shader);

        Self {
            shaders,
            uniforms: RwLock::new(uniforms),
            settings: RwLock::new(RenderSettings::default()),
        }
    }

    /// Set or replace the program for one pass
    pub fn with_shader(mut self, pass: RenderPass, shader: Arc<Shader>) -> Self {
        self.uniforms.get_mut().add_from_interface(shader.interface());
        self.shaders[pass.index()] = Some(shader);
        self
    }

    pub fn with_settings(self, settings: RenderSettings) -> Self {
        *self.settings.write() = settings;
        self
    }

    /// Compile a full pass family from one `#shader` source
    pub fn from_source(
        assets: &mut AssetManager,
        device: &mut dyn GraphicsDevice,
        name: &str,
        source: &ShaderSource,
        defines: &[ShaderDefine],
    ) -> Result<Self> {
        let plain = assets.load_shader(device, name, source, defines)?;
        let shadowed = assets.load_shader(device, name, source, &with_define(defines, SHADOW_MAP_DEFINE))?;
        let formation = assets.load_shader(device, name, source, &with_define(defines, SHADOW_FORMATION_DEFINE))?;

        Ok(Self::new(plain, Some(shadowed))
            .with_shader(RenderPass::ShadowFormation, formation)
            .with_shader(RenderPass::PointShadowFormation, assets.point_shadow_shader()?)
            .with_shader(RenderPass::Pick, assets.pick_shader()?))
    }

    pub fn from_text(
        assets: &mut AssetManager,
        device: &mut dyn GraphicsDevice,
        name: &str,
        text: &str,
        defines: &[ShaderDefine],
    ) -> Result<Self> {
        let source = ShaderSource::parse(name, text)?;
        Self::from_source(assets, device, name, &source, defines)
    }

    pub fn from_file(
        assets: &mut AssetManager,
        device: &mut dyn GraphicsDevice,
        path: impl AsRef<Path>,
        defines: &[ShaderDefine],
    ) -> Result<Self> {
        let path = path.as_ref();
        let source = ShaderSource::from_file(path)?;
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unnamed");
        Self::from_source(assets, device, name, &source, defines)
    }

    /// Flat-colored material from the engine's color program
    pub fn default_color(assets: &AssetManager, color: Vec4) -> Result<Self> {
        let material = Self::new(assets.color_shader()?, None)
            .with_shader(RenderPass::ShadowFormation, assets.shadow_shader()?)
            .with_shader(RenderPass::PointShadowFormation, assets.point_shadow_shader()?)
            .with_shader(RenderPass::Pick, assets.pick_shader()?);
        material.uniforms_mut().set("Color", color);
        Ok(material)
    }

    pub fn shader(&self, pass: RenderPass) -> Option<&Arc<Shader>> {
        self.shaders[pass.index()].as_ref()
    }

    pub fn shaders(&self) -> impl Iterator<Item = (RenderPass, &Arc<Shader>)> {
        RenderPass::ALL
            .into_iter()
            .filter_map(|pass| self.shader(pass).map(|s| (pass, s)))
    }

    pub fn uniforms(&self) -> RwLockReadGuard<'_, UniformContext> {
        self.uniforms.read()
    }

    pub fn uniforms_mut(&self) -> RwLockWriteGuard<'_, UniformContext> {
        self.uniforms.write()
    }

    pub fn settings(&self) -> RenderSettings {
        *self.settings.read()
    }

    pub fn set_settings(&self, settings: RenderSettings) {
        *self.settings.write() = settings;
    }

    /// Upload this material's uniforms into the program for `pass`
    pub fn apply(&self, pass: RenderPass, device: &mut dyn GraphicsDevice, context: &mut RendererContext) {
        if let Some(shader) = self.shader(pass) {
            self.uniforms.read().apply(device, shader, context);
        }
    }

    /// Independent copy sharing programs but not uniform values
    pub fn duplicate(&self) -> Self {
        Self {
            shaders: self.shaders.clone(),
            uniforms: RwLock::new(self.uniforms.read().clone()),
            settings: RwLock::new(*self.settings.read()),
        }
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("shaders", &self.shaders().map(|(p, s)| (p, s.key())).collect::<Vec<_>>())
            .field("settings", &self.settings())
            .finish()
    }
}

fn with_define(defines: &[ShaderDefine], name: &str) -> Vec<ShaderDefine> {
    let mut defines = defines.to_vec();
    defines.push(ShaderDefine::new(name));
    defines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use forge_shader::ShaderLibrary;
    use glam::Vec3;

    const SOURCE: &str = "\
#shader vertex
uniform mat4 u_ProjViewMatrix;
uniform mat4 u_ModelMatrix;
void main() {}
#shader fragment
#include \"Lighting.h\"
#include \"Shadows.h\"
[\"Color\"]
uniform vec3 u_Tint;
void main() {}
";

    fn assets(device: &mut HeadlessDevice) -> AssetManager {
        let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
        assets.init(device).unwrap();
        assets
    }

    #[test]
    fn test_from_source_builds_pass_family() {
        let mut device = HeadlessDevice::new();
        let mut assets = assets(&mut device);
        let material = Material::from_text(&mut assets, &mut device, "tinted", SOURCE, &[]).unwrap();

        for pass in RenderPass::ALL {
            assert!(material.shader(pass).is_some(), "{:?} missing", pass);
        }
        let shadowed = material.shader(RenderPass::WithShadow).unwrap();
        let plain = material.shader(RenderPass::WithoutShadow).unwrap();
        assert!(shadowed.has_uniform("u_ShadowMaps"));
        assert!(!plain.has_uniform("u_ShadowMaps"));
        assert_ne!(shadowed.id(), plain.id());
        assert_eq!(material.shader(RenderPass::ShadowFormation).unwrap().compiled().variant.key(), "SHADOW_FORMATION");
    }

    #[test]
    fn test_shared_material_edit_is_visible() {
        let mut device = HeadlessDevice::new();
        let mut assets = assets(&mut device);
        let material = Arc::new(Material::from_text(&mut assets, &mut device, "tinted", SOURCE, &[]).unwrap());
        let other = material.clone();

        material.uniforms_mut().set("Color", Vec3::X);
        assert_eq!(other.uniforms().get::<Vec3>("Color"), Vec3::X);

        let copy = material.duplicate();
        copy.uniforms_mut().set("Color", Vec3::Y);
        assert_eq!(material.uniforms().get::<Vec3>("Color"), Vec3::X);
    }

    #[test]
    fn test_apply_uploads_declared_uniforms() {
        let mut device = HeadlessDevice::new();
        let mut assets = assets(&mut device);
        let material = Material::from_text(&mut assets, &mut device, "tinted", SOURCE, &[]).unwrap();
        material.uniforms_mut().set("Color", Vec3::new(0.2, 0.4, 0.6));

        let mut context = RendererContext::new();
        material.apply(RenderPass::WithoutShadow, &mut device, &mut context);

        let program = material.shader(RenderPass::WithoutShadow).unwrap().id();
        assert_eq!(
            device.uniform(program, "u_Tint"),
            Some(&crate::uniform::UniformValue::Float3(Vec3::new(0.2, 0.4, 0.6)))
        );
    }

    #[test]
    fn test_shadow_settings_flip_culling() {
        let settings = RenderSettings::default();
        assert_eq!(settings.for_shadow_pass().culling, CullFace::Front);
        let none = RenderSettings {
            culling: CullFace::None,
            ..settings
        };
        assert_eq!(none.for_shadow_pass().culling, CullFace::None);
    }

    #[test]
    fn test_default_color_material() {
        let mut device = HeadlessDevice::new();
        let assets = assets(&mut device);
        let material = Material::default_color(&assets, Vec4::new(1.0, 0.0, 0.0, 1.0)).unwrap();
        assert_eq!(material.uniforms().get::<Vec4>("Color"), Vec4::new(1.0, 0.0, 0.0, 1.0));
    }
}
