//! Shader cache and engine default assets
//!
//! The [`AssetManager`] is created by the host and passed to whoever loads
//! materials. It has an explicit lifecycle:
//!
//! ```ignore
//! let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
//! assets.init(&mut device)?;          // defaults compiled, cache usable
//! let material = Material::from_file(&mut assets, &mut device, "Lit.glsl", &[])?;
//! assets.shutdown(&mut device);       // defaults and cached programs destroyed
//! ```
//!
//! Loaded shaders are cached weakly by name, source hash and defines: the
//! cache never keeps a program alive, it only lets concurrent users share
//! one. Two sources loaded under the same name get separate programs.
//! [`AssetManager::collect_unused`] destroys programs whose last user is gone.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use forge_shader::{ShaderCompiler, ShaderDefine, ShaderLibrary, ShaderSource, ShaderVariant};

use crate::builtin;
use crate::device::{GraphicsDevice, ProgramId};
use crate::error::{RenderError, Result};
use crate::mesh::Mesh;
use crate::shader::Shader;

struct CacheEntry {
    program: ProgramId,
    shader: Weak<Shader>,
}

struct DefaultAssets {
    color_shader: Arc<Shader>,
    shadow_shader: Arc<Shader>,
    point_shadow_shader: Arc<Shader>,
    pick_shader: Arc<Shader>,
    quad_mesh: Arc<Mesh>,
    cube_mesh: Arc<Mesh>,
}

pub struct AssetManager {
    compiler: ShaderCompiler,
    shaders: HashMap<String, CacheEntry>,
    defaults: Option<DefaultAssets>,
}

impl AssetManager {
    pub fn new(library: ShaderLibrary) -> Self {
        Self {
            compiler: ShaderCompiler::new(library),
            shaders: HashMap::new(),
            defaults: None,
        }
    }

    /// Compile engine defaults. Calling `init` twice is a no-op.
    pub fn init(&mut self, device: &mut dyn GraphicsDevice) -> Result<()> {
        if self.defaults.is_some() {
            log::debug!("Asset manager already initialized");
            return Ok(());
        }
        let defaults = DefaultAssets {
            color_shader: self.compile_str(device, "Color", builtin::COLOR, &[])?,
            shadow_shader: self.compile_str(device, "Shadow", builtin::SHADOW, &[])?,
            point_shadow_shader: self.compile_str(device, "PointShadow", builtin::POINT_SHADOW, &[])?,
            pick_shader: self.compile_str(device, "Pick", builtin::PICK, &[])?,
            quad_mesh: Mesh::quad(device)?,
            cube_mesh: Mesh::cube(device)?,
        };
        self.defaults = Some(defaults);
        log::info!("Asset manager initialized ({} shaders cached)", self.shaders.len());
        Ok(())
    }

    /// Destroy default assets and every cached program still alive
    pub fn shutdown(&mut self, device: &mut dyn GraphicsDevice) {
        let Some(defaults) = self.defaults.take() else {
            return;
        };
        defaults.quad_mesh.destroy(device);
        defaults.cube_mesh.destroy(device);
        drop(defaults);

        let count = self.shaders.len();
        for (_, entry) in self.shaders.drain() {
            device.destroy_program(entry.program);
        }
        log::info!("Asset manager shut down ({} programs destroyed)", count);
    }

    pub fn is_initialized(&self) -> bool {
        self.defaults.is_some()
    }

    pub fn library(&self) -> &ShaderLibrary {
        self.compiler.library()
    }

    /// Register application snippets before loading shaders that include them
    pub fn library_mut(&mut self) -> &mut ShaderLibrary {
        self.compiler.library_mut()
    }

    /// Load or reuse the program for `name` compiled with `defines`
    pub fn load_shader(
        &mut self,
        device: &mut dyn GraphicsDevice,
        name: &str,
        source: &ShaderSource,
        defines: &[ShaderDefine],
    ) -> Result<Arc<Shader>> {
        if !self.is_initialized() {
            return Err(RenderError::AssetsNotInitialized);
        }
        self.load(device, name, source, defines)
    }

    pub fn load_shader_str(
        &mut self,
        device: &mut dyn GraphicsDevice,
        name: &str,
        text: &str,
        defines: &[ShaderDefine],
    ) -> Result<Arc<Shader>> {
        let source = ShaderSource::parse(name, text)?;
        self.load_shader(device, name, &source, defines)
    }

    pub fn load_shader_file(
        &mut self,
        device: &mut dyn GraphicsDevice,
        path: impl AsRef<Path>,
        defines: &[ShaderDefine],
    ) -> Result<Arc<Shader>> {
        let path = path.as_ref();
        let source = ShaderSource::from_file(path)?;
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unnamed");
        self.load_shader(device, name, &source, defines)
    }

    fn compile_str(
        &mut self,
        device: &mut dyn GraphicsDevice,
        name: &str,
        text: &str,
        defines: &[ShaderDefine],
    ) -> Result<Arc<Shader>> {
        let source = ShaderSource::parse(name, text)?;
        self.load(device, name, &source, defines)
    }

    fn load(
        &mut self,
        device: &mut dyn GraphicsDevice,
        name: &str,
        source: &ShaderSource,
        defines: &[ShaderDefine],
    ) -> Result<Arc<Shader>> {
        let key = format!(
            "{}@{:016x}#{}",
            name,
            source.content_hash(),
            ShaderVariant::from_defines(defines).key()
        );
        if let Some(shader) = self.shaders.get(&key).and_then(|e| e.shader.upgrade()) {
            return Ok(shader);
        }

        log::debug!("Shader cache miss for '{}'", key);
        let compiled = self.compiler.compile(name, source, defines)?;
        let shader = Shader::create(device, compiled)?;
        if let Some(stale) = self.shaders.insert(
            key,
            CacheEntry {
                program: shader.id(),
                shader: Arc::downgrade(&shader),
            },
        ) {
            device.destroy_program(stale.program);
        }
        Ok(shader)
    }

    /// Destroy programs nobody references any more. Returns their ids so
    /// callers can drop state keyed by them.
    pub fn collect_unused(&mut self, device: &mut dyn GraphicsDevice) -> Vec<ProgramId> {
        let mut collected = Vec::new();
        self.shaders.retain(|key, entry| {
            if entry.shader.strong_count() > 0 {
                return true;
            }
            log::debug!("Destroying unused shader '{}'", key);
            device.destroy_program(entry.program);
            collected.push(entry.program);
            false
        });
        collected
    }

    /// Live entries in the shader cache
    pub fn cached_shader_count(&self) -> usize {
        self.shaders.values().filter(|e| e.shader.strong_count() > 0).count()
    }

    fn defaults(&self) -> Result<&DefaultAssets> {
        self.defaults.as_ref().ok_or(RenderError::AssetsNotInitialized)
    }

    pub fn color_shader(&self) -> Result<Arc<Shader>> {
        Ok(self.defaults()?.color_shader.clone())
    }

    pub fn shadow_shader(&self) -> Result<Arc<Shader>> {
        Ok(self.defaults()?.shadow_shader.clone())
    }

    pub fn point_shadow_shader(&self) -> Result<Arc<Shader>> {
        Ok(self.defaults()?.point_shadow_shader.clone())
    }

    pub fn pick_shader(&self) -> Result<Arc<Shader>> {
        Ok(self.defaults()?.pick_shader.clone())
    }

    pub fn quad_mesh(&self) -> Result<Arc<Mesh>> {
        Ok(self.defaults()?.quad_mesh.clone())
    }

    pub fn cube_mesh(&self) -> Result<Arc<Mesh>> {
        Ok(self.defaults()?.cube_mesh.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{DeviceCall, HeadlessDevice};

    #[test]
    fn test_lifecycle() {
        let mut device = HeadlessDevice::new();
        let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
        assert!(matches!(assets.pick_shader(), Err(RenderError::AssetsNotInitialized)));
        assert!(matches!(
            assets.load_shader_str(&mut device, "Color", builtin::COLOR, &[]),
            Err(RenderError::AssetsNotInitialized)
        ));

        assets.init(&mut device).unwrap();
        assert!(assets.is_initialized());
        assert!(assets.point_shadow_shader().unwrap().compiled().has_geometry_stage());
        assert_eq!(assets.quad_mesh().unwrap().index_count(), 6);

        let programs = device.live_program_count();
        assets.init(&mut device).unwrap();
        assert_eq!(device.live_program_count(), programs);

        assets.shutdown(&mut device);
        assert!(!assets.is_initialized());
        assert_eq!(device.live_program_count(), 0);
        assert!(matches!(assets.cube_mesh(), Err(RenderError::AssetsNotInitialized)));
    }

    #[test]
    fn test_weak_cache_shares_and_collects() {
        let mut device = HeadlessDevice::new();
        let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
        assets.init(&mut device).unwrap();

        let a = assets.load_shader_str(&mut device, "Lit", builtin::LIT, &[]).unwrap();
        let b = assets.load_shader_str(&mut device, "Lit", builtin::LIT, &[]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let shadowed = assets
            .load_shader_str(&mut device, "Lit", builtin::LIT, &[ShaderDefine::new("SHADOW_MAP")])
            .unwrap();
        assert_ne!(shadowed.id(), a.id());

        let program = a.id();
        drop(a);
        drop(b);
        let collected = assets.collect_unused(&mut device);
        assert_eq!(collected, vec![program]);
        assert!(device.calls().contains(&DeviceCall::DestroyProgram(program)));

        let reloaded = assets.load_shader_str(&mut device, "Lit", builtin::LIT, &[]).unwrap();
        assert_ne!(reloaded.id(), program);
    }

    #[test]
    fn test_same_name_different_source_compiles_separately() {
        let mut device = HeadlessDevice::new();
        let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
        assets.init(&mut device).unwrap();

        let plain = "#shader vertex\nvoid main() {}\n#shader fragment\nvoid main() {}\n";
        let glowing = "#shader vertex\nvoid main() {}\n#shader fragment\nuniform float u_Glow;\nvoid main() {}\n";
        let a = assets.load_shader_str(&mut device, "Custom", plain, &[]).unwrap();
        let b = assets.load_shader_str(&mut device, "Custom", glowing, &[]).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(!a.interface().contains("u_Glow"));
        assert!(b.interface().contains("u_Glow"));

        // A user shader named like an engine default keeps its own program
        let color = assets.load_shader_str(&mut device, "Color", glowing, &[]).unwrap();
        assert_ne!(color.id(), assets.color_shader().unwrap().id());
        assert!(color.interface().contains("u_Glow"));

        let again = assets.load_shader_str(&mut device, "Custom", glowing, &[]).unwrap();
        assert!(Arc::ptr_eq(&again, &b));
    }

    #[test]
    fn test_compile_error_surfaces() {
        let mut device = HeadlessDevice::new();
        let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
        assets.init(&mut device).unwrap();
        let result = assets.load_shader_str(&mut device, "Broken", "#shader vertex\n#include \"Nope.h\"\n#shader fragment\n", &[]);
        assert!(matches!(result, Err(RenderError::Shader(_))));
    }
}
