//! Source expansion and interface extraction
//!
//! Compiling here means producing the final per-stage GLSL handed to the
//! device plus the [`ShaderInterface`] the renderer binds against. Driver
//! compilation happens later, inside the graphics device.

use std::path::Path;

use crate::preprocess::Preprocessor;
use crate::reflect::{self, ShaderInterface};
use crate::{Result, ShaderDefine, ShaderLibrary, ShaderSource, ShaderStage, ShaderVariant};

/// `#version` used when a stage does not declare one
pub const DEFAULT_GLSL_VERSION: &str = "#version 450 core";

/// Expanded stage sources with their reflected interface
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub name: String,
    pub variant: ShaderVariant,
    pub stages: Vec<(ShaderStage, String)>,
    pub interface: ShaderInterface,
}

impl CompiledShader {
    pub fn stage(&self, stage: ShaderStage) -> Option<&str> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, text)| text.as_str())
    }

    pub fn has_geometry_stage(&self) -> bool {
        self.stage(ShaderStage::Geometry).is_some()
    }

    /// Cache key combining name and define set
    pub fn key(&self) -> String {
        format!("{}#{}", self.name, self.variant.key())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShaderCompiler {
    library: ShaderLibrary,
}

impl ShaderCompiler {
    pub fn new(library: ShaderLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &ShaderLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut ShaderLibrary {
        &mut self.library
    }

    /// Expand includes and defines for every stage and reflect the union of
    /// their uniforms
    pub fn compile(
        &self,
        name: &str,
        source: &ShaderSource,
        defines: &[ShaderDefine],
    ) -> Result<CompiledShader> {
        let variant = ShaderVariant::from_defines(defines);
        let mut stages = Vec::new();
        let mut interface = ShaderInterface::new();

        for (stage, text) in source.stages() {
            match self.compile_stage(name, text, &variant) {
                Ok((expanded, stage_interface)) => {
                    interface.merge(&stage_interface);
                    stages.push((stage, expanded));
                }
                Err(e) => {
                    log::error!("Failed to compile {} stage of shader '{}': {}", stage, name, e);
                    return Err(e);
                }
            }
        }

        log::debug!(
            "Compiled shader '{}' [{}] with {} uniforms",
            name,
            variant.key(),
            interface.len()
        );
        Ok(CompiledShader {
            name: name.to_string(),
            variant,
            stages,
            interface,
        })
    }

    /// Compile a single-file `#shader` source
    pub fn compile_str(&self, name: &str, text: &str, defines: &[ShaderDefine]) -> Result<CompiledShader> {
        let source = ShaderSource::parse(name, text)?;
        self.compile(name, &source, defines)
    }

    pub fn compile_file(&self, path: impl AsRef<Path>, defines: &[ShaderDefine]) -> Result<CompiledShader> {
        let path = path.as_ref();
        let source = ShaderSource::from_file(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed");
        self.compile(name, &source, defines)
    }

    fn compile_stage(
        &self,
        name: &str,
        text: &str,
        variant: &ShaderVariant,
    ) -> Result<(String, ShaderInterface)> {
        let mut expanded = self.library.resolve_includes(text)?;
        if !has_version(&expanded) {
            expanded = format!("{}\n{}", DEFAULT_GLSL_VERSION, expanded);
        }
        let expanded = variant.apply_to_source(&expanded);

        let preprocessed = Preprocessor::new().run(&expanded)?;
        let interface = reflect::reflect(name, &preprocessed)?;
        Ok((reflect::strip_annotations(&expanded), interface))
    }
}

fn has_version(source: &str) -> bool {
    source
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("//"))
        .is_some_and(|l| l.starts_with("#version"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ShaderDataType, SHADOW_MAP_DEFINE};

    const LIT: &str = "\
#shader vertex
#include \"Clipping.h\"
layout(location = 0) in vec3 v_Position;
uniform mat4 u_ProjViewMatrix;
uniform mat4 u_ModelMatrix;
void main()
{
    vec4 world = u_ModelMatrix * vec4(v_Position, 1.0);
    ApplyClippingPlanes(world);
    gl_Position = u_ProjViewMatrix * world;
}
#shader fragment
#include \"Lighting.h\"
#include \"Shadows.h\"
out vec4 f_Color;
[\"Color\"]
uniform vec3 u_Color;
void main()
{
    f_Color = vec4(u_Color, 1.0);
}
";

    #[test]
    fn test_compile_reflects_library_uniforms() {
        let compiler = ShaderCompiler::default();
        let shader = compiler.compile_str("lit", LIT, &[]).unwrap();
        let iface = &shader.interface;

        assert!(iface.contains("u_ModelMatrix"));
        assert!(iface.contains("u_ClippingPlanes[7]"));
        assert!(iface.contains("u_LightSources[31].Intensity"));
        assert!(iface.contains("u_UsedLightSources"));
        assert_eq!(iface.by_variable_name("Color").unwrap().ty, ShaderDataType::Float3);
        // Shadow uniforms sit behind SHADOW_MAP
        assert!(!iface.contains("u_ShadowMaps"));
    }

    #[test]
    fn test_shadow_variant_adds_uniforms() {
        let compiler = ShaderCompiler::default();
        let shader = compiler
            .compile_str("lit", LIT, &[ShaderDefine::new(SHADOW_MAP_DEFINE)])
            .unwrap();
        assert!(shader.interface.contains("u_ShadowMaps[3]"));
        assert!(shader.interface.contains("u_PointShadowFarPlanes[0]"));
        assert_eq!(shader.key(), "lit#SHADOW_MAP");
    }

    #[test]
    fn test_stage_text_is_driver_ready() {
        let compiler = ShaderCompiler::default();
        let shader = compiler.compile_str("lit", LIT, &[ShaderDefine::new("SHADOW_MAP")]).unwrap();
        let fragment = shader.stage(ShaderStage::Fragment).unwrap();

        assert!(fragment.starts_with(DEFAULT_GLSL_VERSION));
        assert!(fragment.contains("#define SHADOW_MAP"));
        assert!(!fragment.contains("#include"));
        assert!(!fragment.contains("[\"Color\"]"));
        assert!(!shader.has_geometry_stage());
    }

    #[test]
    fn test_compile_error_propagates() {
        let compiler = ShaderCompiler::new(ShaderLibrary::empty());
        let result = compiler.compile_str("lit", LIT, &[]);
        assert!(matches!(result, Err(crate::ShaderError::IncludeNotFound(_))));
    }
}
