//! Shader variants
//!
//! A single logical shader becomes a family of programs by compiling it with
//! different `#define` sets. Materials use this to derive their shadow
//! passes from one source.

use serde::{Deserialize, Serialize};

/// Define enabling shadow-map sampling in lit shaders
pub const SHADOW_MAP_DEFINE: &str = "SHADOW_MAP";

/// Define selecting the depth-only shadow formation path
pub const SHADOW_FORMATION_DEFINE: &str = "SHADOW_FORMATION";

/// Shader preprocessor define
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShaderDefine {
    pub name: String,
    /// `None` means the symbol is defined without a value
    pub value: Option<String>,
}

impl ShaderDefine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: Some(value.to_string()),
        }
    }

    /// Parse `NAME` or `NAME=VALUE`
    pub fn parse(text: &str) -> Self {
        match text.split_once('=') {
            Some((name, value)) => Self::with_value(name.trim(), value.trim()),
            None => Self::new(text.trim()),
        }
    }

    pub fn to_directive(&self) -> String {
        match &self.value {
            Some(value) => format!("#define {} {}", self.name, value),
            None => format!("#define {}", self.name),
        }
    }
}

impl From<&str> for ShaderDefine {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

/// An ordered define set identifying one compiled permutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ShaderVariant {
    pub defines: Vec<ShaderDefine>,
}

impl ShaderVariant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_defines(defines: &[ShaderDefine]) -> Self {
        Self {
            defines: defines.to_vec(),
        }
    }

    /// Add a define, replacing an earlier one with the same name
    pub fn with_define(mut self, define: impl Into<ShaderDefine>) -> Self {
        let define = define.into();
        self.defines.retain(|d| d.name != define.name);
        self.defines.push(define);
        self
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.iter().any(|d| d.name == name)
    }

    pub fn generate_header(&self) -> String {
        let mut header = String::new();
        for define in &self.defines {
            header.push_str(&define.to_directive());
            header.push('\n');
        }
        header
    }

    /// Insert the define header into a stage source.
    ///
    /// GLSL requires `#version` to be the first directive, so the header goes
    /// directly after it when present.
    pub fn apply_to_source(&self, source: &str) -> String {
        if self.defines.is_empty() {
            return source.to_string();
        }
        let header = self.generate_header();

        let mut offset = 0;
        for line in source.split_inclusive('\n') {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                offset += line.len();
                continue;
            }
            if trimmed.starts_with("#version") {
                offset += line.len();
                let mut out = String::with_capacity(source.len() + header.len() + 1);
                out.push_str(&source[..offset]);
                if !source[..offset].ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&header);
                out.push_str(&source[offset..]);
                return out;
            }
            break;
        }
        format!("{}{}", header, source)
    }

    /// Stable key used by caches, e.g. `JOINT_COUNT=4;SHADOW_MAP`
    pub fn key(&self) -> String {
        let mut parts: Vec<String> = self
            .defines
            .iter()
            .map(|d| match &d.value {
                Some(v) => format!("{}={}", d.name, v),
                None => d.name.clone(),
            })
            .collect();
        parts.sort();
        parts.join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_parse() {
        assert_eq!(ShaderDefine::parse("SHADOW_MAP"), ShaderDefine::new("SHADOW_MAP"));
        assert_eq!(
            ShaderDefine::parse("JOINT_COUNT = 4"),
            ShaderDefine::with_value("JOINT_COUNT", 4)
        );
        assert_eq!(
            ShaderDefine::with_value("JOINT_COUNT", 4).to_directive(),
            "#define JOINT_COUNT 4"
        );
    }

    #[test]
    fn test_header_follows_version() {
        let variant = ShaderVariant::new().with_define(SHADOW_MAP_DEFINE);
        let out = variant.apply_to_source("#version 450 core\nvoid main() {}\n");
        assert_eq!(out, "#version 450 core\n#define SHADOW_MAP\nvoid main() {}\n");
    }

    #[test]
    fn test_header_without_version() {
        let variant = ShaderVariant::new().with_define("A");
        assert_eq!(variant.apply_to_source("void main() {}\n"), "#define A\nvoid main() {}\n");
    }

    #[test]
    fn test_with_define_replaces() {
        let variant = ShaderVariant::new()
            .with_define(ShaderDefine::with_value("JOINT_COUNT", 2))
            .with_define(ShaderDefine::with_value("JOINT_COUNT", 8));
        assert_eq!(variant.defines.len(), 1);
        assert_eq!(variant.defines[0].value.as_deref(), Some("8"));
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = ShaderVariant::new().with_define("A").with_define("B=1");
        let b = ShaderVariant::new().with_define("B=1").with_define("A");
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "A;B=1");
    }
}
