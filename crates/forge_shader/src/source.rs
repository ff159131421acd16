//! Shader stage sources
//!
//! A shader is written either as separate stage strings or as one file whose
//! stages are introduced by `#shader vertex`, `#shader geometry` and
//! `#shader fragment` marker lines.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, ShaderError};

/// Programmable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 3] = [Self::Vertex, Self::Geometry, Self::Fragment];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ShaderStage {
    type Err = ShaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vertex" | "vert" => Ok(Self::Vertex),
            "geometry" | "geom" => Ok(Self::Geometry),
            "fragment" | "frag" | "pixel" => Ok(Self::Fragment),
            other => Err(ShaderError::UnknownStage(other.to_string())),
        }
    }
}

/// Raw, unexpanded stage sources of one shader
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ShaderSource {
    pub vertex: String,
    pub geometry: Option<String>,
    pub fragment: String,
}

impl ShaderSource {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            geometry: None,
            fragment: fragment.into(),
        }
    }

    pub fn with_geometry(mut self, geometry: impl Into<String>) -> Self {
        self.geometry = Some(geometry.into());
        self
    }

    /// Split a single-file source on `#shader <stage>` lines.
    ///
    /// Text before the first marker is shared and prepended to every stage.
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let mut shared = String::new();
        let mut stages: Vec<(ShaderStage, String)> = Vec::new();

        for line in text.lines() {
            if let Some(rest) = line.trim_start().strip_prefix("#shader") {
                let stage: ShaderStage = rest.parse()?;
                stages.push((stage, String::new()));
                continue;
            }
            let buffer = match stages.last_mut() {
                Some((_, body)) => body,
                None => &mut shared,
            };
            buffer.push_str(line);
            buffer.push('\n');
        }

        let mut source = ShaderSource::default();
        let mut seen_vertex = false;
        let mut seen_fragment = false;
        for (stage, body) in stages {
            let body = format!("{}{}", shared, body);
            match stage {
                ShaderStage::Vertex => {
                    source.vertex = body;
                    seen_vertex = true;
                }
                ShaderStage::Geometry => source.geometry = Some(body),
                ShaderStage::Fragment => {
                    source.fragment = body;
                    seen_fragment = true;
                }
            }
        }

        if !seen_vertex {
            return Err(ShaderError::MissingStage {
                shader: name.to_string(),
                stage: ShaderStage::Vertex,
            });
        }
        if !seen_fragment {
            return Err(ShaderError::MissingStage {
                shader: name.to_string(),
                stage: ShaderStage::Fragment,
            });
        }
        Ok(source)
    }

    /// Read and split a single-file source
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed");
        Self::parse(name, &text)
    }

    /// Hash of every stage's text, used to tell same-named sources apart
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Stage sources in pipeline order, geometry only when present
    pub fn stages(&self) -> impl Iterator<Item = (ShaderStage, &str)> {
        let geometry = self
            .geometry
            .as_deref()
            .map(|g| (ShaderStage::Geometry, g));
        std::iter::once((ShaderStage::Vertex, self.vertex.as_str()))
            .chain(geometry)
            .chain(std::iter::once((ShaderStage::Fragment, self.fragment.as_str())))
    }
}
