//! Runtime configuration
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. A TOML file given on the command line, or `forge.toml` in the working
//!    directory when present
//! 3. Environment variables `FORGE_FRAMES` and `FORGE_LOG`

use std::path::{Path, PathBuf};

use forge_render::RendererConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file probed when none is given
pub const DEFAULT_CONFIG_PATH: &str = "forge.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Frames rendered before exiting
    pub frames: u32,
    /// `env_logger` filter used when `RUST_LOG` is unset
    pub log_filter: String,
    pub width: u32,
    pub height: u32,
    /// Seconds advanced per frame
    pub time_step: f32,
    pub renderer: RendererConfig,
    pub scene: DemoSceneConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frames: 3,
            log_filter: forge_core::logging::DEFAULT_FILTER.to_string(),
            width: 1280,
            height: 720,
            time_step: 1.0 / 60.0,
            renderer: RendererConfig::default(),
            scene: DemoSceneConfig::default(),
        }
    }
}

/// Contents of the demo scene
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSceneConfig {
    /// Cubes along each side of the grid
    pub grid_size: u32,
    pub spacing: f32,
    /// Degrees per second
    pub spin_speed: f32,
    pub point_light_shadows: bool,
    pub directional_light: bool,
    /// Extra overlay camera rendering into the same target
    pub overlay_camera: bool,
    /// Single-file `#shader` source replacing the built-in lit material
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_path: Option<PathBuf>,
    /// Defines compiled into the scene material, `NAME` or `NAME=VALUE`
    pub defines: Vec<String>,
    /// Render a pick pass after the last frame and log the entity under the
    /// center pixel
    pub pick: bool,
}

impl Default for DemoSceneConfig {
    fn default() -> Self {
        Self {
            grid_size: 3,
            spacing: 2.5,
            spin_speed: 45.0,
            point_light_shadows: true,
            directional_light: true,
            overlay_camera: false,
            material_path: None,
            defines: Vec::new(),
            pick: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Resolve the full configuration
    ///
    /// An explicit `path` must load. Without one, `forge.toml` is used when
    /// it exists and the defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load_from_file(DEFAULT_CONFIG_PATH)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `FORGE_*` overrides read through `lookup`
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(frames) = lookup("FORGE_FRAMES") {
            match frames.trim().parse() {
                Ok(frames) => self.frames = frames,
                Err(_) => log::warn!("Ignoring FORGE_FRAMES='{}': not a frame count", frames),
            }
        }
        if let Some(filter) = lookup("FORGE_LOG") {
            if !filter.is_empty() {
                self.log_filter = filter;
            }
        }
    }
}
