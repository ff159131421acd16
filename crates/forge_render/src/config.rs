//! Renderer configuration
//!
//! Loaded by the host (usually from TOML) and handed to
//! [`Renderer3D::new`](crate::Renderer3D::new). Every field has a default so
//! partial configs deserialize.

use serde::{Deserialize, Serialize};

/// Ping-pong blur passes run by the bloom stage
pub const BLOOM_BLUR_ITERATIONS: u32 = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Edge length of shadow maps allocated for lights
    pub shadow_map_size: u32,
    pub post_processing: PostProcessConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shadow_map_size: 1024,
            post_processing: PostProcessConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub enabled: bool,
    pub bloom: BloomConfig,
    pub hdr: HdrConfig,
    pub dither: DitherConfig,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bloom: BloomConfig::default(),
            hdr: HdrConfig::default(),
            dither: DitherConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    pub enabled: bool,
    /// Luminance above which pixels bleed
    pub threshold: f32,
    pub blur_iterations: u32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1.0,
            blur_iterations: BLOOM_BLUR_ITERATIONS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdrConfig {
    pub enabled: bool,
    pub exposure: f32,
}

impl Default for HdrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exposure: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DitherConfig {
    pub enabled: bool,
}

impl RendererConfig {
    /// Configuration with post-processing switched off entirely
    pub fn without_post_processing() -> Self {
        Self {
            post_processing: PostProcessConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
