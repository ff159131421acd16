//! # forge_render
//!
//! Forward renderer core for the Forge engine.
//!
//! ## Layers
//!
//! - **Device**: [`GraphicsDevice`] abstracts the GPU. [`HeadlessDevice`]
//!   records calls and backs the tests and the runtime binary.
//! - **Resources**: [`Texture`], [`Framebuffer`], [`Mesh`], [`Shader`] and
//!   the [`AssetManager`] that caches programs weakly by name and defines.
//! - **Materials**: a [`Material`] holds one program per [`RenderPass`] and
//!   a [`UniformContext`] of typed [`UniformValue`] slots built from the
//!   reflected shader interface.
//! - **Frame**: the [`RendererContext`] binds engine-supplied uniforms
//!   according to each program's [`ShaderRequirements`]; [`Renderer3D`]
//!   sequences shadow, main and post-processing passes per camera.
//!
//! ## Example
//!
//! ```ignore
//! use forge_render::prelude::*;
//!
//! let mut device = HeadlessDevice::new();
//! let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
//! assets.init(&mut device)?;
//!
//! let mut renderer = Renderer3D::new(&mut assets, &mut device, RendererConfig::default())?;
//! let cube = Model::single(assets.cube_mesh()?, Arc::new(Material::default_color(&assets, Vec4::ONE)?));
//!
//! renderer.begin_scene(&target, &camera, &lights);
//! renderer.render_model(&cube, Mat4::IDENTITY, RenderOptions::default());
//! renderer.end_scene(&mut device)?;
//! let stats = renderer.flush();
//! ```

pub mod asset;
pub mod builtin;
pub mod camera;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod headless;
pub mod light;
pub mod material;
pub mod mesh;
pub mod model;
pub mod picking;
pub mod post;
pub mod renderer;
pub mod resource;
pub mod shader;
pub mod stats;
pub mod uniform;

pub use asset::AssetManager;
pub use camera::{CameraData, CameraMode, Frustum};
pub use config::{BloomConfig, DitherConfig, HdrConfig, PostProcessConfig, RendererConfig};
pub use context::{RendererContext, ShaderRequirements, ShadowRenderData};
pub use device::{
    ClearMode, CullFace, DrawMode, FramebufferId, GraphicsDevice, MeshId, PolygonMode, ProgramId, TextureId,
    Viewport,
};
pub use error::{RenderError, Result};
pub use forge_shader::{MAX_CLIPPING_PLANES, MAX_LIGHT_COUNT};
pub use headless::{DeviceCall, HeadlessDevice};
pub use light::{LightShadow, LightSource, LightType};
pub use material::{Material, RenderPass, RenderSettings};
pub use mesh::{Mesh, Vertex};
pub use model::{Model, SubModel};
pub use picking::{pick_entity, NO_ENTITY};
pub use post::{PostProcessingStage, PostProcessor, StageExecution, StageKind};
pub use renderer::{RenderOptions, Renderer3D, ScenePhase};
pub use resource::{Framebuffer, FramebufferDesc, Texture, TextureDesc, TextureFormat, TextureKind};
pub use shader::Shader;
pub use stats::RenderStats;
pub use uniform::{UniformContext, UniformError, UniformRecord, UniformSpecification, UniformType, UniformValue};

pub mod prelude {
    pub use crate::asset::AssetManager;
    pub use crate::camera::{CameraData, CameraMode, Frustum};
    pub use crate::config::RendererConfig;
    pub use crate::device::{GraphicsDevice, Viewport};
    pub use crate::headless::HeadlessDevice;
    pub use crate::light::{LightSource, LightType};
    pub use crate::material::{Material, RenderPass, RenderSettings};
    pub use crate::mesh::Mesh;
    pub use crate::model::{Model, SubModel};
    pub use crate::renderer::{RenderOptions, Renderer3D};
    pub use crate::resource::{Framebuffer, FramebufferDesc};
    pub use crate::uniform::{UniformContext, UniformValue};
    pub use forge_shader::ShaderLibrary;
    pub use glam::{Mat4, Vec3, Vec4};
    pub use std::sync::Arc;
}
