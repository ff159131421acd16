//! Graphics device abstraction
//!
//! Everything above this module talks to the GPU through [`GraphicsDevice`].
//! The renderer never holds driver handles, only the small integer ids the
//! device hands back. [`crate::HeadlessDevice`] implements the trait for
//! tests and offline tooling.

use forge_shader::CompiledShader;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::{FramebufferAllocation, FramebufferDesc, TextureDesc};
use crate::uniform::UniformValue;

macro_rules! device_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

device_id!(
    /// Texture object id
    TextureId
);
device_id!(
    /// Framebuffer object id; `0` is the window target
    FramebufferId
);
device_id!(
    /// Linked program id
    ProgramId
);
device_id!(
    /// Vertex/index buffer pair id
    MeshId
);

impl FramebufferId {
    pub const DEFAULT: FramebufferId = FramebufferId(0);
}

/// Rasterization fill mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

/// Which faces are discarded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CullFace {
    None,
    #[default]
    Back,
    Front,
}

/// Primitive topology for indexed draws
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrawMode {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    Points,
}

/// Viewport rectangle in pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// What a pass clears on its target before drawing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClearMode {
    #[default]
    Full,
    DepthOnly,
    Keep,
}

impl ClearMode {
    /// Issue the clear on the bound framebuffer
    pub fn apply(self, device: &mut dyn GraphicsDevice) {
        match self {
            ClearMode::Full => device.clear(),
            ClearMode::DepthOnly => device.clear_depth(),
            ClearMode::Keep => {}
        }
    }
}

/// Immediate-mode GPU interface the renderer drives
pub trait GraphicsDevice {
    fn create_texture(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> Result<TextureId>;
    fn destroy_texture(&mut self, id: TextureId);

    /// Allocate a framebuffer and its attachments
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferAllocation>;
    /// Destroys the framebuffer together with its attachments
    fn destroy_framebuffer(&mut self, id: FramebufferId);

    fn create_program(&mut self, shader: &CompiledShader) -> Result<ProgramId>;
    fn destroy_program(&mut self, id: ProgramId);

    /// Upload interleaved vertex data and 32-bit indices
    fn create_mesh(&mut self, vertices: &[u8], stride: u32, indices: &[u32]) -> Result<MeshId>;
    fn destroy_mesh(&mut self, id: MeshId);

    fn bind_framebuffer(&mut self, id: FramebufferId);
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_clear_color(&mut self, color: [f32; 4]);
    /// Clear color, depth and integer attachments of the bound framebuffer
    fn clear(&mut self);
    fn clear_depth(&mut self);

    fn set_polygon_mode(&mut self, mode: PolygonMode);
    fn set_cull_face(&mut self, cull: CullFace);
    /// Enable `gl_ClipDistance[0..count]`, disabling the rest
    fn enable_clipping_planes(&mut self, count: usize);

    fn use_program(&mut self, id: ProgramId);
    /// Set a uniform by its full location path, e.g. `u_LightSources[2].Color`
    fn set_uniform(&mut self, program: ProgramId, location: &str, value: &UniformValue);
    fn bind_texture(&mut self, slot: u32, texture: TextureId);

    fn draw_indexed(&mut self, mesh: MeshId, mode: DrawMode, index_count: u32);

    /// Read one texel of an integer color attachment
    fn read_pixel(&mut self, framebuffer: FramebufferId, attachment: usize, x: u32, y: u32) -> Result<i32>;
}
