//! Ordered dithering against an 8x8 Bayer matrix

use std::sync::Arc;

use crate::asset::AssetManager;
use crate::builtin::{post_process_source, DITHER_FRAGMENT};
use crate::context::RendererContext;
use crate::device::{ClearMode, GraphicsDevice};
use crate::error::{RenderError, Result};
use crate::mesh::Mesh;
use crate::resource::{Framebuffer, Texture, TextureDesc, TextureFormat};
use crate::shader::Shader;
use crate::uniform::UniformContext;

use super::{color_of, draw_fullscreen, STAGE_INPUT_UNIFORM};

const BAYER_UNIFORM: &str = "frg_BayerMatrix";

/// Threshold map, uploaded as an R8 texture
#[rustfmt::skip]
pub const BAYER_MATRIX: [u8; 64] = [
     0, 32,  8, 40,  2, 34, 10, 42,
    48, 16, 56, 24, 50, 18, 58, 26,
    12, 44,  4, 36, 14, 46,  6, 38,
    60, 28, 52, 20, 62, 30, 54, 22,
     3, 35, 11, 43,  1, 33,  9, 41,
    51, 19, 59, 27, 49, 17, 57, 25,
    15, 47,  7, 39, 13, 45,  5, 37,
    63, 31, 55, 23, 61, 29, 53, 21,
];

pub struct DitherStage {
    pub enabled: bool,
    pub(super) uniforms: UniformContext,
    pub(super) input: Option<Arc<Framebuffer>>,
    shader: Arc<Shader>,
    bayer: Arc<Texture>,
}

impl DitherStage {
    /// Created disabled
    pub fn new(assets: &mut AssetManager, device: &mut dyn GraphicsDevice) -> Result<Self> {
        let shader = assets.load_shader_str(device, "Dither", &post_process_source(DITHER_FRAGMENT), &[])?;
        let bayer = Texture::create(
            device,
            TextureDesc::new_2d("BayerMatrix", 8, 8, TextureFormat::R8),
            Some(&BAYER_MATRIX[..]),
        )?;
        Ok(Self {
            enabled: false,
            uniforms: UniformContext::from_interface(shader.interface()),
            input: None,
            shader,
            bayer,
        })
    }

    pub fn bayer_texture(&self) -> &Arc<Texture> {
        &self.bayer
    }

    pub(super) fn execute(
        &self,
        device: &mut dyn GraphicsDevice,
        context: &mut RendererContext,
        quad: &Mesh,
        target: &Framebuffer,
        clear: ClearMode,
    ) -> Result<u32> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| RenderError::PostProcessorNotPrepared("dither input not allocated".into()))?;
        draw_fullscreen(
            device,
            context,
            quad,
            target,
            clear,
            &self.shader,
            &self.uniforms,
            &[(STAGE_INPUT_UNIFORM, color_of(input)?), (BAYER_UNIFORM, self.bayer.as_ref())],
            &[],
        );
        Ok(1)
    }

    pub(super) fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        super::release(device, &mut self.input);
        device.destroy_texture(self.bayer.id());
    }
}

impl std::fmt::Debug for DitherStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DitherStage").field("enabled", &self.enabled).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bayer_matrix_is_a_permutation() {
        let mut sorted = BAYER_MATRIX;
        sorted.sort_unstable();
        assert!(sorted.iter().enumerate().all(|(i, v)| *v as usize == i));
    }
}
