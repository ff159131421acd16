//! Exposure tone mapping

use std::sync::Arc;

use crate::asset::AssetManager;
use crate::builtin::{post_process_source, HDR_FRAGMENT};
use crate::context::RendererContext;
use crate::device::{ClearMode, GraphicsDevice};
use crate::error::{RenderError, Result};
use crate::mesh::Mesh;
use crate::resource::Framebuffer;
use crate::shader::Shader;
use crate::uniform::UniformContext;

use super::{color_of, draw_fullscreen, STAGE_INPUT_UNIFORM};

pub const EXPOSURE_UNIFORM: &str = "Exposure";

pub struct HdrStage {
    pub enabled: bool,
    pub(super) uniforms: UniformContext,
    pub(super) input: Option<Arc<Framebuffer>>,
    shader: Arc<Shader>,
}

impl HdrStage {
    pub fn new(assets: &mut AssetManager, device: &mut dyn GraphicsDevice, exposure: f32) -> Result<Self> {
        let shader = assets.load_shader_str(device, "Hdr", &post_process_source(HDR_FRAGMENT), &[])?;
        let mut uniforms = UniformContext::from_interface(shader.interface());
        uniforms.try_set(EXPOSURE_UNIFORM, exposure)?;
        Ok(Self {
            enabled: true,
            uniforms,
            input: None,
            shader,
        })
    }

    pub fn exposure(&self) -> f32 {
        self.uniforms.try_get(EXPOSURE_UNIFORM).unwrap_or(1.0)
    }

    pub fn set_exposure(&mut self, exposure: f32) {
        self.uniforms.set(EXPOSURE_UNIFORM, exposure);
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
            .ok_or_else(|| RenderError::PostProcessorNotPrepared("HDR input not allocated".into()))?;
        draw_fullscreen(
            device,
            context,
            quad,
            target,
            clear,
            &self.shader,
            &self.uniforms,
            &[(STAGE_INPUT_UNIFORM, color_of(input)?)],
            &[],
        );
        Ok(1)
    }
}

impl std::fmt::Debug for HdrStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdrStage")
            .field("enabled", &self.enabled)
            .field("exposure", &self.exposure())
            .finish()
    }
}
