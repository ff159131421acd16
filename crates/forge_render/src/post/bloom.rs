//! Bloom: bright pass, ping-pong gaussian blur, additive combine

use std::sync::Arc;

use crate::asset::AssetManager;
use crate::builtin::{post_process_source, BLOOM_COMBINE_FRAGMENT, BLOOM_FRAGMENT, BLUR_FRAGMENT};
use crate::context::RendererContext;
use crate::device::{ClearMode, GraphicsDevice};
use crate::error::{RenderError, Result};
use crate::mesh::Mesh;
use crate::resource::{Framebuffer, FramebufferDesc, TextureFormat};
use crate::shader::Shader;
use crate::uniform::{UniformContext, UniformValue};

use super::{allocate_input, color_of, draw_fullscreen, reallocate, release, STAGE_INPUT_UNIFORM};

/// Semantic name of the brightness cut-off
pub const THRESHOLD_UNIFORM: &str = "BloomThreshold";
const HORIZONTAL_UNIFORM: &str = "u_Horizontal";
const BRIGHT_TEXTURE_UNIFORM: &str = "frg_BrightTexture";

pub struct BloomStage {
    pub enabled: bool,
    pub blur_iterations: u32,
    pub(super) uniforms: UniformContext,
    bright_shader: Arc<Shader>,
    blur_shader: Arc<Shader>,
    combine_shader: Arc<Shader>,
    /// Scene color in attachment 0, bright parts in attachment 1
    bright: Option<Arc<Framebuffer>>,
    /// Blur targets. `ping_pong[0]` doubles as the stage input.
    ping_pong: [Option<Arc<Framebuffer>>; 2],
}

impl BloomStage {
    pub fn new(
        assets: &mut AssetManager,
        device: &mut dyn GraphicsDevice,
        threshold: f32,
        blur_iterations: u32,
    ) -> Result<Self> {
        let bright_shader = assets.load_shader_str(device, "Bloom", &post_process_source(BLOOM_FRAGMENT), &[])?;
        let blur_shader = assets.load_shader_str(device, "BloomBlur", &post_process_source(BLUR_FRAGMENT), &[])?;
        let combine_shader =
            assets.load_shader_str(device, "BloomCombine", &post_process_source(BLOOM_COMBINE_FRAGMENT), &[])?;

        let mut uniforms = UniformContext::from_interface(bright_shader.interface());
        uniforms.add_from_interface(combine_shader.interface());
        uniforms.try_set(THRESHOLD_UNIFORM, threshold)?;

        Ok(Self {
            enabled: true,
            blur_iterations,
            uniforms,
            bright_shader,
            blur_shader,
            combine_shader,
            bright: None,
            ping_pong: [None, None],
        })
    }

    pub fn threshold(&self) -> f32 {
        self.uniforms.try_get(THRESHOLD_UNIFORM).unwrap_or(1.0)
    }

    pub(super) fn input_framebuffer(&self) -> Option<&Arc<Framebuffer>> {
        self.ping_pong[0].as_ref()
    }

    pub(super) fn init(
        &mut self,
        device: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
        needs_depth: bool,
    ) -> Result<()> {
        reallocate(
            device,
            &mut self.bright,
            FramebufferDesc::new("BloomBright", width, height)
                .with_color(TextureFormat::Rgba16Float)
                .with_color(TextureFormat::Rgba16Float),
        )?;
        allocate_input(device, &mut self.ping_pong[0], "BloomPing", width, height, needs_depth)?;
        allocate_input(device, &mut self.ping_pong[1], "BloomPong", width, height, false)
    }

    pub(super) fn execute(
        &self,
        device: &mut dyn GraphicsDevice,
        context: &mut RendererContext,
        quad: &Mesh,
        target: &Framebuffer,
        clear: ClearMode,
    ) -> Result<u32> {
        let (Some(bright), Some(ping), Some(pong)) = (&self.bright, &self.ping_pong[0], &self.ping_pong[1]) else {
            return Err(RenderError::PostProcessorNotPrepared("bloom framebuffers not allocated".into()));
        };
        let ping_pong = [ping, pong];
        let bright_color = bright.color_attachment(1).map(Arc::as_ref).ok_or_else(|| {
            RenderError::InvalidResource("bloom bright framebuffer lacks a second attachment".into())
        })?;

        draw_fullscreen(
            device,
            context,
            quad,
            bright,
            ClearMode::Full,
            &self.bright_shader,
            &self.uniforms,
            &[(STAGE_INPUT_UNIFORM, color_of(ping)?)],
            &[],
        );

        let mut horizontal = true;
        for i in 0..self.blur_iterations {
            context.reset();
            let source = if i == 0 {
                bright_color
            } else {
                color_of(ping_pong[usize::from(!horizontal)])?
            };
            draw_fullscreen(
                device,
                context,
                quad,
                ping_pong[usize::from(horizontal)],
                ClearMode::Full,
                &self.blur_shader,
                &self.uniforms,
                &[(STAGE_INPUT_UNIFORM, source)],
                &[(HORIZONTAL_UNIFORM, UniformValue::Bool(horizontal))],
            );
            horizontal = !horizontal;
        }

        context.reset();
        let blurred = if self.blur_iterations == 0 {
            bright_color
        } else {
            color_of(ping_pong[usize::from(!horizontal)])?
        };
        draw_fullscreen(
            device,
            context,
            quad,
            target,
            clear,
            &self.combine_shader,
            &self.uniforms,
            &[(STAGE_INPUT_UNIFORM, color_of(bright)?), (BRIGHT_TEXTURE_UNIFORM, blurred)],
            &[],
        );
        Ok(self.blur_iterations + 2)
    }

    pub(super) fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        release(device, &mut self.bright);
        for slot in &mut self.ping_pong {
            release(device, slot);
        }
    }
}

impl std::fmt::Debug for BloomStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomStage")
            .field("enabled", &self.enabled)
            .field("blur_iterations", &self.blur_iterations)
            .field("uniforms", &self.uniforms)
            .finish()
    }
}
