//! Post-processing pipeline
//!
//! After the main pass, the [`PostProcessor`] chains full-screen stages:
//! each enabled stage reads its own input framebuffer and writes into the
//! input of the next enabled stage, and the last one writes into the
//! destination.
//!
//! Stage framebuffers are sized by an explicit transition:
//!
//! ```ignore
//! post.prepare(&mut device, 1280, 720, true)?;   // Unprepared -> Prepared
//! post.set_destination(target.clone());
//! // main pass renders into post.first_input()
//! post.render(&mut device, &mut context)?;
//! ```
//!
//! `render` fails with [`RenderError::PostProcessorNotPrepared`] when the
//! enabled set changed since the last `prepare`, or no destination is set.

mod bloom;
mod dither;
mod hdr;

pub use bloom::BloomStage;
pub use dither::{DitherStage, BAYER_MATRIX};
pub use hdr::HdrStage;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::asset::AssetManager;
use crate::config::PostProcessConfig;
use crate::context::RendererContext;
use crate::device::{ClearMode, FramebufferId, GraphicsDevice, Viewport};
use crate::error::{RenderError, Result};
use crate::material::RenderSettings;
use crate::mesh::Mesh;
use crate::resource::{Framebuffer, FramebufferDesc, Texture, TextureFormat};
use crate::shader::Shader;
use crate::uniform::{UniformContext, UniformValue};

/// Sampler every stage reads its input through
pub const STAGE_INPUT_UNIFORM: &str = "frg_Texture";

// ============================================================================
// Stages
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Bloom,
    Hdr,
    Dither,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Bloom => write!(f, "Bloom"),
            StageKind::Hdr => write!(f, "HDR"),
            StageKind::Dither => write!(f, "Dither"),
        }
    }
}

/// The closed set of full-screen effects
#[derive(Debug)]
pub enum PostProcessingStage {
    Bloom(BloomStage),
    Hdr(HdrStage),
    Dither(DitherStage),
}

impl PostProcessingStage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Bloom(_) => StageKind::Bloom,
            Self::Hdr(_) => StageKind::Hdr,
            Self::Dither(_) => StageKind::Dither,
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Bloom(stage) => stage.enabled,
            Self::Hdr(stage) => stage.enabled,
            Self::Dither(stage) => stage.enabled,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match self {
            Self::Bloom(stage) => stage.enabled = enabled,
            Self::Hdr(stage) => stage.enabled = enabled,
            Self::Dither(stage) => stage.enabled = enabled,
        }
    }

    /// Framebuffer the previous step renders into
    pub fn input_framebuffer(&self) -> Option<&Arc<Framebuffer>> {
        match self {
            Self::Bloom(stage) => stage.input_framebuffer(),
            Self::Hdr(stage) => stage.input.as_ref(),
            Self::Dither(stage) => stage.input.as_ref(),
        }
    }

    /// Tunable parameters, keyed by their semantic names
    pub fn uniforms(&self) -> &UniformContext {
        match self {
            Self::Bloom(stage) => &stage.uniforms,
            Self::Hdr(stage) => &stage.uniforms,
            Self::Dither(stage) => &stage.uniforms,
        }
    }

    pub fn uniforms_mut(&mut self) -> &mut UniformContext {
        match self {
            Self::Bloom(stage) => &mut stage.uniforms,
            Self::Hdr(stage) => &mut stage.uniforms,
            Self::Dither(stage) => &mut stage.uniforms,
        }
    }

    /// (Re)allocate the stage's framebuffers for `width` x `height`
    pub fn init(&mut self, device: &mut dyn GraphicsDevice, width: u32, height: u32, needs_depth: bool) -> Result<()> {
        match self {
            Self::Bloom(stage) => stage.init(device, width, height, needs_depth),
            Self::Hdr(stage) => allocate_input(device, &mut stage.input, "HdrInput", width, height, needs_depth),
            Self::Dither(stage) => allocate_input(device, &mut stage.input, "DitherInput", width, height, needs_depth),
        }
    }

    /// Render the effect into `target`, clearing it as `clear` says.
    /// Returns the number of draws issued.
    pub fn execute(
        &self,
        device: &mut dyn GraphicsDevice,
        context: &mut RendererContext,
        quad: &Mesh,
        target: &Framebuffer,
        clear: ClearMode,
    ) -> Result<u32> {
        match self {
            Self::Bloom(stage) => stage.execute(device, context, quad, target, clear),
            Self::Hdr(stage) => stage.execute(device, context, quad, target, clear),
            Self::Dither(stage) => stage.execute(device, context, quad, target, clear),
        }
    }

    pub(crate) fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        match self {
            Self::Bloom(stage) => stage.destroy(device),
            Self::Hdr(stage) => release(device, &mut stage.input),
            Self::Dither(stage) => stage.destroy(device),
        }
    }
}

/// Allocate a single-color stage input unless the current one already fits
pub(crate) fn allocate_input(
    device: &mut dyn GraphicsDevice,
    slot: &mut Option<Arc<Framebuffer>>,
    label: &str,
    width: u32,
    height: u32,
    with_depth: bool,
) -> Result<()> {
    let mut desc = FramebufferDesc::new(label, width, height).with_color(TextureFormat::Rgba16Float);
    if with_depth {
        desc = desc.with_depth(TextureFormat::Depth24Stencil8);
    }
    reallocate(device, slot, desc)
}

pub(crate) fn reallocate(
    device: &mut dyn GraphicsDevice,
    slot: &mut Option<Arc<Framebuffer>>,
    desc: FramebufferDesc,
) -> Result<()> {
    if let Some(current) = slot {
        if current.desc() == &desc {
            return Ok(());
        }
    }
    release(device, slot);
    *slot = Some(Framebuffer::create(device, desc)?);
    Ok(())
}

pub(crate) fn release(device: &mut dyn GraphicsDevice, slot: &mut Option<Arc<Framebuffer>>) {
    if let Some(framebuffer) = slot.take() {
        framebuffer.destroy(device);
    }
}

/// Clear `target` as `clear` says and draw the full-screen quad with `shader`.
///
/// `textures` are internal samplers bound after the stage's own uniforms;
/// `values` are plain internal uniforms.
#[allow(clippy::too_many_arguments)]
pub(crate) fn draw_fullscreen(
    device: &mut dyn GraphicsDevice,
    context: &mut RendererContext,
    quad: &Mesh,
    target: &Framebuffer,
    clear: ClearMode,
    shader: &Shader,
    uniforms: &UniformContext,
    textures: &[(&str, &Texture)],
    values: &[(&str, UniformValue)],
) {
    device.bind_framebuffer(target.id());
    device.set_viewport(Viewport::full(target.width(), target.height()));
    clear.apply(device);

    let requirements = context.shader_requirements(shader);
    context.bind_shader(device, shader, requirements);
    uniforms.apply(device, shader, context);
    for (location, texture) in textures {
        let slot = context.bind_texture(device, texture);
        shader.set_uniform(device, location, &UniformValue::Int(slot as i32));
    }
    for (location, value) in values {
        shader.set_uniform(device, location, value);
    }
    device.draw_indexed(quad.id(), quad.draw_mode(), quad.index_count());
}

/// Color attachment 0 of a stage framebuffer
pub(crate) fn color_of(framebuffer: &Framebuffer) -> Result<&Texture> {
    framebuffer.color_attachment(0).map(Arc::as_ref).ok_or_else(|| {
        RenderError::InvalidResource(format!("framebuffer {:?} has no color attachment", framebuffer.id()))
    })
}

fn missing_input(kind: StageKind) -> RenderError {
    RenderError::PostProcessorNotPrepared(format!("{} stage has no input framebuffer", kind))
}

// ============================================================================
// PostProcessor
// ============================================================================

/// One stage run recorded by the last [`PostProcessor::render`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageExecution {
    pub kind: StageKind,
    pub target: FramebufferId,
    pub draws: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum PrepareState {
    Unprepared,
    Prepared {
        width: u32,
        height: u32,
        needs_depth: bool,
        enabled: Vec<bool>,
    },
}

pub struct PostProcessor {
    enabled: bool,
    stages: Vec<PostProcessingStage>,
    quad: Arc<Mesh>,
    destination: Option<Arc<Framebuffer>>,
    destination_clear: ClearMode,
    state: PrepareState,
    cursor: usize,
    executions: Vec<StageExecution>,
}

impl PostProcessor {
    /// Build Bloom, HDR and Dither stages in that order
    pub fn new(assets: &mut AssetManager, device: &mut dyn GraphicsDevice, config: &PostProcessConfig) -> Result<Self> {
        let mut bloom = BloomStage::new(assets, device, config.bloom.threshold, config.bloom.blur_iterations)?;
        bloom.enabled = config.bloom.enabled;
        let mut hdr = HdrStage::new(assets, device, config.hdr.exposure)?;
        hdr.enabled = config.hdr.enabled;
        let mut dither = DitherStage::new(assets, device)?;
        dither.enabled = config.dither.enabled;

        Ok(Self::with_stages(
            assets.quad_mesh()?,
            vec![
                PostProcessingStage::Bloom(bloom),
                PostProcessingStage::Hdr(hdr),
                PostProcessingStage::Dither(dither),
            ],
        )
        .enabled(config.enabled))
    }

    /// Processor over an explicit stage list
    pub fn with_stages(quad: Arc<Mesh>, stages: Vec<PostProcessingStage>) -> Self {
        Self {
            enabled: true,
            stages,
            quad,
            destination: None,
            destination_clear: ClearMode::Full,
            state: PrepareState::Unprepared,
            cursor: 0,
            executions: Vec::new(),
        }
    }

    fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Enabled with at least one enabled stage
    pub fn is_active(&self) -> bool {
        self.enabled && self.stages.iter().any(PostProcessingStage::is_enabled)
    }

    pub fn stages(&self) -> &[PostProcessingStage] {
        &self.stages
    }

    /// Toggling a stage here invalidates the last `prepare`
    pub fn stages_mut(&mut self) -> &mut [PostProcessingStage] {
        &mut self.stages
    }

    pub fn stage(&self, kind: StageKind) -> Option<&PostProcessingStage> {
        self.stages.iter().find(|s| s.kind() == kind)
    }

    pub fn stage_mut(&mut self, kind: StageKind) -> Option<&mut PostProcessingStage> {
        self.stages.iter_mut().find(|s| s.kind() == kind)
    }

    pub fn is_prepared(&self) -> bool {
        match &self.state {
            PrepareState::Unprepared => false,
            PrepareState::Prepared { enabled, .. } => *enabled == self.enabled_set(),
        }
    }

    fn enabled_set(&self) -> Vec<bool> {
        self.stages.iter().map(PostProcessingStage::is_enabled).collect()
    }

    /// Size enabled stages for a `width` x `height` destination. Only the
    /// first enabled stage gets a depth attachment, since the main pass
    /// renders into it. Returns `false` when nothing changed.
    pub fn prepare(&mut self, device: &mut dyn GraphicsDevice, width: u32, height: u32, needs_depth: bool) -> Result<bool> {
        let wanted = PrepareState::Prepared {
            width,
            height,
            needs_depth,
            enabled: self.enabled_set(),
        };
        if self.state == wanted {
            return Ok(false);
        }

        let mut first = true;
        for stage in self.stages.iter_mut().filter(|s| s.is_enabled()) {
            stage.init(device, width, height, first && needs_depth)?;
            first = false;
        }
        log::debug!("Prepared post-processing for {}x{} (depth: {})", width, height, needs_depth);
        self.state = wanted;
        Ok(true)
    }

    /// Final target of the chain; the last stage fully clears it
    pub fn set_destination(&mut self, destination: Arc<Framebuffer>) {
        self.destination = Some(destination);
        self.destination_clear = ClearMode::Full;
    }

    /// How the last stage clears the destination. Intermediate stage
    /// targets are always fully cleared.
    pub fn set_destination_clear(&mut self, clear: ClearMode) {
        self.destination_clear = clear;
    }

    pub fn destination_clear(&self) -> ClearMode {
        self.destination_clear
    }

    pub fn destination(&self) -> Option<&Arc<Framebuffer>> {
        self.destination.as_ref()
    }

    /// Where the main pass renders when post-processing applies
    pub fn first_input(&self) -> Option<&Arc<Framebuffer>> {
        self.stages
            .iter()
            .find(|s| s.is_enabled())
            .and_then(PostProcessingStage::input_framebuffer)
    }

    /// Rewind the stage cursor
    pub fn reset_stages(&mut self) {
        self.cursor = 0;
    }

    /// Advance the cursor to the next enabled stage
    pub fn next_stage(&mut self) -> Option<&PostProcessingStage> {
        let index = self.advance()?;
        Some(&self.stages[index])
    }

    fn advance(&mut self) -> Option<usize> {
        while self.cursor < self.stages.len() {
            let index = self.cursor;
            self.cursor += 1;
            if self.stages[index].is_enabled() {
                return Some(index);
            }
        }
        None
    }

    /// Run every enabled stage in order. Returns the number of stages run.
    pub fn render(&mut self, device: &mut dyn GraphicsDevice, context: &mut RendererContext) -> Result<usize> {
        if !self.is_prepared() {
            return Err(RenderError::PostProcessorNotPrepared(
                "stage set changed since the last prepare".into(),
            ));
        }
        let destination = self
            .destination
            .clone()
            .ok_or_else(|| RenderError::PostProcessorNotPrepared("no destination set".into()))?;

        context.apply_render_settings(device, RenderSettings::default());
        self.executions.clear();
        self.reset_stages();

        let mut current = self.advance();
        while let Some(index) = current {
            let next = self.advance();
            let (target, clear) = match next {
                Some(next) => (
                    self.stages[next]
                        .input_framebuffer()
                        .cloned()
                        .ok_or_else(|| missing_input(self.stages[next].kind()))?,
                    ClearMode::Full,
                ),
                None => (destination.clone(), self.destination_clear),
            };

            context.reset();
            let stage = &self.stages[index];
            let draws = stage.execute(device, context, &self.quad, &target, clear)?;
            self.executions.push(StageExecution {
                kind: stage.kind(),
                target: target.id(),
                draws,
            });
            current = next;
        }
        Ok(self.executions.len())
    }

    /// Stages run by the last `render`, in order
    pub fn last_executions(&self) -> &[StageExecution] {
        &self.executions
    }

    /// Release stage framebuffers and shared textures
    pub fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        for stage in &mut self.stages {
            stage.destroy(device);
        }
        self.state = PrepareState::Unprepared;
    }
}

impl fmt::Debug for PostProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessor")
            .field("enabled", &self.enabled)
            .field("stages", &self.stages.iter().map(|s| (s.kind(), s.is_enabled())).collect::<Vec<_>>())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use forge_shader::ShaderLibrary;

    fn setup(config: &PostProcessConfig) -> (HeadlessDevice, AssetManager, PostProcessor) {
        let mut device = HeadlessDevice::new();
        let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
        assets.init(&mut device).unwrap();
        let post = PostProcessor::new(&mut assets, &mut device, config).unwrap();
        (device, assets, post)
    }

    #[test]
    fn test_cursor_skips_disabled_stages() {
        let (_device, _assets, mut post) = setup(&PostProcessConfig::default());
        post.stage_mut(StageKind::Hdr).unwrap().set_enabled(false);
        post.stage_mut(StageKind::Dither).unwrap().set_enabled(true);

        post.reset_stages();
        assert_eq!(post.next_stage().map(|s| s.kind()), Some(StageKind::Bloom));
        assert_eq!(post.next_stage().map(|s| s.kind()), Some(StageKind::Dither));
        assert!(post.next_stage().is_none());
        post.reset_stages();
        assert_eq!(post.next_stage().map(|s| s.kind()), Some(StageKind::Bloom));
    }

    #[test]
    fn test_render_requires_prepare() {
        let (mut device, _assets, mut post) = setup(&PostProcessConfig::default());
        let mut context = RendererContext::new();
        post.set_destination(Framebuffer::default_target(64, 64));
        assert!(matches!(
            post.render(&mut device, &mut context),
            Err(RenderError::PostProcessorNotPrepared(_))
        ));

        post.prepare(&mut device, 64, 64, true).unwrap();
        assert_eq!(post.render(&mut device, &mut context).unwrap(), 2);

        // Enabling another stage invalidates the prepared sizes
        post.stage_mut(StageKind::Dither).unwrap().set_enabled(true);
        assert!(!post.is_prepared());
        assert!(post.render(&mut device, &mut context).is_err());
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let (mut device, _assets, mut post) = setup(&PostProcessConfig::default());
        assert!(post.prepare(&mut device, 32, 32, true).unwrap());
        let framebuffers = device.live_framebuffer_count();
        assert!(!post.prepare(&mut device, 32, 32, true).unwrap());
        assert_eq!(device.live_framebuffer_count(), framebuffers);

        assert!(post.prepare(&mut device, 64, 32, true).unwrap());
        assert_eq!(device.live_framebuffer_count(), framebuffers);
        assert_eq!(post.first_input().unwrap().width(), 64);
    }

    #[test]
    fn test_only_first_enabled_stage_has_depth() {
        let (mut device, _assets, mut post) = setup(&PostProcessConfig::default());
        post.stage_mut(StageKind::Bloom).unwrap().set_enabled(false);
        post.prepare(&mut device, 16, 16, true).unwrap();

        assert!(post.stage(StageKind::Hdr).unwrap().input_framebuffer().unwrap().supports_depth());
        post.stage_mut(StageKind::Bloom).unwrap().set_enabled(true);
        post.prepare(&mut device, 16, 16, true).unwrap();
        assert!(post.first_input().unwrap().supports_depth());
        assert!(!post.stage(StageKind::Hdr).unwrap().input_framebuffer().unwrap().supports_depth());
    }
}
