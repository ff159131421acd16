//! Entity picking by integer read-back
//!
//! Pick scenes render each model's entity id into the `R32Sint` attachment
//! of a [`FramebufferDesc::pick`](crate::FramebufferDesc::pick) target.
//! Reading one texel back answers "what is under the cursor".

use crate::device::GraphicsDevice;
use crate::error::{RenderError, Result};
use crate::resource::{Framebuffer, TextureFormat};

/// Id stored where nothing was drawn
pub const NO_ENTITY: i32 = -1;

/// Index of the first integer color attachment of `target`
pub fn entity_attachment(target: &Framebuffer) -> Option<usize> {
    target
        .desc()
        .color_attachments
        .iter()
        .position(|format| *format == TextureFormat::R32Sint)
}

/// Entity drawn at pixel (`x`, `y`) of a pick target, `None` for background
pub fn pick_entity(device: &mut dyn GraphicsDevice, target: &Framebuffer, x: u32, y: u32) -> Result<Option<i32>> {
    let attachment = entity_attachment(target).ok_or(RenderError::PickUnsupported(target.id().raw()))?;
    let id = device.read_pixel(target.id(), attachment, x, y)?;
    Ok((id != NO_ENTITY).then_some(id))
}
