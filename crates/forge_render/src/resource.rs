//! GPU resource descriptions and shared resource wrappers
//!
//! Resources are created through a [`GraphicsDevice`] and shared with `Arc`.
//! Identity comparisons (cleared-framebuffer tracking, requirement caches)
//! use the device ids, never pointer addresses.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::{FramebufferId, GraphicsDevice, TextureId};
use crate::error::{RenderError, Result};

/// Texture storage format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    R8,
    Rgba8,
    Rgba16Float,
    /// Integer attachment used by the pick pass
    R32Sint,
    Depth24Stencil8,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, Self::Depth24Stencil8 | Self::Depth32Float)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::R32Sint)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rgba8 | Self::R32Sint | Self::Depth24Stencil8 | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureKind {
    Texture2D,
    Cubemap,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub kind: TextureKind,
}

impl TextureDesc {
    pub fn new_2d(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
            kind: TextureKind::Texture2D,
        }
    }

    pub fn cubemap(mut self) -> Self {
        self.kind = TextureKind::Cubemap;
        self
    }

    /// Expected size of initial pixel data
    pub fn byte_len(&self) -> usize {
        let faces = match self.kind {
            TextureKind::Texture2D => 1,
            TextureKind::Cubemap => 6,
        };
        (self.width * self.height * self.format.bytes_per_pixel()) as usize * faces
    }
}

/// A device texture
#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    desc: TextureDesc,
}

impl Texture {
    pub fn create(
        device: &mut dyn GraphicsDevice,
        desc: TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<Arc<Texture>> {
        if let Some(data) = data {
            if data.len() != desc.byte_len() {
                return Err(RenderError::InvalidResource(format!(
                    "texture '{}' expects {} bytes, got {}",
                    desc.label,
                    desc.byte_len(),
                    data.len()
                )));
            }
        }
        let id = device.create_texture(&desc, data)?;
        Ok(Arc::new(Self { id, desc }))
    }

    /// Wrap a texture the device allocated on our behalf
    pub(crate) fn from_raw(id: TextureId, desc: TextureDesc) -> Self {
        Self { id, desc }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn label(&self) -> &str {
        &self.desc.label
    }

    pub fn kind(&self) -> TextureKind {
        self.desc.kind
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Texture {}

/// Attachment layout requested from the device
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FramebufferDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub color_attachments: Vec<TextureFormat>,
    pub depth_attachment: Option<TextureFormat>,
    pub kind: TextureKind,
}

impl FramebufferDesc {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            color_attachments: Vec::new(),
            depth_attachment: None,
            kind: TextureKind::Texture2D,
        }
    }

    pub fn with_color(mut self, format: TextureFormat) -> Self {
        self.color_attachments.push(format);
        self
    }

    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth_attachment = Some(format);
        self
    }

    pub fn cubemap(mut self) -> Self {
        self.kind = TextureKind::Cubemap;
        self
    }

    /// Depth-only cubemap a point light renders its shadow into
    pub fn point_shadow(size: u32) -> Self {
        Self::new("point_shadow", size, size)
            .with_depth(TextureFormat::Depth32Float)
            .cubemap()
    }

    /// Depth-only 2D target for directional and spot shadows
    pub fn directional_shadow(size: u32) -> Self {
        Self::new("directional_shadow", size, size).with_depth(TextureFormat::Depth32Float)
    }

    /// Color, entity-id and depth attachments for the pick pass
    pub fn pick(width: u32, height: u32) -> Self {
        Self::new("pick", width, height)
            .with_color(TextureFormat::Rgba8)
            .with_color(TextureFormat::R32Sint)
            .with_depth(TextureFormat::Depth24Stencil8)
    }

    pub(crate) fn attachment_desc(&self, index: Option<usize>) -> TextureDesc {
        let (suffix, format) = match index {
            Some(i) => (format!("color{}", i), self.color_attachments[i]),
            None => (
                "depth".to_string(),
                self.depth_attachment.unwrap_or(TextureFormat::Depth24Stencil8),
            ),
        };
        TextureDesc {
            label: format!("{}.{}", self.label, suffix),
            width: self.width,
            height: self.height,
            format,
            kind: self.kind,
        }
    }
}

/// Ids handed back by the device for a new framebuffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferAllocation {
    pub id: FramebufferId,
    pub color_attachments: Vec<TextureId>,
    pub depth_attachment: Option<TextureId>,
}

/// A render target with its attachments
pub struct Framebuffer {
    id: FramebufferId,
    desc: FramebufferDesc,
    color_attachments: Vec<Arc<Texture>>,
    depth_attachment: Option<Arc<Texture>>,
}

impl Framebuffer {
    pub fn create(device: &mut dyn GraphicsDevice, desc: FramebufferDesc) -> Result<Arc<Framebuffer>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::FramebufferIncomplete(format!(
                "'{}' has zero size {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
            return Err(RenderError::FramebufferIncomplete(format!(
                "'{}' has no attachments",
                desc.label
            )));
        }

        let allocation = device.create_framebuffer(&desc)?;
        let color_attachments = allocation
            .color_attachments
            .iter()
            .enumerate()
            .map(|(i, id)| Arc::new(Texture::from_raw(*id, desc.attachment_desc(Some(i)))))
            .collect();
        let depth_attachment = allocation
            .depth_attachment
            .map(|id| Arc::new(Texture::from_raw(id, desc.attachment_desc(None))));

        log::debug!(
            "Created framebuffer '{}' {}x{} ({:?})",
            desc.label,
            desc.width,
            desc.height,
            allocation.id
        );
        Ok(Arc::new(Self {
            id: allocation.id,
            desc,
            color_attachments,
            depth_attachment,
        }))
    }

    /// The window's default framebuffer; owned by the device, never created
    pub fn default_target(width: u32, height: u32) -> Arc<Framebuffer> {
        Arc::new(Self {
            id: FramebufferId::DEFAULT,
            desc: FramebufferDesc::new("default", width, height)
                .with_color(TextureFormat::Rgba8)
                .with_depth(TextureFormat::Depth24Stencil8),
            color_attachments: Vec::new(),
            depth_attachment: None,
        })
    }

    /// Release the device objects. The default target is left alone.
    pub fn destroy(&self, device: &mut dyn GraphicsDevice) {
        if !self.is_default() {
            device.destroy_framebuffer(self.id);
        }
    }

    pub fn id(&self) -> FramebufferId {
        self.id
    }

    pub fn desc(&self) -> &FramebufferDesc {
        &self.desc
    }

    pub fn is_default(&self) -> bool {
        self.id == FramebufferId::DEFAULT
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn aspect(&self) -> f32 {
        self.desc.width as f32 / self.desc.height as f32
    }

    pub fn supports_depth(&self) -> bool {
        self.desc.depth_attachment.is_some()
    }

    pub fn is_cubemap(&self) -> bool {
        self.desc.kind == TextureKind::Cubemap
    }

    pub fn color_attachment(&self, index: usize) -> Option<&Arc<Texture>> {
        self.color_attachments.get(index)
    }

    pub fn color_attachments(&self) -> &[Arc<Texture>] {
        &self.color_attachments
    }

    pub fn depth_attachment(&self) -> Option<&Arc<Texture>> {
        self.depth_attachment.as_ref()
    }

    /// Whether this target already matches a size and depth requirement
    pub fn matches(&self, width: u32, height: u32, with_depth: bool) -> bool {
        self.desc.width == width && self.desc.height == height && self.supports_depth() == with_depth
    }
}

impl fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framebuffer")
            .field("id", &self.id)
            .field("label", &self.desc.label)
            .field("size", &(self.desc.width, self.desc.height))
            .field("kind", &self.desc.kind)
            .finish()
    }
}
