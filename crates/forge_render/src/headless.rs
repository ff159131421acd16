//! Recording graphics device
//!
//! [`HeadlessDevice`] implements [`GraphicsDevice`] without a GPU. It keeps
//! the object tables a driver would keep, validates uniform writes against
//! each program's reflected interface, and records every call so tests can
//! assert on the exact command stream.
//!
//! Rasterization is not simulated except for integer attachments: each draw
//! fills the current viewport of every `R32Sint` attachment with the
//! program's `u_EntityId`, which is enough to exercise picking.

use std::collections::{HashMap, HashSet};

use forge_shader::{CompiledShader, ShaderInterface};

use crate::context::ENTITY_ID_UNIFORM;
use crate::device::{
    CullFace, DrawMode, FramebufferId, GraphicsDevice, MeshId, PolygonMode, ProgramId, TextureId, Viewport,
};
use crate::error::{RenderError, Result};
use crate::resource::{FramebufferAllocation, FramebufferDesc, TextureDesc, TextureFormat};
use crate::uniform::UniformValue;

/// One recorded device call
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    CreateTexture(TextureId),
    DestroyTexture(TextureId),
    CreateFramebuffer(FramebufferId),
    DestroyFramebuffer(FramebufferId),
    CreateProgram(ProgramId),
    DestroyProgram(ProgramId),
    CreateMesh(MeshId),
    DestroyMesh(MeshId),
    BindFramebuffer(FramebufferId),
    SetViewport(Viewport),
    SetClearColor([f32; 4]),
    Clear(FramebufferId),
    ClearDepth(FramebufferId),
    SetPolygonMode(PolygonMode),
    SetCullFace(CullFace),
    EnableClippingPlanes(usize),
    UseProgram(ProgramId),
    SetUniform { program: ProgramId, location: String },
    BindTexture { slot: u32, texture: TextureId },
    DrawIndexed {
        program: ProgramId,
        framebuffer: FramebufferId,
        mesh: MeshId,
        index_count: u32,
    },
    ReadPixel { framebuffer: FramebufferId, attachment: usize },
}

struct ProgramRecord {
    name: String,
    interface: ShaderInterface,
    uniforms: HashMap<String, UniformValue>,
}

struct FramebufferRecord {
    desc: FramebufferDesc,
    color: Vec<TextureId>,
    depth: Option<TextureId>,
    /// Texel storage for integer attachments, indexed like `color`
    integer_texels: Vec<Option<Vec<i32>>>,
}

struct MeshRecord {
    vertex_bytes: usize,
    index_count: usize,
}

pub struct HeadlessDevice {
    next_id: u32,
    calls: Vec<DeviceCall>,
    textures: HashMap<TextureId, TextureDesc>,
    framebuffers: HashMap<FramebufferId, FramebufferRecord>,
    programs: HashMap<ProgramId, ProgramRecord>,
    meshes: HashMap<MeshId, MeshRecord>,
    failing_programs: HashSet<String>,
    uniform_errors: Vec<String>,

    bound_framebuffer: FramebufferId,
    current_program: Option<ProgramId>,
    viewport: Viewport,
    clear_color: [f32; 4],
    polygon_mode: PolygonMode,
    cull_face: CullFace,
    clipping_planes: usize,
    texture_units: HashMap<u32, TextureId>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            calls: Vec::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            meshes: HashMap::new(),
            failing_programs: HashSet::new(),
            uniform_errors: Vec::new(),
            bound_framebuffer: FramebufferId::DEFAULT,
            current_program: None,
            viewport: Viewport::default(),
            clear_color: [0.0; 4],
            polygon_mode: PolygonMode::Fill,
            cull_face: CullFace::Back,
            clipping_planes: 0,
            texture_units: HashMap::new(),
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Make `create_program` fail for shaders named `name`
    pub fn fail_program(&mut self, name: impl Into<String>) {
        self.failing_programs.insert(name.into());
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.iter().filter(|c| predicate(c)).count()
    }

    /// `(program, framebuffer, mesh)` of every recorded draw
    pub fn draws(&self) -> Vec<(ProgramId, FramebufferId, MeshId)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::DrawIndexed {
                    program,
                    framebuffer,
                    mesh,
                    ..
                } => Some((*program, *framebuffer, *mesh)),
                _ => None,
            })
            .collect()
    }

    /// Full clears recorded for one framebuffer
    pub fn clears_of(&self, framebuffer: FramebufferId) -> usize {
        self.count(|c| *c == DeviceCall::Clear(framebuffer))
    }

    pub fn depth_clears_of(&self, framebuffer: FramebufferId) -> usize {
        self.count(|c| *c == DeviceCall::ClearDepth(framebuffer))
    }

    /// Last value written to a uniform location of a program
    pub fn uniform(&self, program: ProgramId, location: &str) -> Option<&UniformValue> {
        self.programs.get(&program)?.uniforms.get(location)
    }

    /// Rejected uniform writes, formatted as `program: reason`
    pub fn uniform_errors(&self) -> &[String] {
        &self.uniform_errors
    }

    pub fn program_name(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(&program).map(|p| p.name.as_str())
    }

    pub fn live_program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn live_framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn framebuffer_desc(&self, id: FramebufferId) -> Option<&FramebufferDesc> {
        self.framebuffers.get(&id).map(|f| &f.desc)
    }

    pub fn mesh_vertex_bytes(&self, id: MeshId) -> Option<usize> {
        self.meshes.get(&id).map(|m| m.vertex_bytes)
    }

    pub fn bound_framebuffer(&self) -> FramebufferId {
        self.bound_framebuffer
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn polygon_mode(&self) -> PolygonMode {
        self.polygon_mode
    }

    pub fn cull_face(&self) -> CullFace {
        self.cull_face
    }

    pub fn clipping_planes(&self) -> usize {
        self.clipping_planes
    }

    pub fn texture_unit(&self, slot: u32) -> Option<TextureId> {
        self.texture_units.get(&slot).copied()
    }

    fn fill_integer_attachments(&mut self, value: i32) {
        let Some(record) = self.framebuffers.get_mut(&self.bound_framebuffer) else {
            return;
        };
        let width = record.desc.width;
        let height = record.desc.height;
        let viewport = self.viewport;
        for texels in record.integer_texels.iter_mut().flatten() {
            let x_end = (viewport.x + viewport.width).min(width);
            let y_end = (viewport.y + viewport.height).min(height);
            for y in viewport.y..y_end {
                for x in viewport.x..x_end {
                    texels[(y * width + x) as usize] = value;
                }
            }
        }
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_texture(&mut self, desc: &TextureDesc, _data: Option<&[u8]>) -> Result<TextureId> {
        let id = TextureId(self.allocate());
        self.textures.insert(id, desc.clone());
        self.calls.push(DeviceCall::CreateTexture(id));
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
        self.calls.push(DeviceCall::DestroyTexture(id));
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferAllocation> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::FramebufferIncomplete(format!(
                "'{}' has zero size",
                desc.label
            )));
        }
        let mut color = Vec::new();
        let mut integer_texels = Vec::new();
        for (i, format) in desc.color_attachments.iter().enumerate() {
            color.push(self.create_texture(&desc.attachment_desc(Some(i)), None)?);
            integer_texels.push(
                (*format == TextureFormat::R32Sint).then(|| vec![-1; (desc.width * desc.height) as usize]),
            );
        }
        let depth = match desc.depth_attachment {
            Some(_) => Some(self.create_texture(&desc.attachment_desc(None), None)?),
            None => None,
        };

        let id = FramebufferId(self.allocate());
        self.framebuffers.insert(
            id,
            FramebufferRecord {
                desc: desc.clone(),
                color: color.clone(),
                depth,
                integer_texels,
            },
        );
        self.calls.push(DeviceCall::CreateFramebuffer(id));
        Ok(FramebufferAllocation {
            id,
            color_attachments: color,
            depth_attachment: depth,
        })
    }

    fn destroy_framebuffer(&mut self, id: FramebufferId) {
        if let Some(record) = self.framebuffers.remove(&id) {
            for texture in record.color.into_iter().chain(record.depth) {
                self.destroy_texture(texture);
            }
        }
        if self.bound_framebuffer == id {
            self.bound_framebuffer = FramebufferId::DEFAULT;
        }
        self.calls.push(DeviceCall::DestroyFramebuffer(id));
    }

    fn create_program(&mut self, shader: &CompiledShader) -> Result<ProgramId> {
        if self.failing_programs.contains(&shader.name) {
            return Err(RenderError::ProgramLink {
                name: shader.name.clone(),
                log: "link failure requested".into(),
            });
        }
        let id = ProgramId(self.allocate());
        self.programs.insert(
            id,
            ProgramRecord {
                name: shader.name.clone(),
                interface: shader.interface.clone(),
                uniforms: HashMap::new(),
            },
        );
        self.calls.push(DeviceCall::CreateProgram(id));
        Ok(id)
    }

    fn destroy_program(&mut self, id: ProgramId) {
        self.programs.remove(&id);
        if self.current_program == Some(id) {
            self.current_program = None;
        }
        self.calls.push(DeviceCall::DestroyProgram(id));
    }

    fn create_mesh(&mut self, vertices: &[u8], stride: u32, indices: &[u32]) -> Result<MeshId> {
        if stride == 0 || vertices.len() % stride as usize != 0 {
            return Err(RenderError::InvalidResource(format!(
                "{} vertex bytes do not divide into stride {}",
                vertices.len(),
                stride
            )));
        }
        let id = MeshId(self.allocate());
        self.meshes.insert(
            id,
            MeshRecord {
                vertex_bytes: vertices.len(),
                index_count: indices.len(),
            },
        );
        self.calls.push(DeviceCall::CreateMesh(id));
        Ok(id)
    }

    fn destroy_mesh(&mut self, id: MeshId) {
        self.meshes.remove(&id);
        self.calls.push(DeviceCall::DestroyMesh(id));
    }

    fn bind_framebuffer(&mut self, id: FramebufferId) {
        self.bound_framebuffer = id;
        self.calls.push(DeviceCall::BindFramebuffer(id));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.calls.push(DeviceCall::SetViewport(viewport));
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
        self.calls.push(DeviceCall::SetClearColor(color));
    }

    fn clear(&mut self) {
        let id = self.bound_framebuffer;
        if let Some(record) = self.framebuffers.get_mut(&id) {
            for texels in record.integer_texels.iter_mut().flatten() {
                texels.fill(-1);
            }
        }
        self.calls.push(DeviceCall::Clear(id));
    }

    fn clear_depth(&mut self) {
        self.calls.push(DeviceCall::ClearDepth(self.bound_framebuffer));
    }

    fn set_polygon_mode(&mut self, mode: PolygonMode) {
        self.polygon_mode = mode;
        self.calls.push(DeviceCall::SetPolygonMode(mode));
    }

    fn set_cull_face(&mut self, cull: CullFace) {
        self.cull_face = cull;
        self.calls.push(DeviceCall::SetCullFace(cull));
    }

    fn enable_clipping_planes(&mut self, count: usize) {
        self.clipping_planes = count;
        self.calls.push(DeviceCall::EnableClippingPlanes(count));
    }

    fn use_program(&mut self, id: ProgramId) {
        self.current_program = Some(id);
        self.calls.push(DeviceCall::UseProgram(id));
    }

    fn set_uniform(&mut self, program: ProgramId, location: &str, value: &UniformValue) {
        self.calls.push(DeviceCall::SetUniform {
            program,
            location: location.to_string(),
        });
        let Some(record) = self.programs.get_mut(&program) else {
            self.uniform_errors.push(format!("{:?}: no such program", program));
            return;
        };
        let error = match record.interface.resolve(location) {
            None => Some(format!("{}: '{}' is not declared", record.name, location)),
            Some(ty) if !value.matches(ty) => Some(format!(
                "{}: '{}' is {}, got {}",
                record.name,
                location,
                ty,
                value.type_name()
            )),
            Some(_) => None,
        };
        match error {
            Some(error) => {
                log::warn!("Rejected uniform write {}", error);
                self.uniform_errors.push(error);
            }
            None => {
                record.uniforms.insert(location.to_string(), value.clone());
            }
        }
    }

    fn bind_texture(&mut self, slot: u32, texture: TextureId) {
        self.texture_units.insert(slot, texture);
        self.calls.push(DeviceCall::BindTexture { slot, texture });
    }

    fn draw_indexed(&mut self, mesh: MeshId, _mode: DrawMode, index_count: u32) {
        let program = self.current_program.unwrap_or_default();
        let entity_id = match self.uniform(program, ENTITY_ID_UNIFORM) {
            Some(UniformValue::Int(id)) => Some(*id),
            _ => None,
        };
        if let Some(record) = self.meshes.get(&mesh) {
            debug_assert!(index_count as usize <= record.index_count);
        }
        if let Some(entity_id) = entity_id {
            self.fill_integer_attachments(entity_id);
        }
        self.calls.push(DeviceCall::DrawIndexed {
            program,
            framebuffer: self.bound_framebuffer,
            mesh,
            index_count,
        });
    }

    fn read_pixel(&mut self, framebuffer: FramebufferId, attachment: usize, x: u32, y: u32) -> Result<i32> {
        self.calls.push(DeviceCall::ReadPixel { framebuffer, attachment });
        let record = self
            .framebuffers
            .get(&framebuffer)
            .ok_or(RenderError::PickUnsupported(framebuffer.raw()))?;
        let texels = record
            .integer_texels
            .get(attachment)
            .and_then(Option::as_ref)
            .ok_or(RenderError::PickUnsupported(framebuffer.raw()))?;
        if x >= record.desc.width || y >= record.desc.height {
            return Err(RenderError::InvalidResource(format!(
                "pixel ({}, {}) outside {}x{} framebuffer",
                x, y, record.desc.width, record.desc.height
            )));
        }
        Ok(texels[(y * record.desc.width + x) as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_shader::ShaderCompiler;

    #[test]
    fn test_uniform_validation() {
        let mut device = HeadlessDevice::new();
        let compiled = ShaderCompiler::default()
            .compile_str(
                "t",
                "#shader vertex\nuniform mat4 u_ModelMatrix;\nvoid main() {}\n#shader fragment\nuniform sampler2D u_Tex;\nvoid main() {}\n",
                &[],
            )
            .unwrap();
        let program = device.create_program(&compiled).unwrap();

        device.set_uniform(program, "u_ModelMatrix", &UniformValue::Mat4(glam::Mat4::IDENTITY));
        device.set_uniform(program, "u_Tex", &UniformValue::Int(3));
        assert!(device.uniform_errors().is_empty());

        device.set_uniform(program, "u_ModelMatrix", &UniformValue::Float(1.0));
        device.set_uniform(program, "u_Missing", &UniformValue::Float(1.0));
        assert_eq!(device.uniform_errors().len(), 2);
        assert_eq!(device.uniform(program, "u_Tex"), Some(&UniformValue::Int(3)));
    }

    #[test]
    fn test_framebuffer_lifecycle() {
        let mut device = HeadlessDevice::new();
        let allocation = device.create_framebuffer(&FramebufferDesc::pick(4, 4)).unwrap();
        assert_eq!(allocation.color_attachments.len(), 2);
        assert!(allocation.depth_attachment.is_some());
        assert_eq!(device.live_texture_count(), 3);
        assert_eq!(device.read_pixel(allocation.id, 1, 0, 0).unwrap(), -1);
        assert!(matches!(
            device.read_pixel(allocation.id, 0, 0, 0),
            Err(RenderError::PickUnsupported(_))
        ));

        device.destroy_framebuffer(allocation.id);
        assert_eq!(device.live_texture_count(), 0);
        assert!(device
            .create_framebuffer(&FramebufferDesc::new("empty", 0, 8).with_color(TextureFormat::Rgba8))
            .is_err());
    }
}
