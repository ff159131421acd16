//! Indexed meshes and skinning poses

use std::fmt;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use parking_lot::RwLock;

use crate::context::{ShaderRequirements, JOINT_TRANSFORMS_UNIFORM};
use crate::device::{DrawMode, GraphicsDevice, MeshId};
use crate::error::{RenderError, Result};
use crate::shader::Shader;
use crate::uniform::UniformValue;

/// Interleaved vertex layout shared by every engine mesh
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coord: [f32; 2],
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coord,
            ..Default::default()
        }
    }
}

pub struct Mesh {
    id: MeshId,
    draw_mode: DrawMode,
    index_count: u32,
    joint_count: Option<usize>,
    pose: RwLock<Vec<Mat4>>,
}

impl Mesh {
    pub fn create(
        device: &mut dyn GraphicsDevice,
        vertices: &[Vertex],
        indices: &[u32],
        draw_mode: DrawMode,
    ) -> Result<Arc<Mesh>> {
        Self::build(device, vertices, indices, draw_mode, None)
    }

    /// Mesh skinned by `joint_count` joints, starting in the identity pose
    pub fn create_skinned(
        device: &mut dyn GraphicsDevice,
        vertices: &[Vertex],
        indices: &[u32],
        joint_count: usize,
    ) -> Result<Arc<Mesh>> {
        Self::build(device, vertices, indices, DrawMode::Triangles, Some(joint_count))
    }

    fn build(
        device: &mut dyn GraphicsDevice,
        vertices: &[Vertex],
        indices: &[u32],
        draw_mode: DrawMode,
        joint_count: Option<usize>,
    ) -> Result<Arc<Mesh>> {
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(RenderError::InvalidResource(format!(
                "index {} out of range for {} vertices",
                bad,
                vertices.len()
            )));
        }
        let id = device.create_mesh(bytemuck::cast_slice(vertices), Vertex::STRIDE, indices)?;
        Ok(Arc::new(Self {
            id,
            draw_mode,
            index_count: indices.len() as u32,
            joint_count,
            pose: RwLock::new(vec![Mat4::IDENTITY; joint_count.unwrap_or(0)]),
        }))
    }

    /// Unit cube centered on the origin
    pub fn cube(device: &mut dyn GraphicsDevice) -> Result<Arc<Mesh>> {
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]),
            ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 1.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0, 0.0]),
            ([0.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, up, right) in faces {
            let base = vertices.len() as u32;
            for (u, v) in [(0.0, 1.0), (0.0, 0.0), (1.0, 0.0), (1.0, 1.0)] {
                let position = std::array::from_fn(|i| {
                    0.5 * normal[i] + (u - 0.5) * right[i] + (v - 0.5) * up[i]
                });
                vertices.push(Vertex::new(position, normal, [u, v]));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::create(device, &vertices, &indices, DrawMode::Triangles)
    }

    /// Full-screen quad in clip space
    pub fn quad(device: &mut dyn GraphicsDevice) -> Result<Arc<Mesh>> {
        let vertices = [
            Vertex::new([-1.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
            Vertex::new([-1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
            Vertex::new([1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
            Vertex::new([1.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0]),
        ];
        Self::create(device, &vertices, &[0, 1, 2, 0, 2, 3], DrawMode::Triangles)
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn draw_mode(&self) -> DrawMode {
        self.draw_mode
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn is_animated(&self) -> bool {
        self.joint_count.is_some()
    }

    pub fn joint_count(&self) -> Option<usize> {
        self.joint_count
    }

    /// Whether a pose of `joint_count` joints fits this mesh's skeleton
    pub fn is_compatible(&self, joint_count: usize) -> bool {
        self.joint_count == Some(joint_count)
    }

    /// Replace the joint transforms. An incompatible pose is rejected and
    /// the mesh falls back to the identity pose.
    pub fn set_pose(&self, transforms: &[Mat4]) -> bool {
        let mut pose = self.pose.write();
        if !self.is_compatible(transforms.len()) {
            log::warn!(
                "Pose with {} joints does not fit mesh {:?} ({:?} joints), using identity pose",
                transforms.len(),
                self.id,
                self.joint_count
            );
            pose.iter_mut().for_each(|m| *m = Mat4::IDENTITY);
            return false;
        }
        pose.copy_from_slice(transforms);
        true
    }

    pub fn pose(&self) -> Vec<Mat4> {
        self.pose.read().clone()
    }

    /// Upload per-mesh uniforms, currently the skinning pose
    pub fn apply(&self, device: &mut dyn GraphicsDevice, shader: &Shader, requirements: ShaderRequirements) {
        if !self.is_animated() || !requirements.contains(ShaderRequirements::ANIMATION) {
            return;
        }
        for (i, transform) in self.pose.read().iter().enumerate() {
            shader.set_uniform(
                device,
                &format!("{}[{}]", JOINT_TRANSFORMS_UNIFORM, i),
                &UniformValue::Mat4(*transform),
            );
        }
    }

    pub fn destroy(&self, device: &mut dyn GraphicsDevice) {
        device.destroy_mesh(self.id);
    }
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("id", &self.id)
            .field("draw_mode", &self.draw_mode)
            .field("index_count", &self.index_count)
            .field("joint_count", &self.joint_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use glam::Vec3;

    #[test]
    fn test_cube_geometry() {
        let mut device = HeadlessDevice::new();
        let cube = Mesh::cube(&mut device).unwrap();
        assert_eq!(cube.index_count(), 36);
        assert!(!cube.is_animated());
        assert_eq!(device.mesh_vertex_bytes(cube.id()), Some(24 * Vertex::STRIDE as usize));
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let mut device = HeadlessDevice::new();
        let result = Mesh::create(&mut device, &[Vertex::default()], &[0, 1, 0], DrawMode::Triangles);
        assert!(matches!(result, Err(RenderError::InvalidResource(_))));
    }

    #[test]
    fn test_incompatible_pose_keeps_identity() {
        let mut device = HeadlessDevice::new();
        let mesh = Mesh::create_skinned(&mut device, &[Vertex::default(); 3], &[0, 1, 2], 2).unwrap();

        let moved = Mat4::from_translation(Vec3::X);
        assert!(mesh.set_pose(&[moved, moved]));
        assert_eq!(mesh.pose(), vec![moved, moved]);

        assert!(!mesh.set_pose(&[moved; 3]));
        assert_eq!(mesh.pose(), vec![Mat4::IDENTITY; 2]);
    }
}
