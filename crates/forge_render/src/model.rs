//! Drawable models

use std::sync::Arc;

use glam::Mat4;

use crate::material::Material;
use crate::mesh::Mesh;

/// One mesh drawn with one material at a transform relative to its model
#[derive(Clone, Debug)]
pub struct SubModel {
    pub mesh: Arc<Mesh>,
    pub material: Arc<Material>,
    pub transform: Mat4,
}

impl SubModel {
    pub fn new(mesh: Arc<Mesh>, material: Arc<Material>) -> Self {
        Self {
            mesh,
            material,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct Model {
    pub sub_models: Vec<SubModel>,
}

impl Model {
    pub fn new(sub_models: Vec<SubModel>) -> Self {
        Self { sub_models }
    }

    /// Model made of a single mesh/material pair
    pub fn single(mesh: Arc<Mesh>, material: Arc<Material>) -> Self {
        Self::new(vec![SubModel::new(mesh, material)])
    }

    pub fn push(&mut self, sub_model: SubModel) {
        self.sub_models.push(sub_model);
    }

    pub fn len(&self) -> usize {
        self.sub_models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_models.is_empty()
    }
}
