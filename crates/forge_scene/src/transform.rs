//! Hierarchical transforms
//!
//! Transforms live in a [`TransformTree`] arena and are addressed by
//! generational [`TransformId`] handles. Parent and child links are stored
//! on both ends so detaching and orphaning stay O(children).
//!
//! Each node caches its local matrix and the inverse of it. The cache is
//! rebuilt on the first access after a mutation. World matrices fold the
//! ancestor chain on every call and are never cached, so a moved parent is
//! picked up by its children without any propagation pass. What does
//! propagate is the `changed` mark, which tells consumers that a node's
//! world matrix moved since they last looked.
//!
//! # Example
//!
//! ```ignore
//! use forge_scene::transform::{Transform, TransformTree};
//!
//! let mut tree = TransformTree::new();
//! let parent = tree.insert(Transform::from_translation(Vec3::new(10.0, 0.0, 0.0)));
//! let child = tree.insert(Transform::from_translation(Vec3::new(5.0, 0.0, 0.0)));
//! tree.set_parent(child, Some(parent))?;
//!
//! // (15, 0, 0)
//! let world = tree.matrix(child).unwrap().w_axis.truncate();
//! ```

use core::cell::Cell;
use core::fmt;

use forge_core::{Handle, HandleMap};
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::HierarchyError;

pub type TransformId = Handle<TransformNode>;

type HierarchyResult<T> = core::result::Result<T, HierarchyError>;

/// Reference frame for [`TransformTree::rotate`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Space {
    World,
    #[default]
    Local,
}

// ============================================================================
// Transform
// ============================================================================

/// Local translation, rotation and scale
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn from_rotation(rotation: Quat) -> Self {
        Self {
            rotation,
            ..Self::IDENTITY
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Eye at `eye` looking at `target`
    pub fn looking_at(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let view = Mat4::look_at_rh(eye, target, up);
        let (_, rotation, _) = view.inverse().to_scale_rotation_translation();
        Self {
            position: eye,
            rotation,
            scale: Vec3::ONE,
        }
    }

    /// `T * R * S`, with `R` mirrored about the XZ plane when `flip_x` is set
    pub fn compute_matrix(&self, flip_x: bool) -> Mat4 {
        Mat4::from_translation(self.position) * rotation_matrix(self.rotation, flip_x) * Mat4::from_scale(self.scale)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }
}

fn rotation_matrix(rotation: Quat, flip_x: bool) -> Mat4 {
    let matrix = Mat4::from_quat(rotation);
    if flip_x {
        let flip = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0));
        flip * matrix * flip
    } else {
        matrix
    }
}

// ============================================================================
// Tree nodes
// ============================================================================

#[derive(Clone, Copy)]
struct LocalMatrices {
    matrix: Mat4,
    inverse: Mat4,
}

/// One node of a [`TransformTree`]
pub struct TransformNode {
    local: Transform,
    flip_x: bool,
    /// `None` while stale
    cache: Cell<Option<LocalMatrices>>,
    changed: bool,
    parent: Option<TransformId>,
    children: Vec<TransformId>,
}

impl TransformNode {
    fn new(local: Transform) -> Self {
        Self {
            local,
            flip_x: false,
            cache: Cell::new(None),
            changed: true,
            parent: None,
            children: Vec::new(),
        }
    }

    fn matrices(&self) -> LocalMatrices {
        if let Some(cached) = self.cache.get() {
            return cached;
        }
        let matrix = self.local.compute_matrix(self.flip_x);
        let computed = LocalMatrices {
            matrix,
            inverse: matrix.inverse(),
        };
        self.cache.set(Some(computed));
        computed
    }

    pub fn local(&self) -> &Transform {
        &self.local
    }

    pub fn parent(&self) -> Option<TransformId> {
        self.parent
    }

    pub fn children(&self) -> &[TransformId] {
        &self.children
    }

    pub fn is_flipped(&self) -> bool {
        self.flip_x
    }
}

impl fmt::Debug for TransformNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformNode")
            .field("local", &self.local)
            .field("flip_x", &self.flip_x)
            .field("cached", &self.cache.get().is_some())
            .field("changed", &self.changed)
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .finish()
    }
}

// ============================================================================
// TransformTree
// ============================================================================

/// Arena of hierarchical transforms
#[derive(Default)]
pub struct TransformTree {
    nodes: HandleMap<TransformNode>,
}

impl TransformTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, local: Transform) -> TransformId {
        self.nodes.insert(TransformNode::new(local))
    }

    /// Remove a node
    ///
    /// The node is detached from its parent. Its children become roots and
    /// are marked changed. The slot generation is bumped so `id` and every
    /// copy of it stop resolving.
    pub fn destroy(&mut self, id: TransformId) -> HierarchyResult<Transform> {
        let node = self.nodes.remove(id).ok_or(HierarchyError::InvalidHandle(id))?;
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|c| *c != id);
        }
        for child in &node.children {
            if let Some(child_node) = self.nodes.get_mut(*child) {
                child_node.parent = None;
            }
            self.mark_changed(*child);
        }
        log::trace!("Destroyed transform {:?}, orphaned {} children", id, node.children.len());
        Ok(node.local)
    }

    pub fn contains(&self, id: TransformId) -> bool {
        self.nodes.contains(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: TransformId) -> Option<&TransformNode> {
        self.nodes.get(id)
    }

    /// Nodes without a parent
    pub fn roots(&self) -> impl Iterator<Item = TransformId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(id, _)| id)
    }

    fn node_mut(&mut self, id: TransformId) -> HierarchyResult<&mut TransformNode> {
        self.nodes.get_mut(id).ok_or(HierarchyError::InvalidHandle(id))
    }

    // ========================================================================
    // Local state
    // ========================================================================

    pub fn local(&self, id: TransformId) -> Option<&Transform> {
        self.nodes.get(id).map(|node| &node.local)
    }

    pub fn set_local(&mut self, id: TransformId, local: Transform) -> HierarchyResult<()> {
        self.modify(id, |node| node.local = local)
    }

    pub fn set_local_position(&mut self, id: TransformId, position: Vec3) -> HierarchyResult<()> {
        self.modify(id, |node| node.local.position = position)
    }

    pub fn set_local_rotation(&mut self, id: TransformId, rotation: Quat) -> HierarchyResult<()> {
        self.modify(id, |node| node.local.rotation = rotation)
    }

    pub fn set_local_scale(&mut self, id: TransformId, scale: Vec3) -> HierarchyResult<()> {
        self.modify(id, |node| node.local.scale = scale)
    }

    pub fn translate(&mut self, id: TransformId, translation: Vec3) -> HierarchyResult<()> {
        self.modify(id, |node| node.local.position += translation)
    }

    /// Post-multiply the local rotation
    pub fn rotate_by(&mut self, id: TransformId, rotation: Quat) -> HierarchyResult<()> {
        self.modify(id, |node| node.local.rotation = node.local.rotation * rotation)
    }

    /// Rotate by `angle` radians about `axis`
    ///
    /// With [`Space::World`] the axis is first brought into the node's local
    /// frame through the inverse local rotation. A zero axis leaves the
    /// rotation untouched.
    pub fn rotate(&mut self, id: TransformId, angle: f32, axis: Vec3, space: Space) -> HierarchyResult<()> {
        self.modify(id, |node| {
            let axis = match space {
                Space::World => node.local.rotation.inverse() * axis,
                Space::Local => axis,
            };
            let axis = axis.normalize_or_zero();
            if axis != Vec3::ZERO {
                node.local.rotation = node.local.rotation * Quat::from_axis_angle(axis, angle);
            }
        })
    }

    /// Component-wise multiply the local scale
    pub fn scale_by(&mut self, id: TransformId, scale: Vec3) -> HierarchyResult<()> {
        self.modify(id, |node| node.local.scale *= scale)
    }

    /// Mirror the rotation about the XZ plane
    pub fn flip_x(&mut self, id: TransformId) -> HierarchyResult<()> {
        self.modify(id, |node| node.flip_x = true)
    }

    fn modify(&mut self, id: TransformId, f: impl FnOnce(&mut TransformNode)) -> HierarchyResult<()> {
        let node = self.node_mut(id)?;
        f(node);
        node.cache.set(None);
        self.mark_changed(id);
        Ok(())
    }

    // ========================================================================
    // Directions
    // ========================================================================

    pub fn forward(&self, id: TransformId) -> Option<Vec3> {
        self.local(id).map(Transform::forward)
    }

    pub fn right(&self, id: TransformId) -> Option<Vec3> {
        self.local(id).map(Transform::right)
    }

    pub fn up(&self, id: TransformId) -> Option<Vec3> {
        self.local(id).map(Transform::up)
    }

    // ========================================================================
    // Matrices
    // ========================================================================

    pub fn local_matrix(&self, id: TransformId) -> Option<Mat4> {
        self.nodes.get(id).map(|node| node.matrices().matrix)
    }

    pub fn local_inverse_matrix(&self, id: TransformId) -> Option<Mat4> {
        self.nodes.get(id).map(|node| node.matrices().inverse)
    }

    /// Whether the local cache has to be rebuilt on next access
    pub fn is_dirty(&self, id: TransformId) -> Option<bool> {
        self.nodes.get(id).map(|node| node.cache.get().is_none())
    }

    /// World matrix, `parent.matrix() * local`
    pub fn matrix(&self, id: TransformId) -> Option<Mat4> {
        let node = self.nodes.get(id)?;
        let mut matrix = node.matrices().matrix;
        let mut current = node.parent;
        while let Some(parent) = current.and_then(|p| self.nodes.get(p)) {
            matrix = parent.matrices().matrix * matrix;
            current = parent.parent;
        }
        Some(matrix)
    }

    /// Inverse world matrix, `local_inverse * parent.inverse_matrix()`
    pub fn inverse_matrix(&self, id: TransformId) -> Option<Mat4> {
        let node = self.nodes.get(id)?;
        let mut inverse = node.matrices().inverse;
        let mut current = node.parent;
        while let Some(parent) = current.and_then(|p| self.nodes.get(p)) {
            inverse *= parent.matrices().inverse;
            current = parent.parent;
        }
        Some(inverse)
    }

    pub fn world_position(&self, id: TransformId) -> Option<Vec3> {
        self.matrix(id).map(|m| m.w_axis.truncate())
    }

    // ========================================================================
    // Change tracking
    // ========================================================================

    /// Whether the world matrix moved since the last [`clear_changed`](Self::clear_changed)
    pub fn has_changed(&self, id: TransformId) -> Option<bool> {
        self.nodes.get(id).map(|node| node.changed)
    }

    pub fn clear_changed(&mut self) {
        for (_, node) in self.nodes.iter_mut() {
            node.changed = false;
        }
    }

    /// Mark `id` and every descendant changed
    fn mark_changed(&mut self, id: TransformId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current) {
                node.changed = true;
                stack.extend_from_slice(&node.children);
            }
        }
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    pub fn parent(&self, id: TransformId) -> Option<TransformId> {
        self.nodes.get(id)?.parent
    }

    pub fn children(&self, id: TransformId) -> Option<&[TransformId]> {
        self.nodes.get(id).map(|node| node.children.as_slice())
    }

    /// Whether `ancestor` appears on the parent chain of `id`
    pub fn is_ancestor(&self, ancestor: TransformId, id: TransformId) -> bool {
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent(parent);
        }
        false
    }

    /// Every transitive child of `id`, depth first
    pub fn descendants(&self, id: TransformId) -> Vec<TransformId> {
        let mut result = Vec::new();
        let mut stack: Vec<TransformId> = self.children(id).map(<[_]>::to_vec).unwrap_or_default();
        while let Some(current) = stack.pop() {
            result.push(current);
            if let Some(children) = self.children(current) {
                stack.extend_from_slice(children);
            }
        }
        result
    }

    /// Reparent `id`, or detach it with `None`
    ///
    /// Parenting a node to itself, to its current parent, or to one of its
    /// own descendants leaves the tree untouched.
    ///
    /// # Errors
    ///
    /// [`HierarchyError::InvalidHandle`] when `id` or `parent` is stale.
    pub fn set_parent(&mut self, id: TransformId, parent: Option<TransformId>) -> HierarchyResult<()> {
        let current = self.nodes.get(id).ok_or(HierarchyError::InvalidHandle(id))?.parent;
        if let Some(parent) = parent {
            if !self.nodes.contains(parent) {
                return Err(HierarchyError::InvalidHandle(parent));
            }
            if parent == id || self.is_ancestor(id, parent) {
                log::debug!("Ignoring set_parent({:?}, {:?}): would create a cycle", id, parent);
                return Ok(());
            }
        }
        if current == parent {
            return Ok(());
        }

        if let Some(old) = current.and_then(|p| self.nodes.get_mut(p)) {
            old.children.retain(|c| *c != id);
        }
        if let Some(new) = parent.and_then(|p| self.nodes.get_mut(p)) {
            new.children.push(id);
        }
        self.node_mut(id)?.parent = parent;
        self.mark_changed(id);
        Ok(())
    }
}

impl fmt::Debug for TransformTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformTree")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
