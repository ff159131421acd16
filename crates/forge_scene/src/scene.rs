//! Entity store and scene driver
//!
//! The [`Scene`] owns entity records and the transform arena. Entities
//! iterate in insertion order, which is also the order their models are
//! submitted to the renderer.
//!
//! Rendering walks the cameras by ascending priority. For every camera it
//! gathers the lights visible on the camera's layers, opens a renderer
//! scene, queues every visible model at its world matrix and closes the
//! scene again.
//!
//! # Example
//!
//! ```ignore
//! use forge_scene::prelude::*;
//!
//! let mut scene = Scene::new();
//! let camera = scene.spawn_at("Camera", Transform::looking_at(eye, Vec3::ZERO, Vec3::Y));
//! scene.insert_camera(camera, CameraComponent::default())?;
//!
//! let cube = scene.spawn("Cube");
//! scene.insert_model(cube, ModelRendererComponent::new(model))?;
//!
//! scene.render(&mut renderer, &mut device, &target)?;
//! let stats = renderer.flush();
//! ```

use std::sync::Arc;

use forge_core::{HandleMap, LayerMask};
use forge_render::{
    pick_entity, CameraData, Framebuffer, GraphicsDevice, LightSource, Renderer3D, MAX_LIGHT_COUNT, NO_ENTITY,
};

use crate::components::{CameraComponent, LightComponent, ModelRendererComponent};
use crate::entity::{Entity, EntityRecord};
use crate::error::{Result, SceneError};
use crate::transform::{Transform, TransformId, TransformTree};

const PICK_INDEX_BITS: u32 = 20;
const PICK_INDEX_MASK: u32 = (1 << PICK_INDEX_BITS) - 1;
const PICK_GENERATION_MASK: u32 = (1 << (31 - PICK_INDEX_BITS)) - 1;

#[derive(Default)]
pub struct Scene {
    entities: HandleMap<EntityRecord>,
    order: Vec<Entity>,
    transforms: TransformTree,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Entities
    // ========================================================================

    pub fn spawn(&mut self, name: impl Into<String>) -> Entity {
        self.spawn_at(name, Transform::IDENTITY)
    }

    pub fn spawn_at(&mut self, name: impl Into<String>, transform: Transform) -> Entity {
        let name = name.into();
        let transform = self.transforms.insert(transform);
        log::trace!("Spawned entity '{}'", name);
        let entity = self.entities.insert(EntityRecord::new(name, transform));
        self.order.push(entity);
        entity
    }

    /// Remove an entity and its components
    ///
    /// Child entities stay alive as hierarchy roots. A light's shadow target
    /// is released on `device`.
    pub fn despawn(&mut self, entity: Entity, device: &mut dyn GraphicsDevice) -> Result<()> {
        let mut record = self.entities.remove(entity).ok_or(SceneError::EntityNotFound(entity))?;
        self.order.retain(|e| *e != entity);
        self.transforms.destroy(record.transform)?;
        if let Some(light) = record.light.as_mut() {
            light.disable_shadows(device);
        }
        log::trace!("Despawned entity '{}'", record.name);
        Ok(())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.contains(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Live entities in insertion order
    pub fn entities(&self) -> impl Iterator<Item = (Entity, &EntityRecord)> + '_ {
        self.order
            .iter()
            .filter_map(|e| self.entities.get(*e).map(|record| (*e, record)))
    }

    pub fn get(&self, entity: Entity) -> Option<&EntityRecord> {
        self.entities.get(entity)
    }

    pub fn find_by_name(&self, name: &str) -> Option<Entity> {
        self.entities()
            .find(|(_, record)| record.name == name)
            .map(|(entity, _)| entity)
    }

    fn record_mut(&mut self, entity: Entity) -> Result<&mut EntityRecord> {
        self.entities.get_mut(entity).ok_or(SceneError::EntityNotFound(entity))
    }

    pub fn rename(&mut self, entity: Entity, name: impl Into<String>) -> Result<()> {
        self.record_mut(entity)?.name = name.into();
        Ok(())
    }

    /// Disabled entities are neither rendered nor lit
    pub fn set_enabled(&mut self, entity: Entity, enabled: bool) -> Result<()> {
        self.record_mut(entity)?.enabled = enabled;
        Ok(())
    }

    pub fn set_layer(&mut self, entity: Entity, layer: LayerMask) -> Result<()> {
        self.record_mut(entity)?.layer = layer;
        Ok(())
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    pub fn transforms(&self) -> &TransformTree {
        &self.transforms
    }

    pub fn transforms_mut(&mut self) -> &mut TransformTree {
        &mut self.transforms
    }

    pub fn transform_id(&self, entity: Entity) -> Option<TransformId> {
        self.entities.get(entity).map(|record| record.transform)
    }

    /// Parent `entity` under `parent`, or make it a root with `None`
    ///
    /// Cycles are ignored the same way [`TransformTree::set_parent`] ignores
    /// them.
    pub fn set_parent(&mut self, entity: Entity, parent: Option<Entity>) -> Result<()> {
        let child = self.transform_id(entity).ok_or(SceneError::EntityNotFound(entity))?;
        let parent = match parent {
            Some(p) => Some(self.transform_id(p).ok_or(SceneError::EntityNotFound(p))?),
            None => None,
        };
        self.transforms.set_parent(child, parent)?;
        Ok(())
    }

    /// Entity owning the parent transform of `entity`
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        let parent = self.transforms.parent(self.transform_id(entity)?)?;
        self.entities()
            .find(|(_, record)| record.transform == parent)
            .map(|(e, _)| e)
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// Attach a camera, returning the one it replaces
    pub fn insert_camera(&mut self, entity: Entity, camera: CameraComponent) -> Result<Option<CameraComponent>> {
        Ok(self.record_mut(entity)?.camera.replace(camera))
    }

    pub fn camera_mut(&mut self, entity: Entity) -> Option<&mut CameraComponent> {
        self.entities.get_mut(entity)?.camera.as_mut()
    }

    pub fn remove_camera(&mut self, entity: Entity) -> Option<CameraComponent> {
        self.entities.get_mut(entity)?.camera.take()
    }

    /// Attach a light. A replaced light releases its shadow target.
    pub fn insert_light(
        &mut self,
        entity: Entity,
        light: LightComponent,
        device: &mut dyn GraphicsDevice,
    ) -> Result<()> {
        if let Some(mut old) = self.record_mut(entity)?.light.replace(light) {
            old.disable_shadows(device);
        }
        Ok(())
    }

    pub fn light_mut(&mut self, entity: Entity) -> Option<&mut LightComponent> {
        self.entities.get_mut(entity)?.light.as_mut()
    }

    pub fn remove_light(&mut self, entity: Entity, device: &mut dyn GraphicsDevice) -> Option<LightComponent> {
        let mut light = self.entities.get_mut(entity)?.light.take()?;
        light.disable_shadows(device);
        Some(light)
    }

    /// Turn a light's shadow pass on or off
    pub fn set_light_shadows(
        &mut self,
        entity: Entity,
        enabled: bool,
        renderer: &Renderer3D,
        device: &mut dyn GraphicsDevice,
    ) -> Result<()> {
        let light = self
            .light_mut(entity)
            .ok_or(SceneError::MissingComponent { entity, component: "light" })?;
        if enabled {
            light.enable_shadows(renderer, device)?;
        } else {
            light.disable_shadows(device);
        }
        Ok(())
    }

    pub fn insert_model(
        &mut self,
        entity: Entity,
        model: ModelRendererComponent,
    ) -> Result<Option<ModelRendererComponent>> {
        Ok(self.record_mut(entity)?.model.replace(model))
    }

    pub fn model_mut(&mut self, entity: Entity) -> Option<&mut ModelRendererComponent> {
        self.entities.get_mut(entity)?.model.as_mut()
    }

    pub fn remove_model(&mut self, entity: Entity) -> Option<ModelRendererComponent> {
        self.entities.get_mut(entity)?.model.take()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Enabled cameras, lowest priority first; ties keep insertion order
    pub fn cameras(&self) -> Vec<Entity> {
        let mut cameras: Vec<(i32, Entity)> = self
            .entities()
            .filter(|(_, record)| record.enabled)
            .filter_map(|(e, record)| record.camera.as_ref().map(|c| (c.priority, e)))
            .collect();
        cameras.sort_by_key(|(priority, _)| *priority);
        cameras.into_iter().map(|(_, e)| e).collect()
    }

    /// Lights visible on `mask`, placed at their world transforms
    ///
    /// At most `MAX_LIGHT_COUNT` lights are returned. Extra lights are
    /// dropped in insertion order.
    pub fn collect_lights(&self, mask: LayerMask) -> Vec<LightSource> {
        let mut lights: Vec<LightSource> = self
            .entities()
            .filter(|(_, record)| record.visible_to(mask))
            .filter_map(|(_, record)| {
                let light = record.light.as_ref()?;
                let world = self.transforms.matrix(record.transform)?;
                Some(light.to_light_source(world))
            })
            .collect();
        if lights.len() > MAX_LIGHT_COUNT {
            log::warn!(
                "Scene has {} visible lights, only the first {} are used",
                lights.len(),
                MAX_LIGHT_COUNT
            );
            lights.truncate(MAX_LIGHT_COUNT);
        }
        lights
    }

    /// Renderer view of a camera entity together with its target
    pub fn camera_data(&self, entity: Entity, default_target: &Arc<Framebuffer>) -> Option<(CameraData, Arc<Framebuffer>)> {
        let record = self.entities.get(entity)?;
        let camera = record.camera.as_ref()?;
        let view = self.transforms.inverse_matrix(record.transform)?;
        let target = camera.render_target.clone().unwrap_or_else(|| default_target.clone());
        Some((camera.camera_data(view, &target), target))
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render every enabled camera; returns the number of cameras drawn
    pub fn render(
        &self,
        renderer: &mut Renderer3D,
        device: &mut dyn GraphicsDevice,
        default_target: &Arc<Framebuffer>,
    ) -> Result<usize> {
        let cameras = self.cameras();
        for camera in &cameras {
            self.render_camera(*camera, renderer, device, default_target)?;
        }
        Ok(cameras.len())
    }

    pub fn render_camera(
        &self,
        camera: Entity,
        renderer: &mut Renderer3D,
        device: &mut dyn GraphicsDevice,
        default_target: &Arc<Framebuffer>,
    ) -> Result<()> {
        let (data, target) = self.camera_data(camera, default_target).ok_or(SceneError::MissingComponent {
            entity: camera,
            component: "camera",
        })?;
        let lights = self.collect_lights(data.layer_mask);

        renderer.begin_scene(&target, &data, &lights);
        self.submit_models(renderer, data.layer_mask, &lights);
        renderer.end_scene(device)?;
        Ok(())
    }

    /// Render entity ids seen from `camera` into the integer `target`
    pub fn render_pick(
        &self,
        camera: Entity,
        renderer: &mut Renderer3D,
        device: &mut dyn GraphicsDevice,
        target: &Arc<Framebuffer>,
    ) -> Result<()> {
        let (data, _) = self.camera_data(camera, target).ok_or(SceneError::MissingComponent {
            entity: camera,
            component: "camera",
        })?;
        renderer.begin_pick_scene(target, &data);
        self.submit_models(renderer, data.layer_mask, &[]);
        renderer.end_scene(device)?;
        Ok(())
    }

    /// Entity under pixel `(x, y)` of a target filled by [`render_pick`](Self::render_pick)
    pub fn pick(
        &self,
        device: &mut dyn GraphicsDevice,
        target: &Framebuffer,
        x: u32,
        y: u32,
    ) -> Result<Option<Entity>> {
        let id = pick_entity(device, target, x, y)?;
        Ok(id.and_then(|id| self.entity_from_id(id)))
    }

    /// Live entity written to pick targets as `id`
    pub fn entity_from_id(&self, id: i32) -> Option<Entity> {
        if id == NO_ENTITY || id < 0 {
            return None;
        }
        self.order
            .iter()
            .copied()
            .find(|e| entity_id(*e) == id && self.entities.contains(*e))
    }

    fn submit_models(&self, renderer: &mut Renderer3D, mask: LayerMask, lights: &[LightSource]) {
        for (entity, record) in self.entities() {
            if !record.visible_to(mask) {
                continue;
            }
            let Some(model) = record.model.as_ref() else {
                continue;
            };
            let Some(world) = self.transforms.matrix(record.transform) else {
                continue;
            };
            let options = model.render_options(entity_id(entity), record.layer, lights);
            renderer.render_model(&model.model, world, options);
        }
    }
}

/// Value written to `u_EntityId` for `entity`: the slot index in the low
/// 20 bits and the low 11 bits of its generation above them, so an id read
/// back after the slot was reused does not resolve to the new occupant.
/// Ids alias past 2^20 live slots or after 2048 reuses of one slot.
pub fn entity_id(entity: Entity) -> i32 {
    let generation = entity.generation() & PICK_GENERATION_MASK;
    ((generation << PICK_INDEX_BITS) | (entity.index() & PICK_INDEX_MASK)) as i32
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("entities", &self.entities.len())
            .field("transforms", &self.transforms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_spawn_iterates_in_insertion_order() {
        let mut scene = Scene::new();
        let a = scene.spawn("a");
        let b = scene.spawn("b");
        let c = scene.spawn("c");
        let names: Vec<&str> = scene.entities().map(|(_, r)| r.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(scene.find_by_name("b"), Some(b));
        assert!(scene.is_alive(a) && scene.is_alive(c));
    }

    #[test]
    fn test_cameras_sorted_by_priority() {
        let mut scene = Scene::new();
        let late = scene.spawn("late");
        let early = scene.spawn("early");
        let off = scene.spawn("off");
        scene.insert_camera(late, CameraComponent::default().with_priority(5)).unwrap();
        scene.insert_camera(early, CameraComponent::default().with_priority(-1)).unwrap();
        scene.insert_camera(off, CameraComponent::default()).unwrap();
        scene.set_enabled(off, false).unwrap();

        assert_eq!(scene.cameras(), vec![early, late]);
    }

    #[test]
    fn test_lights_filtered_by_layer() {
        let mut scene = Scene::new();
        let mut device = forge_render::HeadlessDevice::new();
        let near = scene.spawn_at("near", Transform::from_translation(Vec3::new(0.0, 3.0, 0.0)));
        let far = scene.spawn("far");
        scene.insert_light(near, LightComponent::point(Vec3::ONE), &mut device).unwrap();
        scene.insert_light(far, LightComponent::point(Vec3::ONE), &mut device).unwrap();
        scene.set_layer(far, LayerMask::layer(3)).unwrap();

        let lights = scene.collect_lights(LayerMask::DEFAULT);
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0].position, Vec3::new(0.0, 3.0, 0.0));
        assert_eq!(scene.collect_lights(LayerMask::ALL).len(), 2);
    }

    #[test]
    fn test_light_count_capped() {
        let mut scene = Scene::new();
        let mut device = forge_render::HeadlessDevice::new();
        for i in 0..MAX_LIGHT_COUNT + 4 {
            let e = scene.spawn(format!("light{}", i));
            scene.insert_light(e, LightComponent::directional(Vec3::ONE), &mut device).unwrap();
        }
        assert_eq!(scene.collect_lights(LayerMask::ALL).len(), MAX_LIGHT_COUNT);
    }

    #[test]
    fn test_despawn_keeps_children_as_roots() {
        let mut scene = Scene::new();
        let mut device = forge_render::HeadlessDevice::new();
        let parent = scene.spawn_at("parent", Transform::from_translation(Vec3::X));
        let child = scene.spawn("child");
        scene.set_parent(child, Some(parent)).unwrap();
        assert_eq!(scene.parent(child), Some(parent));

        scene.despawn(parent, &mut device).unwrap();
        assert!(!scene.is_alive(parent));
        assert_eq!(scene.parent(child), None);
        assert_eq!(scene.transforms().world_position(scene.transform_id(child).unwrap()), Some(Vec3::ZERO));
        assert!(matches!(scene.despawn(parent, &mut device), Err(SceneError::EntityNotFound(_))));
    }

    #[test]
    fn test_entity_id_round_trip() {
        let mut scene = Scene::new();
        let mut device = forge_render::HeadlessDevice::new();
        let a = scene.spawn("a");
        let b = scene.spawn("b");
        assert_eq!(scene.entity_from_id(entity_id(b)), Some(b));
        assert_eq!(scene.entity_from_id(NO_ENTITY), None);

        scene.despawn(a, &mut device).unwrap();
        assert_eq!(scene.entity_from_id(entity_id(a)), None);
    }

    #[test]
    fn test_entity_id_rejects_reused_slot() {
        let mut scene = Scene::new();
        let mut device = forge_render::HeadlessDevice::new();
        let stale = scene.spawn("stale");
        scene.despawn(stale, &mut device).unwrap();
        let fresh = scene.spawn("fresh");

        assert_eq!(fresh.index(), stale.index());
        assert_ne!(entity_id(fresh), entity_id(stale));
        assert!(entity_id(fresh) >= 0);
        assert_eq!(scene.entity_from_id(entity_id(stale)), None);
        assert_eq!(scene.entity_from_id(entity_id(fresh)), Some(fresh));
    }
}
