//! Demo scene driven on the headless device
//!
//! A grid of spinning cubes parented under one root, a shadow-casting point
//! lamp, an optional sun and one or two cameras sharing the backbuffer.

use std::sync::Arc;

use forge_render::{
    builtin, AssetManager, Framebuffer, FramebufferDesc, Frustum, HeadlessDevice, Material, Model, RenderStats,
    Renderer3D, TextureFormat, UniformRecord,
};
use forge_scene::{
    CameraComponent, Entity, LightComponent, ModelRendererComponent, Result, Scene, Space, Transform, TransformId,
};
use forge_shader::{ShaderDefine, ShaderLibrary};
use glam::{Quat, Vec3, Vec4};
use serde::Serialize;

use crate::config::RuntimeConfig;

/// Summary printed when the run finishes
#[derive(Debug, Serialize)]
pub struct FrameReport {
    pub frames: u32,
    pub total: RenderStats,
    pub last_frame: RenderStats,
    pub post_processing_stages: Vec<String>,
    pub material_uniforms: Vec<UniformRecord>,
    pub picked: Option<String>,
    pub device_calls: usize,
}

pub struct Demo {
    config: RuntimeConfig,
    device: HeadlessDevice,
    assets: AssetManager,
    renderer: Renderer3D,
    scene: Scene,
    backbuffer: Arc<Framebuffer>,
    material: Arc<Material>,
    camera: Entity,
    grid: TransformId,
    time: f32,
}

impl Demo {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let mut device = HeadlessDevice::new();
        let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
        assets.init(&mut device)?;
        let renderer = Renderer3D::new(&mut assets, &mut device, config.renderer.clone())?;
        let backbuffer = Framebuffer::create(
            &mut device,
            FramebufferDesc::new("Backbuffer", config.width, config.height)
                .with_color(TextureFormat::Rgba8)
                .with_depth(TextureFormat::Depth24Stencil8),
        )?;

        let defines: Vec<ShaderDefine> = config.scene.defines.iter().map(|d| ShaderDefine::parse(d)).collect();
        let material = match &config.scene.material_path {
            Some(path) => {
                log::info!("Loading scene material from {}", path.display());
                Material::from_file(&mut assets, &mut device, path, &defines)?
            }
            None => Material::from_text(&mut assets, &mut device, "Lit", builtin::LIT, &defines)?,
        };
        if let Err(e) = material.uniforms_mut().try_set("Color", Vec4::new(0.8, 0.4, 0.2, 1.0)) {
            log::debug!("Scene material keeps its own color: {}", e);
        }
        let material = Arc::new(material);
        let model = Arc::new(Model::single(assets.cube_mesh()?, material.clone()));

        let mut scene = Scene::new();
        let camera = scene.spawn_at(
            "Camera",
            Transform::looking_at(Vec3::new(0.0, 6.0, 12.0), Vec3::ZERO, Vec3::Y),
        );
        scene.insert_camera(
            camera,
            CameraComponent::new(Frustum::perspective(60f32.to_radians(), 1.0, 0.1, 100.0))
                .with_clear_color(Vec4::new(0.05, 0.05, 0.08, 1.0)),
        )?;

        if config.scene.overlay_camera {
            let overlay = scene.spawn_at("Overlay", Transform::looking_at(Vec3::new(8.0, 8.0, 8.0), Vec3::ZERO, Vec3::Y));
            scene.insert_camera(
                overlay,
                CameraComponent::new(Frustum::perspective(45f32.to_radians(), 1.0, 0.1, 100.0))
                    .with_priority(1)
                    .with_mode(forge_render::CameraMode::Overlay)
                    .with_post_processing(false),
            )?;
        }

        let root = scene.spawn("Grid");
        let grid = scene.transform_id(root).ok_or(forge_scene::SceneError::EntityNotFound(root))?;
        let n = config.scene.grid_size;
        let offset = (n.saturating_sub(1)) as f32 * config.scene.spacing * 0.5;
        for x in 0..n {
            for z in 0..n {
                let position = Vec3::new(
                    x as f32 * config.scene.spacing - offset,
                    0.5,
                    z as f32 * config.scene.spacing - offset,
                );
                let cube = scene.spawn_at(format!("Cube {}x{}", x, z), Transform::from_translation(position));
                scene.insert_model(cube, ModelRendererComponent::new(model.clone()))?;
                scene.set_parent(cube, Some(root))?;
            }
        }

        let lamp = scene.spawn_at("Lamp", Transform::from_translation(Vec3::new(0.0, 4.0, 0.0)));
        scene.insert_light(lamp, LightComponent::point(Vec3::new(1.0, 0.9, 0.8)).with_range(25.0), &mut device)?;
        if config.scene.point_light_shadows {
            scene.set_light_shadows(lamp, true, &renderer, &mut device)?;
        }

        if config.scene.directional_light {
            let sun = scene.spawn_at(
                "Sun",
                Transform::from_rotation(Quat::from_rotation_x(-60f32.to_radians())),
            );
            scene.insert_light(sun, LightComponent::directional(Vec3::ONE).with_intensity(0.5), &mut device)?;
        }

        log::info!(
            "Demo scene ready: {} entities, {}x{} backbuffer",
            scene.entity_count(),
            config.width,
            config.height
        );

        Ok(Self {
            config,
            device,
            assets,
            renderer,
            scene,
            backbuffer,
            material,
            camera,
            grid,
            time: 0.0,
        })
    }

    /// Advance time, spin the grid and render every camera
    pub fn frame(&mut self) -> Result<RenderStats> {
        let step = self.config.time_step;
        self.time += step;
        self.renderer.set_time(self.time);

        let angle = self.config.scene.spin_speed.to_radians() * step;
        self.scene
            .transforms_mut()
            .rotate(self.grid, angle, Vec3::Y, Space::World)?;

        self.scene.render(&mut self.renderer, &mut self.device, &self.backbuffer)?;
        self.scene.transforms_mut().clear_changed();
        Ok(self.renderer.flush())
    }

    /// Name of the entity under the backbuffer's center pixel
    pub fn pick_center(&mut self) -> Result<Option<String>> {
        let (width, height) = (self.backbuffer.width(), self.backbuffer.height());
        let target = Framebuffer::create(&mut self.device, FramebufferDesc::pick(width, height))?;
        self.scene
            .render_pick(self.camera, &mut self.renderer, &mut self.device, &target)?;
        self.renderer.flush();

        let picked = self.scene.pick(&mut self.device, &target, width / 2, height / 2)?;
        target.destroy(&mut self.device);
        Ok(picked.and_then(|e| self.scene.get(e)).map(|record| record.name().to_string()))
    }

    pub fn run(mut self) -> Result<FrameReport> {
        let mut total = RenderStats::default();
        let mut last_frame = RenderStats::default();
        for frame in 0..self.config.frames {
            last_frame = self.frame()?;
            log::debug!("Frame {}: {:?}", frame, last_frame);
            total.accumulate(&last_frame);
        }

        let picked = if self.config.scene.pick {
            let picked = self.pick_center()?;
            log::info!("Center pixel shows {:?}", picked);
            picked
        } else {
            None
        };

        let report = FrameReport {
            frames: self.config.frames,
            total,
            last_frame,
            post_processing_stages: self
                .renderer
                .post_processor()
                .stages()
                .iter()
                .filter(|stage| stage.is_enabled())
                .map(|stage| stage.kind().to_string())
                .collect(),
            material_uniforms: self.material.uniforms().snapshot(),
            picked,
            device_calls: self.device.calls().len(),
        };
        self.shutdown();
        Ok(report)
    }

    fn shutdown(mut self) {
        self.renderer.destroy(&mut self.device);
        self.backbuffer.destroy(&mut self.device);
        self.assets.shutdown(&mut self.device);
        log::info!(
            "Shut down with {} programs and {} framebuffers still live",
            self.device.live_program_count(),
            self.device.live_framebuffer_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> RuntimeConfig {
        let mut config = RuntimeConfig {
            frames: 2,
            width: 64,
            height: 64,
            ..Default::default()
        };
        config.scene.grid_size = 2;
        config
    }

    #[test]
    fn test_demo_renders_every_cube_each_frame() {
        let mut config = small_config();
        config.renderer = forge_render::RendererConfig::without_post_processing();
        config.scene.point_light_shadows = false;
        config.scene.pick = false;

        let report = Demo::new(config).unwrap().run().unwrap();
        assert_eq!(report.frames, 2);
        assert_eq!(report.last_frame.draw_count, 4);
        assert_eq!(report.total.draw_count, 8);
        assert_eq!(report.total.scene_count, 2);
        assert_eq!(report.last_frame.post_process_stages, 0);
        assert!(report.material_uniforms.iter().any(|r| r.name == "Color"));
    }

    #[test]
    fn test_demo_shadows_and_post_processing() {
        let report = Demo::new(small_config()).unwrap().run().unwrap();
        assert_eq!(report.last_frame.shadow_passes, 1);
        assert_eq!(report.last_frame.post_process_stages, 2);
        assert_eq!(report.post_processing_stages, vec!["Bloom".to_string(), "HDR".to_string()]);
        assert!(report.picked.is_some_and(|name| name.starts_with("Cube")));
    }

    #[test]
    fn test_grid_spins_around_root() {
        let mut demo = Demo::new(small_config()).unwrap();
        let cube = demo.scene.find_by_name("Cube 0x0").unwrap();
        let id = demo.scene.transform_id(cube).unwrap();
        let before = demo.scene.transforms().world_position(id).unwrap();

        demo.frame().unwrap();
        let after = demo.scene.transforms().world_position(id).unwrap();
        assert!(!before.abs_diff_eq(after, 1e-6));
        assert!((before.length() - after.length()).abs() < 1e-4);
    }

    #[test]
    fn test_overlay_camera_adds_scene() {
        let mut config = small_config();
        config.scene.overlay_camera = true;
        let mut demo = Demo::new(config).unwrap();
        let stats = demo.frame().unwrap();
        assert_eq!(stats.scene_count, 2);
    }
}
