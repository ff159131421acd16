//! Scene renderer scenarios on the headless device
//!
//! Each test builds a small scene, renders it through `Renderer3D` and
//! inspects the recorded command stream.

use std::sync::Arc;

use forge_core::LayerMask;
use forge_render::builtin;
use forge_render::renderer::point_shadow_matrices;
use forge_render::*;
use forge_shader::{ShaderDefine, ShaderLibrary};
use glam::{Mat4, Vec3, Vec4};

struct Fixture {
    device: HeadlessDevice,
    assets: AssetManager,
    renderer: Renderer3D,
    target: Arc<Framebuffer>,
    material: Arc<Material>,
    cube: Model,
}

fn fixture(config: RendererConfig) -> Fixture {
    let mut device = HeadlessDevice::new();
    let mut assets = AssetManager::new(ShaderLibrary::with_builtins());
    assets.init(&mut device).expect("assets init");
    let renderer = Renderer3D::new(&mut assets, &mut device, config).expect("renderer");
    let target = Framebuffer::create(
        &mut device,
        FramebufferDesc::new("scene", 64, 64)
            .with_color(TextureFormat::Rgba8)
            .with_depth(TextureFormat::Depth24Stencil8),
    )
    .expect("target");
    let material = Arc::new(Material::from_text(&mut assets, &mut device, "Lit", builtin::LIT, &[]).expect("material"));
    material.uniforms_mut().set("Color", Vec4::new(1.0, 0.5, 0.25, 1.0));
    let cube = Model::single(assets.cube_mesh().expect("cube"), material.clone());

    Fixture {
        device,
        assets,
        renderer,
        target,
        material,
        cube,
    }
}

fn camera() -> CameraData {
    CameraData::new(
        Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y),
        Frustum::perspective(60f32.to_radians(), 1.0, 0.1, 100.0),
    )
    .with_clear_color(Vec4::new(0.1, 0.2, 0.3, 1.0))
}

fn render(f: &mut Fixture, camera: &CameraData, lights: &[LightSource]) {
    f.renderer.begin_scene(&f.target, camera, lights);
    f.renderer.render_model(&f.cube, Mat4::IDENTITY, RenderOptions::default());
    f.renderer.end_scene(&mut f.device).expect("end_scene");
}

#[test]
fn test_shadow_free_directional_light_two_cameras_one_clear() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let light = LightSource::directional(Vec3::new(-1.0, -1.0, 0.0), Vec3::ONE);

    render(&mut f, &camera(), &[light.clone()]);
    assert_eq!(f.renderer.stats().draw_count, 1);
    assert_eq!(f.renderer.stats().shadow_passes, 0);
    assert_eq!(f.device.clears_of(f.target.id()), 1);

    let unshadowed = f.material.shader(RenderPass::WithoutShadow).unwrap().id();
    assert_eq!(f.device.draws(), vec![(unshadowed, f.target.id(), f.cube.sub_models[0].mesh.id())]);
    assert_eq!(f.device.clear_color(), [0.1, 0.2, 0.3, 1.0]);

    // Second camera into the same target: no second clear
    render(&mut f, &camera(), &[light]);
    assert_eq!(f.device.clears_of(f.target.id()), 1);
    assert!(f.device.uniform_errors().is_empty(), "{:?}", f.device.uniform_errors());

    let stats = f.renderer.flush();
    assert_eq!(stats.scene_count, 2);
    assert_eq!(stats.draw_count, 2);
    assert_eq!(stats.clear_count, 1);
    assert_eq!(f.renderer.stats(), &RenderStats::default());

    // A new frame clears again
    render(&mut f, &camera(), &[]);
    assert_eq!(f.device.clears_of(f.target.id()), 2);
}

#[test]
fn test_overlay_camera_clears_depth_only() {
    let mut f = fixture(RendererConfig::without_post_processing());
    render(&mut f, &camera(), &[]);
    render(&mut f, &camera().with_mode(CameraMode::Overlay), &[]);

    assert_eq!(f.device.clears_of(f.target.id()), 1);
    assert_eq!(f.device.depth_clears_of(f.target.id()), 1);
}

#[test]
fn test_post_processed_destination_cleared_once_per_frame() {
    let mut f = fixture(RendererConfig::default());
    render(&mut f, &camera(), &[]);
    assert!(f.renderer.stats().post_process_stages > 0);
    assert_eq!(f.device.clears_of(f.target.id()), 1);

    // A later camera without post-processing draws over the first one
    render(&mut f, &camera().with_post_processing(false), &[]);
    assert_eq!(f.device.clears_of(f.target.id()), 1);

    // A post-processed overlay keeps the color and only resets depth
    render(&mut f, &camera().with_mode(CameraMode::Overlay), &[]);
    assert_eq!(f.device.clears_of(f.target.id()), 1);
    assert_eq!(f.device.depth_clears_of(f.target.id()), 1);
    assert_eq!(f.renderer.post_processor().destination_clear(), ClearMode::DepthOnly);

    assert_eq!(f.renderer.flush().clear_count, 1);
    render(&mut f, &camera(), &[]);
    assert_eq!(f.device.clears_of(f.target.id()), 2);
}

#[test]
fn test_post_input_cleared_for_every_camera() {
    let mut config = RendererConfig::default();
    config.post_processing.bloom.enabled = false;
    let mut f = fixture(config);
    let second = Framebuffer::create(
        &mut f.device,
        FramebufferDesc::new("second", 64, 64)
            .with_color(TextureFormat::Rgba8)
            .with_depth(TextureFormat::Depth24Stencil8),
    )
    .unwrap();

    render(&mut f, &camera(), &[]);
    f.renderer.begin_scene(&second, &camera(), &[]);
    f.renderer.render_model(&f.cube, Mat4::IDENTITY, RenderOptions::default());
    f.renderer.end_scene(&mut f.device).unwrap();

    let input = f.renderer.post_processor().first_input().unwrap().id();
    assert_ne!(input, f.target.id());
    assert_eq!(f.device.clears_of(input), 2);
    assert_eq!(f.device.clears_of(f.target.id()), 1);
    assert_eq!(f.device.clears_of(second.id()), 1);
    assert_eq!(f.renderer.flush().clear_count, 2);
}

#[test]
fn test_point_light_shadow_cubemap() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let shadow_target = f
        .renderer
        .create_shadow_target(&mut f.device, LightType::Point)
        .unwrap();
    assert!(shadow_target.is_cubemap());
    assert!(shadow_target.depth_attachment().is_some());

    let position = Vec3::new(0.0, 3.0, 0.0);
    let mut light = LightSource::point(position, Vec3::ONE)
        .with_range(25.0)
        .with_shadow(shadow_target.clone(), LayerMask::ALL);
    render(&mut f, &camera(), &[light.clone()]);

    let point_shadow = f.material.shader(RenderPass::PointShadowFormation).unwrap().id();
    let shadowed = f.material.shader(RenderPass::WithShadow).unwrap().id();
    let mesh = f.cube.sub_models[0].mesh.id();
    assert_eq!(
        f.device.draws(),
        vec![(point_shadow, shadow_target.id(), mesh), (shadowed, f.target.id(), mesh)]
    );
    assert_eq!(f.renderer.stats().shadow_passes, 1);

    let expected = point_shadow_matrices(position, 25.0);
    for (face, matrix) in expected.iter().enumerate() {
        let location = format!("u_ShadowPointMatrices[{}]", face);
        assert_eq!(f.device.uniform(point_shadow, &location), Some(&UniformValue::Mat4(*matrix)));
    }
    assert_eq!(
        f.device.count(|c| matches!(c, DeviceCall::SetUniform { program, location }
            if *program == point_shadow && location.starts_with("u_ShadowPointMatrices"))),
        6
    );
    assert_eq!(f.device.depth_clears_of(shadow_target.id()), 1);
    assert_eq!(f.device.clears_of(shadow_target.id()), 0);
    assert_eq!(
        f.device.uniform(shadowed, "u_LightSources[0].ShadowIndex"),
        Some(&UniformValue::Int(0))
    );
    assert_eq!(f.device.uniform(shadowed, "u_UsedPointShadowMaps"), Some(&UniformValue::Int(1)));
    assert!(f.device.count(|c| *c == DeviceCall::SetCullFace(CullFace::Front)) >= 1);

    // Disabling the shadow drops the target; later frames render unshadowed
    if let Some(shadow) = light.shadow.as_mut() {
        shadow.render_target = None;
    }
    assert!(light.shadow_target().is_none());
    f.renderer.flush();
    f.device.clear_calls();
    render(&mut f, &camera(), &[light]);

    let unshadowed = f.material.shader(RenderPass::WithoutShadow).unwrap().id();
    assert_eq!(f.device.draws(), vec![(unshadowed, f.target.id(), mesh)]);
    assert_eq!(f.renderer.stats().shadow_passes, 0);
}

#[test]
fn test_shadow_respects_layers_and_shadow_mask() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let shadow_target = f
        .renderer
        .create_shadow_target(&mut f.device, LightType::Directional)
        .unwrap();
    let light = LightSource::directional(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE)
        .with_shadow(shadow_target.clone(), LayerMask::layer(3));

    // Camera on a different layer receives no shadow
    let other_layer = camera().with_layer_mask(LayerMask::layer(1));
    render(&mut f, &other_layer, &[light.clone()]);
    assert_eq!(f.renderer.stats().shadow_passes, 0);

    // Shadow pass runs but the model opts out of light 0
    f.renderer.flush();
    f.device.clear_calls();
    f.renderer.begin_scene(&f.target, &camera(), &[light]);
    f.renderer
        .render_model(&f.cube, Mat4::IDENTITY, RenderOptions::default().with_shadow_mask(0));
    f.renderer.end_scene(&mut f.device).unwrap();

    let stats = f.renderer.flush();
    assert_eq!(stats.shadow_passes, 1);
    assert_eq!(stats.draw_count, 1);
    let shadowed = f.material.shader(RenderPass::WithShadow).unwrap().id();
    assert_eq!(f.device.draws()[0].0, shadowed);
    assert!(matches!(
        f.device.uniform(shadowed, "u_LightSpaceTransforms[0]"),
        Some(UniformValue::Mat4(_))
    ));
}

#[test]
fn test_post_processing_chain_ends_in_destination() {
    let mut config = RendererConfig::default();
    config.post_processing.hdr.enabled = false;
    config.post_processing.dither.enabled = true;
    let mut f = fixture(config);

    render(&mut f, &camera(), &[]);

    let post = f.renderer.post_processor();
    let executions = post.last_executions();
    let kinds: Vec<StageKind> = executions.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![StageKind::Bloom, StageKind::Dither]);
    assert_eq!(executions.last().unwrap().target, f.target.id());

    let dither_input = post.stage(StageKind::Dither).unwrap().input_framebuffer().unwrap();
    assert_eq!(executions[0].target, dither_input.id());

    // Main pass rendered into the first stage's input
    let first_input = post.first_input().unwrap().id();
    let lit = f.material.shader(RenderPass::WithoutShadow).unwrap().id();
    assert!(f.device.draws().iter().any(|(p, fb, _)| *p == lit && *fb == first_input));
    assert_eq!(f.renderer.stats().post_process_stages, 2);
    assert!(f.device.uniform_errors().is_empty(), "{:?}", f.device.uniform_errors());
}

#[test]
fn test_camera_can_opt_out_of_post_processing() {
    let mut f = fixture(RendererConfig::default());
    render(&mut f, &camera().with_post_processing(false), &[]);

    assert_eq!(f.renderer.stats().post_process_stages, 0);
    assert_eq!(f.device.draws().len(), 1);
    assert_eq!(f.device.draws()[0].1, f.target.id());
}

#[test]
fn test_pick_scene_reads_back_entity() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let pick_target = Framebuffer::create(&mut f.device, FramebufferDesc::pick(64, 64)).unwrap();
    let left_half = camera().with_viewport(Viewport::new(0, 0, 32, 64));

    f.renderer.begin_pick_scene(&pick_target, &left_half);
    f.renderer
        .render_model(&f.cube, Mat4::IDENTITY, RenderOptions::default().with_entity_id(7));
    f.renderer.end_scene(&mut f.device).unwrap();

    assert_eq!(pick_entity(&mut f.device, &pick_target, 10, 10).unwrap(), Some(7));
    assert_eq!(pick_entity(&mut f.device, &pick_target, 50, 10).unwrap(), None);
    assert!(matches!(
        pick_entity(&mut f.device, &f.target, 0, 0),
        Err(RenderError::PickUnsupported(_))
    ));
}

#[test]
fn test_missing_pass_program_is_skipped() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let color = f.assets.color_shader().unwrap();
    let bare = Model::single(f.assets.cube_mesh().unwrap(), Arc::new(Material::new(color, None)));
    let pick_target = Framebuffer::create(&mut f.device, FramebufferDesc::pick(8, 8)).unwrap();

    f.renderer.begin_pick_scene(&pick_target, &camera());
    f.renderer.render_model(&bare, Mat4::IDENTITY, RenderOptions::default());
    f.renderer.end_scene(&mut f.device).unwrap();

    let stats = f.renderer.flush();
    assert_eq!(stats.draw_count, 0);
    assert_eq!(stats.skipped_draws, 1);
}

#[test]
fn test_shared_material_edits_reach_every_model() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let second = Model::single(f.assets.cube_mesh().unwrap(), f.material.clone());
    f.material.uniforms_mut().set("Shininess", 64.0f32);

    f.renderer.begin_scene(&f.target, &camera(), &[]);
    f.renderer.render_model(&f.cube, Mat4::IDENTITY, RenderOptions::default());
    f.renderer
        .render_model(&second, Mat4::from_translation(Vec3::X), RenderOptions::default());
    f.renderer.end_scene(&mut f.device).unwrap();

    let lit = f.material.shader(RenderPass::WithoutShadow).unwrap().id();
    assert_eq!(f.device.uniform(lit, "u_Shininess"), Some(&UniformValue::Float(64.0)));
    assert_eq!(
        f.device.uniform(lit, "u_ModelMatrix"),
        Some(&UniformValue::Mat4(Mat4::from_translation(Vec3::X)))
    );
    assert_eq!(f.renderer.stats().draw_count, 2);
}

const SKINNED: &str = r#"
#shader vertex
layout(location = 0) in vec3 v_Position;

uniform mat4 u_ProjViewMatrix;
uniform mat4 u_ModelMatrix;
#ifdef JOINT_COUNT
uniform mat4 u_JointTransforms[JOINT_COUNT];
#endif

void main()
{
    gl_Position = u_ProjViewMatrix * u_ModelMatrix * vec4(v_Position, 1.0);
}

#shader fragment
layout(location = 0) out vec4 f_FinalColor;

uniform vec4 u_Color;

void main()
{
    f_FinalColor = u_Color;
}
"#;

#[test]
fn test_skinned_mesh_uploads_pose() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let material = Arc::new(
        Material::from_text(
            &mut f.assets,
            &mut f.device,
            "Skinned",
            SKINNED,
            &[ShaderDefine::with_value("JOINT_COUNT", 2)],
        )
        .unwrap(),
    );
    let vertices = [
        Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
        Vertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
        Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
    ];
    let mesh = Mesh::create_skinned(&mut f.device, &vertices, &[0, 1, 2], 2).unwrap();
    let pose = [Mat4::from_translation(Vec3::X), Mat4::from_scale(Vec3::splat(2.0))];
    assert!(mesh.set_pose(&pose));
    let skinned = Model::single(mesh, material.clone());
    let rigid = Model::single(f.assets.cube_mesh().unwrap(), material.clone());

    f.renderer.begin_scene(&f.target, &camera(), &[]);
    f.renderer.render_model(&skinned, Mat4::IDENTITY, RenderOptions::default());
    f.renderer.render_model(&rigid, Mat4::IDENTITY, RenderOptions::default());
    f.renderer.end_scene(&mut f.device).unwrap();

    let program = material.shader(RenderPass::WithoutShadow).unwrap().id();
    assert_eq!(f.device.uniform(program, "u_JointTransforms[0]"), Some(&UniformValue::Mat4(pose[0])));
    assert_eq!(f.device.uniform(program, "u_JointTransforms[1]"), Some(&UniformValue::Mat4(pose[1])));
    // Only the skinned mesh uploads joints
    assert_eq!(
        f.device.count(|c| matches!(c, DeviceCall::SetUniform { location, .. }
            if location.starts_with("u_JointTransforms"))),
        2
    );
    assert_eq!(f.renderer.stats().draw_count, 2);
    assert!(f.device.uniform_errors().is_empty(), "{:?}", f.device.uniform_errors());
}

#[test]
fn test_camera_clipping_planes_reach_lit_program() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let plane = Vec4::new(0.0, 1.0, 0.0, 0.5);
    render(&mut f, &camera().with_clipping_planes(vec![plane]), &[]);

    assert_eq!(f.device.count(|c| *c == DeviceCall::EnableClippingPlanes(1)), 1);
    let lit = f.material.shader(RenderPass::WithoutShadow).unwrap().id();
    assert_eq!(f.device.uniform(lit, "u_UsedClippingPlanes"), Some(&UniformValue::Int(1)));
    assert_eq!(f.device.uniform(lit, "u_ClippingPlanes[0]"), Some(&UniformValue::Float4(plane)));

    // The next camera without planes turns clipping off again
    f.renderer.flush();
    render(&mut f, &camera(), &[]);
    assert_eq!(f.device.clipping_planes(), 0);
    assert_eq!(f.device.uniform(lit, "u_UsedClippingPlanes"), Some(&UniformValue::Int(0)));
}

const GLOW: &str = r#"
#shader vertex
layout(location = 0) in vec3 v_Position;

uniform mat4 u_ProjViewMatrix;
uniform mat4 u_ModelMatrix;

void main()
{
    gl_Position = u_ProjViewMatrix * u_ModelMatrix * vec4(v_Position, 1.0);
}

#shader fragment
layout(location = 0) out vec4 f_FinalColor;

["Glow"]
uniform float u_Glow;

void main()
{
    f_FinalColor = vec4(u_Glow);
}
"#;

#[test]
fn test_material_from_file_keeps_same_named_sources_apart() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let dir = tempfile::tempdir().unwrap();
    let plain_path = dir.path().join("plain").join("Lit.glsl");
    let glow_path = dir.path().join("glow").join("Lit.glsl");
    for (path, text) in [(&plain_path, builtin::LIT), (&glow_path, GLOW)] {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    let plain = Material::from_file(&mut f.assets, &mut f.device, &plain_path, &[]).unwrap();
    let glow = Arc::new(Material::from_file(&mut f.assets, &mut f.device, &glow_path, &[]).unwrap());
    let plain_program = plain.shader(RenderPass::WithoutShadow).unwrap().id();
    let glow_program = glow.shader(RenderPass::WithoutShadow).unwrap().id();
    assert_ne!(plain_program, glow_program);
    // The on-disk builtin text shares the fixture's program
    assert_eq!(plain_program, f.material.shader(RenderPass::WithoutShadow).unwrap().id());
    assert!(plain.uniforms().has("Color"));
    assert!(!glow.uniforms().has("Color"));

    glow.uniforms_mut().set("Glow", 0.75f32);
    let model = Model::single(f.assets.cube_mesh().unwrap(), glow.clone());
    f.renderer.begin_scene(&f.target, &camera(), &[]);
    f.renderer.render_model(&model, Mat4::IDENTITY, RenderOptions::default());
    f.renderer.end_scene(&mut f.device).unwrap();

    assert_eq!(f.device.uniform(glow_program, "u_Glow"), Some(&UniformValue::Float(0.75)));
    assert!(Material::from_file(&mut f.assets, &mut f.device, dir.path().join("missing.glsl"), &[]).is_err());
}

#[test]
fn test_collected_programs_leave_no_cached_state() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let material = Arc::new(Material::from_text(&mut f.assets, &mut f.device, "Glow", GLOW, &[]).unwrap());
    let program = material.shader(RenderPass::WithoutShadow).unwrap().id();
    let model = Model::single(f.assets.cube_mesh().unwrap(), material.clone());

    f.renderer.begin_scene(&f.target, &camera(), &[]);
    f.renderer.render_model(&model, Mat4::IDENTITY, RenderOptions::default());
    f.renderer.end_scene(&mut f.device).unwrap();
    f.renderer.flush();
    assert!(f.renderer.context().has_requirements(program));

    // Still referenced: nothing to collect
    assert_eq!(f.renderer.collect_unused_shaders(&mut f.assets, &mut f.device), 0);

    drop(model);
    drop(material);
    assert!(f.renderer.collect_unused_shaders(&mut f.assets, &mut f.device) > 0);
    assert!(f.device.calls().contains(&DeviceCall::DestroyProgram(program)));
    assert!(!f.renderer.context().has_requirements(program));

    // The fixture's material is untouched and still renders
    render(&mut f, &camera(), &[]);
    assert_eq!(f.renderer.stats().draw_count, 1);
    assert!(f.device.uniform_errors().is_empty(), "{:?}", f.device.uniform_errors());
}

#[test]
#[should_panic(expected = "without begin_scene")]
fn test_end_scene_without_begin_panics() {
    let mut f = fixture(RendererConfig::without_post_processing());
    let _ = f.renderer.end_scene(&mut f.device);
}
