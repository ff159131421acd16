//! Integration tests for shader expansion
//!
//! Covers the workflow a material factory goes through:
//! - Loading a single-file shader from disk
//! - Compiling plain, shadow and skinned variants
//! - Registering application snippets in the library

use forge_shader::{
    ShaderCompiler, ShaderDataType, ShaderDefine, ShaderLibrary, ShaderStage, SHADOW_FORMATION_DEFINE,
    SHADOW_MAP_DEFINE,
};

const SKINNED: &str = r#"#version 450 core
#shader vertex
layout(location = 0) in vec3 v_Position;
layout(location = 4) in ivec4 v_Joints;
layout(location = 5) in vec4 v_Weights;

uniform mat4 u_ProjViewMatrix;
uniform mat4 u_ModelMatrix;
#ifdef JOINT_COUNT
uniform mat4 u_JointTransforms[JOINT_COUNT];
#endif

void main()
{
    mat4 skin = mat4(1.0);
#ifdef JOINT_COUNT
    skin = v_Weights.x * u_JointTransforms[v_Joints.x] + v_Weights.y * u_JointTransforms[v_Joints.y];
#endif
    gl_Position = u_ProjViewMatrix * u_ModelMatrix * skin * vec4(v_Position, 1.0);
}

#shader fragment
#ifndef SHADOW_FORMATION
#include "Lighting.h"
#include "Shadows.h"
#include "Palette.h"
out vec4 f_Color;
["Albedo"]
uniform sampler2D u_Albedo;
uniform float u_Shininess;
#endif
void main()
{
#ifndef SHADOW_FORMATION
    f_Color = texture(u_Albedo, vec2(0.0));
#endif
}
"#;

fn compiler() -> ShaderCompiler {
    let mut library = ShaderLibrary::with_builtins();
    library.register("Palette.h", "uniform vec4 u_Palette[4];\n");
    ShaderCompiler::new(library)
}

#[test]
fn test_compile_from_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("Skinned.glsl");
    std::fs::write(&path, SKINNED).expect("write shader");

    let shader = compiler().compile_file(&path, &[]).expect("should compile");

    assert_eq!(shader.name, "Skinned");
    assert!(shader.stage(ShaderStage::Vertex).is_some());
    assert!(shader.stage(ShaderStage::Fragment).is_some());
    assert!(shader.interface.contains("u_Palette[3]"));
    assert!(!shader.interface.contains("u_JointTransforms"));
    assert_eq!(
        shader.interface.by_variable_name("Albedo").map(|u| u.ty),
        Some(ShaderDataType::Sampler2D)
    );
}

#[test]
fn test_joint_count_define_sizes_array() {
    let shader = compiler()
        .compile_str("Skinned", SKINNED, &[ShaderDefine::parse("JOINT_COUNT=24")])
        .expect("should compile");

    let joints = shader.interface.get("u_JointTransforms").expect("joints declared");
    assert_eq!(joints.array_len, Some(24));
    assert!(shader.interface.contains("u_JointTransforms[23]"));
    assert!(!shader.interface.contains("u_JointTransforms[24]"));
}

#[test]
fn test_shadow_family_from_one_source() {
    let compiler = compiler();
    let plain = compiler.compile_str("Skinned", SKINNED, &[]).unwrap();
    let shadowed = compiler
        .compile_str("Skinned", SKINNED, &[ShaderDefine::new(SHADOW_MAP_DEFINE)])
        .unwrap();
    let formation = compiler
        .compile_str("Skinned", SKINNED, &[ShaderDefine::new(SHADOW_FORMATION_DEFINE)])
        .unwrap();

    assert!(!plain.interface.contains("u_LightSpaceTransforms"));
    assert!(shadowed.interface.contains("u_LightSpaceTransforms[0]"));
    assert!(!formation.interface.contains("u_LightSources"));
    assert!(!formation.interface.contains("u_Albedo"));
    assert!(formation.interface.contains("u_ModelMatrix"));

    assert_ne!(plain.key(), shadowed.key());
    assert_ne!(shadowed.key(), formation.key());
}

#[test]
fn test_missing_file_reports_io_error() {
    let err = compiler()
        .compile_file("does/not/exist.glsl", &[])
        .expect_err("missing file");
    assert!(matches!(err, forge_shader::ShaderError::FileRead(_)));
}

#[test]
fn test_interface_serializes() {
    let shader = compiler().compile_str("Skinned", SKINNED, &[]).unwrap();
    let json = serde_json::to_string(&shader.interface).expect("serialize");
    assert!(json.contains("u_Albedo"));
}
