//! Engine shader sources in single-file `#shader` form

/// Flat color, used by [`Material::default_color`](crate::Material::default_color)
pub const COLOR: &str = r#"
#shader vertex
#include "Clipping.h"
layout(location = 0) in vec3 v_Position;

uniform mat4 u_ProjViewMatrix;
uniform mat4 u_ModelMatrix;

void main()
{
    vec4 world = u_ModelMatrix * vec4(v_Position, 1.0);
    ApplyClippingPlanes(world);
    gl_Position = u_ProjViewMatrix * world;
}

#shader fragment
layout(location = 0) out vec4 f_FinalColor;

["Color"]
uniform vec4 u_Color;

void main()
{
    f_FinalColor = u_Color;
}
"#;

/// Depth-only pass for directional and spot shadow maps
pub const SHADOW: &str = r#"
#shader vertex
layout(location = 0) in vec3 v_Position;

uniform mat4 u_ProjViewMatrix;
uniform mat4 u_ModelMatrix;

void main()
{
    gl_Position = u_ProjViewMatrix * u_ModelMatrix * vec4(v_Position, 1.0);
}

#shader fragment
void main()
{
}
"#;

/// Layered cubemap depth pass. The geometry stage emits each triangle once
/// per cube face.
pub const POINT_SHADOW: &str = r#"
#shader vertex
layout(location = 0) in vec3 v_Position;

uniform mat4 u_ModelMatrix;

void main()
{
    gl_Position = u_ModelMatrix * vec4(v_Position, 1.0);
}

#shader geometry
layout(triangles) in;
layout(triangle_strip, max_vertices = 18) out;

uniform mat4 u_ShadowPointMatrices[6];

out vec4 g_FragPosition;

void main()
{
    for (int face = 0; face < 6; face++)
    {
        gl_Layer = face;
        for (int i = 0; i < 3; i++)
        {
            g_FragPosition = gl_in[i].gl_Position;
            gl_Position = u_ShadowPointMatrices[face] * g_FragPosition;
            EmitVertex();
        }
        EndPrimitive();
    }
}

#shader fragment
in vec4 g_FragPosition;

uniform vec3 u_ShadowLightPosition;
uniform float u_ShadowFarPlane;

void main()
{
    gl_FragDepth = length(g_FragPosition.xyz - u_ShadowLightPosition) / u_ShadowFarPlane;
}
"#;

/// Writes the entity id into the integer attachment
pub const PICK: &str = r#"
#shader vertex
layout(location = 0) in vec3 v_Position;

uniform mat4 u_ProjViewMatrix;
uniform mat4 u_ModelMatrix;

void main()
{
    gl_Position = u_ProjViewMatrix * u_ModelMatrix * vec4(v_Position, 1.0);
}

#shader fragment
layout(location = 0) out vec4 f_Color;
layout(location = 1) out int f_EntityId;

uniform int u_EntityId;

void main()
{
    f_Color = vec4(1.0);
    f_EntityId = u_EntityId;
}
"#;

/// Blinn-Phong with shadows and clipping planes
pub const LIT: &str = r#"
#shader vertex
#include "Clipping.h"
layout(location = 0) in vec3 v_Position;
layout(location = 1) in vec3 v_Normal;
layout(location = 2) in vec2 v_TexCoord;

uniform mat4 u_ProjViewMatrix;
uniform mat4 u_ModelMatrix;

out vec3 f_Position;
out vec3 f_Normal;
out vec2 f_TexCoord;

void main()
{
    vec4 world = u_ModelMatrix * vec4(v_Position, 1.0);
    ApplyClippingPlanes(world);
    f_Position = world.xyz;
    f_Normal = mat3(u_ModelMatrix) * v_Normal;
    f_TexCoord = v_TexCoord;
    gl_Position = u_ProjViewMatrix * world;
}

#shader fragment
layout(location = 0) out vec4 f_FinalColor;
#ifndef SHADOW_FORMATION
#include "Lighting.h"
#include "Shadows.h"

in vec3 f_Position;
in vec3 f_Normal;
in vec2 f_TexCoord;

uniform vec3 u_CameraPosition;

["Color"]
uniform vec4 u_Color;
["Shininess"]
uniform float u_Shininess;
#endif

void main()
{
#ifndef SHADOW_FORMATION
    vec3 normal = normalize(f_Normal);
    vec3 view = normalize(u_CameraPosition - f_Position);
    vec3 color = vec3(0.0);
    for (int i = 0; i < u_UsedLightSources; i++)
    {
        float shadow = 0.0;
#ifdef SHADOW_MAP
        int index = u_LightSources[i].ShadowIndex;
        if (index >= 0)
            shadow = u_LightSources[i].Type == POINT_LIGHT ? PointShadow(index, f_Position) : DirectionalShadow(index, f_Position);
#endif
        color += (1.0 - shadow) * CalculateLight(u_LightSources[i], f_Position, normal, view, u_Color.rgb, u_Shininess);
    }
    f_FinalColor = vec4(color, u_Color.a);
#endif
}
"#;

const FULLSCREEN_VERTEX: &str = r#"
#shader vertex
layout(location = 0) in vec3 v_Position;
layout(location = 2) in vec2 v_TexCoord;

out vec2 f_TexCoord;

void main()
{
    gl_Position = vec4(v_Position, 1.0);
    f_TexCoord = v_TexCoord;
}
"#;

/// Splits color into the scene and its bright parts
pub const BLOOM_FRAGMENT: &str = r#"
#shader fragment
layout(location = 0) out vec4 f_FragColor;
layout(location = 1) out vec4 f_BrightColor;

in vec2 f_TexCoord;

uniform sampler2D frg_Texture;
["BloomThreshold"]
uniform float u_Threshold;

void main()
{
    vec4 color = texture(frg_Texture, f_TexCoord);
    float brightness = dot(color.rgb, vec3(0.2126, 0.7152, 0.0722));
    f_BrightColor = brightness >= u_Threshold ? vec4(color.rgb, 1.0) : vec4(0.0, 0.0, 0.0, 1.0);
    f_FragColor = color;
}
"#;

/// One direction of a separable 9-tap gaussian
pub const BLUR_FRAGMENT: &str = r#"
#shader fragment
layout(location = 0) out vec4 f_FragColor;

in vec2 f_TexCoord;

uniform sampler2D frg_Texture;
uniform bool u_Horizontal;

const float WEIGHTS[5] = float[](0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216);

void main()
{
    vec2 offset = 1.0 / textureSize(frg_Texture, 0);
    vec3 result = texture(frg_Texture, f_TexCoord).rgb * WEIGHTS[0];
    vec2 step = u_Horizontal ? vec2(offset.x, 0.0) : vec2(0.0, offset.y);
    for (int i = 1; i < 5; i++)
    {
        result += texture(frg_Texture, f_TexCoord + step * i).rgb * WEIGHTS[i];
        result += texture(frg_Texture, f_TexCoord - step * i).rgb * WEIGHTS[i];
    }
    f_FragColor = vec4(result, 1.0);
}
"#;

/// Adds the blurred bright texture back onto the scene
pub const BLOOM_COMBINE_FRAGMENT: &str = r#"
#shader fragment
layout(location = 0) out vec4 f_FragColor;

in vec2 f_TexCoord;

uniform sampler2D frg_Texture;
uniform sampler2D frg_BrightTexture;

void main()
{
    vec3 scene = texture(frg_Texture, f_TexCoord).rgb;
    vec3 bloom = texture(frg_BrightTexture, f_TexCoord).rgb;
    f_FragColor = vec4(scene + bloom, 1.0);
}
"#;

/// Exposure tone mapping
pub const HDR_FRAGMENT: &str = r#"
#shader fragment
layout(location = 0) out vec4 f_FragColor;

in vec2 f_TexCoord;

uniform sampler2D frg_Texture;
["Exposure"]
uniform float u_Exposure;

void main()
{
    vec3 hdr = texture(frg_Texture, f_TexCoord).rgb;
    vec3 mapped = vec3(1.0) - exp(-hdr * u_Exposure);
    f_FragColor = vec4(mapped, 1.0);
}
"#;

/// Ordered dithering with an 8x8 Bayer matrix
pub const DITHER_FRAGMENT: &str = r#"
#shader fragment
layout(location = 0) out vec4 f_FragColor;

in vec2 f_TexCoord;

uniform sampler2D frg_Texture;
uniform sampler2D frg_BayerMatrix;

void main()
{
    vec3 color = texture(frg_Texture, f_TexCoord).rgb;
    float threshold = texture(frg_BayerMatrix, gl_FragCoord.xy / 8.0).r * (255.0 / 64.0) - 0.5;
    f_FragColor = vec4(color + threshold / 255.0, 1.0);
}
"#;

/// Full-screen source for a post-processing fragment stage
pub fn post_process_source(fragment: &str) -> String {
    format!("{}{}", FULLSCREEN_VERTEX, fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_shader::{ShaderCompiler, ShaderDataType, ShaderDefine, ShaderStage};

    #[test]
    fn test_builtins_compile() {
        let compiler = ShaderCompiler::default();
        for (name, source) in [("Color", COLOR), ("Shadow", SHADOW), ("Pick", PICK), ("Lit", LIT)] {
            compiler.compile_str(name, source, &[]).unwrap();
        }
        for fragment in [BLOOM_FRAGMENT, BLUR_FRAGMENT, BLOOM_COMBINE_FRAGMENT, HDR_FRAGMENT, DITHER_FRAGMENT] {
            compiler.compile_str("Post", &post_process_source(fragment), &[]).unwrap();
        }
    }

    #[test]
    fn test_point_shadow_has_geometry_stage() {
        let shader = ShaderCompiler::default().compile_str("PointShadow", POINT_SHADOW, &[]).unwrap();
        assert!(shader.has_geometry_stage());
        assert!(shader.stage(ShaderStage::Geometry).unwrap().contains("max_vertices = 18"));
        assert_eq!(
            shader.interface.get("u_ShadowPointMatrices").map(|u| u.array_len),
            Some(Some(6))
        );
    }

    #[test]
    fn test_lit_variants() {
        let compiler = ShaderCompiler::default();
        let formation = compiler
            .compile_str("Lit", LIT, &[ShaderDefine::new("SHADOW_FORMATION")])
            .unwrap();
        assert!(!formation.interface.contains("u_Color"));
        let plain = compiler.compile_str("Lit", LIT, &[]).unwrap();
        assert_eq!(plain.interface.by_variable_name("Shininess").unwrap().ty, ShaderDataType::Float);
    }
}
