//! Named shader snippets resolved through `#include "Name"`
//!
//! The library ships the engine's shared GLSL (lighting, shadows, clipping,
//! PBR helpers). Applications may register their own snippets. Each snippet
//! is expanded at most once per shader so shared includes behave like
//! `#pragma once`.

use std::collections::HashMap;

use crate::{Result, ShaderError};

/// Maximum light sources uploaded per draw
pub const MAX_LIGHT_COUNT: usize = 32;
/// Maximum user clipping planes
pub const MAX_CLIPPING_PLANES: usize = 8;
/// Directional/spot shadow maps sampled per draw
pub const MAX_SHADOW_MAPS: usize = 4;
/// Point-light shadow cubemaps sampled per draw
pub const MAX_POINT_SHADOW_MAPS: usize = 4;

const CONSTANTS: &str = "\
const float PI = 3.14159265359;
const float EPSILON = 0.0001;
";

const LIGHTING_UTILS: &str = "\
const int POINT_LIGHT = 0;
const int DIRECTIONAL_LIGHT = 1;
const int SPOT_LIGHT = 2;

struct LightSource
{
    int Type;
    vec3 Position;
    vec3 Direction;
    vec3 Attenuation;
    vec3 Color;
    float Ambient;
    float Intensity;
    int ShadowIndex;
};

uniform LightSource u_LightSources[MAX_LIGHT_COUNT];
uniform int u_UsedLightSources;

float Attenuate(LightSource light, float distance)
{
    return 1.0 / (light.Attenuation.x + light.Attenuation.y * distance + light.Attenuation.z * distance * distance);
}

vec3 LightDirection(LightSource light, vec3 position)
{
    if (light.Type == DIRECTIONAL_LIGHT)
        return normalize(-light.Direction);
    return normalize(light.Position - position);
}
";

const LIGHTING: &str = "\
#include \"LightingUtils.h\"

vec3 CalculateLight(LightSource light, vec3 position, vec3 normal, vec3 viewDirection, vec3 albedo, float shininess)
{
    vec3 lightDirection = LightDirection(light, position);
    float diffuse = max(dot(normal, lightDirection), 0.0);
    vec3 halfway = normalize(lightDirection + viewDirection);
    float specular = pow(max(dot(normal, halfway), 0.0), shininess);
    float attenuation = light.Type == DIRECTIONAL_LIGHT ? 1.0 : Attenuate(light, length(light.Position - position));
    vec3 ambient = light.Ambient * light.Color;
    return (ambient + (diffuse + specular) * light.Color * light.Intensity) * albedo * attenuation;
}

vec3 CalculateLighting(vec3 position, vec3 normal, vec3 viewDirection, vec3 albedo, float shininess)
{
    vec3 result = vec3(0.0);
    for (int i = 0; i < u_UsedLightSources; i++)
        result += CalculateLight(u_LightSources[i], position, normal, viewDirection, albedo, shininess);
    return result;
}
";

const SHADOWS: &str = "\
#ifdef SHADOW_MAP
uniform sampler2D u_ShadowMaps[MAX_SHADOW_MAPS];
uniform mat4 u_LightSpaceTransforms[MAX_SHADOW_MAPS];
uniform int u_UsedShadowMaps;
uniform samplerCube u_PointShadowMaps[MAX_POINT_SHADOW_MAPS];
uniform vec3 u_PointShadowPositions[MAX_POINT_SHADOW_MAPS];
uniform float u_PointShadowFarPlanes[MAX_POINT_SHADOW_MAPS];
uniform int u_UsedPointShadowMaps;

float DirectionalShadow(int index, vec3 position)
{
    vec4 lightSpace = u_LightSpaceTransforms[index] * vec4(position, 1.0);
    vec3 coords = lightSpace.xyz / lightSpace.w * 0.5 + 0.5;
    float closest = texture(u_ShadowMaps[index], coords.xy).r;
    return coords.z - 0.005 > closest ? 1.0 : 0.0;
}

float PointShadow(int index, vec3 position)
{
    vec3 fromLight = position - u_PointShadowPositions[index];
    float closest = texture(u_PointShadowMaps[index], fromLight).r * u_PointShadowFarPlanes[index];
    return length(fromLight) - 0.05 > closest ? 1.0 : 0.0;
}
#endif
";

const CLIPPING: &str = "\
uniform vec4 u_ClippingPlanes[MAX_CLIPPING_PLANES];
uniform int u_UsedClippingPlanes;

void ApplyClippingPlanes(vec4 worldPosition)
{
    for (int i = 0; i < u_UsedClippingPlanes; i++)
        gl_ClipDistance[i] = dot(worldPosition, u_ClippingPlanes[i]);
}
";

const PBR_UTILS: &str = "\
#include \"Constants.h\"

float DistributionGGX(vec3 normal, vec3 halfway, float roughness)
{
    float a = roughness * roughness;
    float a2 = a * a;
    float nDotH = max(dot(normal, halfway), 0.0);
    float denom = nDotH * nDotH * (a2 - 1.0) + 1.0;
    return a2 / (PI * denom * denom);
}

float GeometrySchlickGGX(float nDotV, float roughness)
{
    float k = (roughness + 1.0) * (roughness + 1.0) / 8.0;
    return nDotV / (nDotV * (1.0 - k) + k);
}

vec3 FresnelSchlick(float cosTheta, vec3 f0)
{
    return f0 + (1.0 - f0) * pow(clamp(1.0 - cosTheta, 0.0, 1.0), 5.0);
}
";

const PBR: &str = "\
#include \"LightingUtils.h\"
#include \"PBRUtils.h\"

vec3 CalculatePBR(vec3 position, vec3 normal, vec3 viewDirection, vec3 albedo, float metallic, float roughness)
{
    vec3 f0 = mix(vec3(0.04), albedo, metallic);
    vec3 result = vec3(0.0);
    for (int i = 0; i < u_UsedLightSources; i++)
    {
        LightSource light = u_LightSources[i];
        vec3 l = LightDirection(light, position);
        vec3 h = normalize(viewDirection + l);
        float nDotL = max(dot(normal, l), 0.0);
        float nDotV = max(dot(normal, viewDirection), 0.0);
        vec3 f = FresnelSchlick(max(dot(h, viewDirection), 0.0), f0);
        float g = GeometrySchlickGGX(nDotV, roughness) * GeometrySchlickGGX(nDotL, roughness);
        vec3 specular = DistributionGGX(normal, h, roughness) * g * f / (4.0 * nDotV * nDotL + EPSILON);
        vec3 kd = (vec3(1.0) - f) * (1.0 - metallic);
        result += (kd * albedo / PI + specular) * light.Color * light.Intensity * nDotL;
    }
    return result;
}
";

/// Snippet store used during `#include` expansion
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    sources: HashMap<String, String>,
}

impl ShaderLibrary {
    /// Empty library without the engine snippets
    pub fn empty() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// Library preloaded with the engine snippets
    pub fn with_builtins() -> Self {
        let mut library = Self::empty();
        library.register("Constants.h", CONSTANTS);
        library.register(
            "LightingUtils.h",
            format!("const int MAX_LIGHT_COUNT = {};\n{}", MAX_LIGHT_COUNT, LIGHTING_UTILS),
        );
        library.register("Lighting.h", LIGHTING);
        library.register(
            "Shadows.h",
            format!(
                "const int MAX_SHADOW_MAPS = {};\nconst int MAX_POINT_SHADOW_MAPS = {};\n{}",
                MAX_SHADOW_MAPS, MAX_POINT_SHADOW_MAPS, SHADOWS
            ),
        );
        library.register(
            "Clipping.h",
            format!("const int MAX_CLIPPING_PLANES = {};\n{}", MAX_CLIPPING_PLANES, CLIPPING),
        );
        library.register("PBRUtils.h", PBR_UTILS);
        library.register("PBR.h", PBR);
        library
    }

    /// Add or replace a snippet
    pub fn register(&mut self, filename: impl Into<String>, source: impl Into<String>) {
        let filename = filename.into();
        log::debug!("Registered shader snippet '{}'", filename);
        self.sources.insert(filename, source.into());
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.sources.contains_key(filename)
    }

    pub fn get(&self, filename: &str) -> Option<&str> {
        self.sources.get(filename).map(String::as_str)
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Expand every `#include "Name"` line recursively
    pub fn resolve_includes(&self, source: &str) -> Result<String> {
        let mut out = String::with_capacity(source.len());
        let mut included = Vec::new();
        let mut stack = Vec::new();
        self.expand(source, &mut out, &mut included, &mut stack)?;
        Ok(out)
    }

    fn expand(
        &self,
        source: &str,
        out: &mut String,
        included: &mut Vec<String>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        for line in source.lines() {
            let Some(filename) = parse_include(line) else {
                out.push_str(line);
                out.push('\n');
                continue;
            };

            if stack.iter().any(|f| f == filename) {
                return Err(ShaderError::IncludeCycle(filename.to_string()));
            }
            if included.iter().any(|f| f == filename) {
                continue;
            }
            let body = self
                .get(filename)
                .ok_or_else(|| ShaderError::IncludeNotFound(filename.to_string()))?;

            included.push(filename.to_string());
            stack.push(filename.to_string());
            self.expand(body, out, included, stack)?;
            stack.pop();
        }
        Ok(())
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn parse_include(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("#include")?.trim();
    let rest = rest
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| rest.strip_prefix('<').and_then(|r| r.strip_suffix('>')))?;
    Some(rest.trim())
}
