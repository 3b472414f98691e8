//! GLSL sources generated for the automatic shader surface.
//!
//! The programs implement Lambertian diffuse plus a Blinn specular lobe
//! scaled by smoothness, up to [`MAX_LIGHTS`] point/spot or directional
//! lights, an ambient term, emission, optional normal mapping and an alpha
//! cutout below [`ALPHA_CUTOUT`].

use crate::light::MAX_LIGHTS;
use crate::types::{BASE_COLOR_UNIT, EMISSION_UNIT, NORMAL_UNIT, SMOOTHNESS_UNIT};

/// Fragments whose base color alpha is below this value are discarded.
pub const ALPHA_CUTOUT: f32 = 0.1;

pub(crate) const MODEL_MAT: &str = "model_mat";
pub(crate) const VIEW_MAT: &str = "view_mat";
pub(crate) const PROJECTION_MAT: &str = "projection_mat";
pub(crate) const AMBIENT: &str = "ambient";
pub(crate) const LIGHT_COUNT: &str = "light_count";
pub(crate) const BASE_COLOR_VALUE: &str = "base_color_value";
pub(crate) const BASE_COLOR_FROM_MAP: &str = "base_color_from_map";
pub(crate) const NORMAL_FROM_MAP: &str = "normal_from_map";
pub(crate) const SMOOTHNESS_VALUE: &str = "smoothness_value";
pub(crate) const SMOOTHNESS_FROM_MAP: &str = "smoothness_from_map";
pub(crate) const EMISSION_VALUE: &str = "emission_value";
pub(crate) const EMISSION_FROM_MAP: &str = "emission_from_map";

/// Sampler uniforms and the unit each one reads from.
pub(crate) const SAMPLERS: [(&str, u32); 4] = [
    ("base_color_map", BASE_COLOR_UNIT),
    ("normal_map", NORMAL_UNIT),
    ("smoothness_map", SMOOTHNESS_UNIT),
    ("emission_map", EMISSION_UNIT),
];

/// Value written to `light_type[i]` for each slot state.
pub(crate) const LIGHT_UNUSED: i32 = 0;
pub(crate) const LIGHT_POINT: i32 = 1;
pub(crate) const LIGHT_DIRECTIONAL: i32 = 2;

/// Per-slot light arrays, indexed `name[i]`.
pub(crate) const LIGHT_TYPE: &str = "light_type";
pub(crate) const LIGHT_POSITION: &str = "light_position";
pub(crate) const LIGHT_DIRECTION: &str = "light_direction";
pub(crate) const LIGHT_COLOR: &str = "light_color";
pub(crate) const LIGHT_ATTENUATION: &str = "light_attenuation";
pub(crate) const LIGHT_CUTOFF: &str = "light_cutoff";

pub(crate) fn light_uniform(array: &str, slot: usize) -> String {
    format!("{array}[{slot}]")
}

pub fn auto_vertex_source() -> String {
    AUTO_VERTEX.to_string()
}

pub fn auto_fragment_source() -> String {
    format!(
        "{header}{body}",
        header = AUTO_FRAGMENT_HEADER.replace("{MAX_LIGHTS}", &MAX_LIGHTS.to_string()),
        body = AUTO_FRAGMENT_BODY
            .replace("{ALPHA_CUTOUT}", &format!("{ALPHA_CUTOUT:?}"))
            .replace("{LIGHT_UNUSED}", &LIGHT_UNUSED.to_string())
            .replace("{LIGHT_DIRECTIONAL}", &LIGHT_DIRECTIONAL.to_string()),
    )
}

const AUTO_VERTEX: &str = r"#version 330 core
layout(location = 0) in vec3 a_position;
layout(location = 1) in vec2 a_uv;
layout(location = 2) in vec3 a_normal;

uniform mat4 model_mat;
uniform mat4 view_mat;
uniform mat4 projection_mat;

out vec3 v_world;
out vec2 v_uv;
out vec3 v_normal;

void main() {
    vec4 world = model_mat * vec4(a_position, 1.0);
    v_world = world.xyz;
    v_uv = a_uv;
    v_normal = mat3(transpose(inverse(model_mat))) * a_normal;
    gl_Position = projection_mat * view_mat * world;
}
";

const AUTO_FRAGMENT_HEADER: &str = r"#version 330 core
#define MAX_LIGHTS {MAX_LIGHTS}
in vec3 v_world;
in vec2 v_uv;
in vec3 v_normal;
out vec4 frag_color;

uniform sampler2D base_color_map;
uniform sampler2D normal_map;
uniform sampler2D smoothness_map;
uniform sampler2D emission_map;

uniform vec4 base_color_value;
uniform int base_color_from_map;
uniform int normal_from_map;
uniform float smoothness_value;
uniform int smoothness_from_map;
uniform float emission_value;
uniform int emission_from_map;

uniform mat4 view_mat;
uniform vec3 ambient;
uniform int light_count;
uniform int light_type[{MAX_LIGHTS}];
uniform vec3 light_position[{MAX_LIGHTS}];
uniform vec3 light_direction[{MAX_LIGHTS}];
uniform vec3 light_color[{MAX_LIGHTS}];
uniform float light_attenuation[{MAX_LIGHTS}];
uniform float light_cutoff[{MAX_LIGHTS}];
";

const AUTO_FRAGMENT_BODY: &str = r"
vec3 surface_normal() {
    vec3 n = normalize(v_normal);
    if (normal_from_map == 0) {
        return n;
    }
    vec3 t = normalize(cross(n, abs(n.y) < 0.99 ? vec3(0.0, 1.0, 0.0) : vec3(1.0, 0.0, 0.0)));
    vec3 b = cross(n, t);
    vec3 mapped = texture(normal_map, v_uv).rgb * 2.0 - 1.0;
    return normalize(mat3(t, b, n) * mapped);
}

void main() {
    vec4 base = base_color_from_map != 0 ? texture(base_color_map, v_uv) : base_color_value;
    if (base.a < {ALPHA_CUTOUT}) {
        discard;
    }
    float smoothness = smoothness_from_map != 0 ? texture(smoothness_map, v_uv).r : smoothness_value;
    float emission = emission_from_map != 0 ? texture(emission_map, v_uv).r : emission_value;

    vec3 n = surface_normal();
    vec3 eye = (inverse(view_mat) * vec4(0.0, 0.0, 0.0, 1.0)).xyz;
    vec3 v = normalize(eye - v_world);
    float shininess = mix(2.0, 256.0, smoothness);

    vec3 lit = ambient * base.rgb;
    for (int i = 0; i < MAX_LIGHTS; ++i) {
        if (i >= light_count || light_type[i] == {LIGHT_UNUSED}) {
            continue;
        }
        vec3 l;
        float falloff = 1.0;
        if (light_type[i] == {LIGHT_DIRECTIONAL}) {
            l = normalize(light_direction[i]);
        } else {
            vec3 to_light = light_position[i] - v_world;
            float distance = length(to_light);
            l = to_light / max(distance, 1e-4);
            falloff = 1.0 / (1.0 + light_attenuation[i] * distance);
            float spot = dot(-l, normalize(light_direction[i]));
            if (light_cutoff[i] < 180.0 && spot < cos(radians(light_cutoff[i]))) {
                falloff = 0.0;
            }
        }
        float diffuse = max(dot(n, l), 0.0);
        vec3 h = normalize(l + v);
        float specular = diffuse > 0.0 ? pow(max(dot(n, h), 0.0), shininess) * smoothness : 0.0;
        lit += (base.rgb * diffuse + vec3(specular)) * light_color[i] * falloff;
    }
    lit += base.rgb * emission;
    frag_color = vec4(lit, base.a);
}
";
