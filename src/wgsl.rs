//! Embedded WGSL fragment sources, one per texture node kind.
//!
//! Uniform struct members mirror the registry's uniform schema; texture
//! inputs sample transparent black when unbound, so a shader never needs a
//! bound/unbound branch.

pub const NOISE_FS: &str = r#"
struct NoiseParams {
    u_offset: vec2<f32>,
    u_scale: f32,
    u_octaves: f32,
    u_seamless: f32,
    _pad0: f32,
    _pad1: vec2<f32>,
}

@group(0) @binding(0)
var<uniform> params: NoiseParams;

fn hash21(p: vec2<f32>) -> f32 {
    var q = fract(p * vec2<f32>(123.34, 345.45));
    q = q + dot(q, q + 34.345);
    return fract(q.x * q.y);
}

fn value_noise(p: vec2<f32>) -> f32 {
    let i = floor(p);
    let f = fract(p);
    let u = f * f * (3.0 - 2.0 * f);
    let a = hash21(i);
    let b = hash21(i + vec2<f32>(1.0, 0.0));
    let c = hash21(i + vec2<f32>(0.0, 1.0));
    let d = hash21(i + vec2<f32>(1.0, 1.0));
    return mix(mix(a, b, u.x), mix(c, d, u.x), u.y);
}

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    var p = uv;
    if (params.u_seamless > 0.5) {
        p = fract(p);
    }
    p = (p + params.u_offset) * params.u_scale;

    var total = 0.0;
    var amplitude = 0.5;
    var frequency = 1.0;
    let octaves = max(1, i32(params.u_octaves));
    for (var i = 0; i < octaves; i = i + 1) {
        total = total + amplitude * value_noise(p * frequency);
        amplitude = amplitude * 0.5;
        frequency = frequency * 2.0;
    }
    return vec4<f32>(total, total, total, 1.0);
}
"#;

pub const ADD_FS: &str = r#"
struct AddParams {
    u_mix: f32,
    _pad0: f32,
    _pad1: vec2<f32>,
}

@group(0) @binding(0)
var<uniform> params: AddParams;

@group(1) @binding(0)
var u_texture_a: texture_2d<f32>;
@group(1) @binding(1)
var u_texture_b: texture_2d<f32>;
@group(1) @binding(2)
var samp: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let a = textureSample(u_texture_a, samp, uv);
    let b = textureSample(u_texture_b, samp, uv);
    return mix(a, a + b, params.u_mix);
}
"#;

pub const DISPLACE_FS: &str = r#"
struct DisplaceParams {
    u_direction: vec2<f32>,
    u_strength: f32,
    _pad0: f32,
}

@group(0) @binding(0)
var<uniform> params: DisplaceParams;

@group(1) @binding(0)
var u_source: texture_2d<f32>;
@group(1) @binding(1)
var u_map: texture_2d<f32>;
@group(1) @binding(2)
var samp: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let height = textureSample(u_map, samp, uv).r;
    let shifted = uv + params.u_direction * (height - 0.5) * params.u_strength;
    return textureSample(u_source, samp, shifted);
}
"#;

pub const LIMIT_FS: &str = r#"
struct LimitParams {
    u_min: f32,
    u_max: f32,
    u_smooth: f32,
    _pad0: f32,
}

@group(0) @binding(0)
var<uniform> params: LimitParams;

@group(1) @binding(0)
var u_source: texture_2d<f32>;
@group(1) @binding(1)
var samp: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let src = textureSample(u_source, samp, uv);
    if (params.u_smooth > 0.5) {
        let rgb = smoothstep(vec3<f32>(params.u_min), vec3<f32>(params.u_max), src.rgb)
            * (params.u_max - params.u_min) + vec3<f32>(params.u_min);
        return vec4<f32>(rgb, src.a);
    }
    let rgb = clamp(src.rgb, vec3<f32>(params.u_min), vec3<f32>(params.u_max));
    return vec4<f32>(rgb, src.a);
}
"#;
