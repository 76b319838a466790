//! Multi-resolution shadow pipeline.
//!
//! The draw passes leave a per-pixel shadow strength in the full-resolution
//! shadow source. From there:
//!
//! 1. **Downsample** into the working resolution `ceil(full / 2^k)`, keeping
//!    the strongest source in each block so thin shapes still cast.
//! 2. **Ray-march** from every working pixel toward the light, writing a sharp
//!    shadow mask and a rim-light mask.
//! 3. **Blur** (blurred styles only) the mask with a ping-pong pair. Pass `i`
//!    of `n` samples at offset `2^(n-1-i)`, so the kernel shrinks each pass.
//! 4. **Composite** the low-resolution masks onto the colour buffer.
//!
//! With shadows off, a single copy pass runs instead.
//!
//! The working buffers are cached against the working resolution and only
//! reallocated when it changes, either through a resize or a new downsample
//! factor.

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, UVec2, Vec2, Vec3, Vec4};
use rayon::prelude::*;

use super::framebuffer::{Framebuffer, ScalarBuffer};
use super::ShadowType;
use crate::config::SimConfig;

/// Upper bound on ray-march samples per working pixel.
pub const MAX_MARCH_STEPS: u32 = 48;

/// Brightness added at full rim strength.
pub const RIM_LIGHT: f32 = 0.15;

/// Largest downsample exponent. `SimConfig::validate` clamps to this.
pub const MAX_DOWNSAMPLING: u32 = 30;

fn downsample_factor(downsampling: u32) -> u32 {
    1 << downsampling.min(MAX_DOWNSAMPLING)
}

/// `ceil(full / 2^downsampling)`, at least one pixel per axis.
pub fn working_resolution(full: UVec2, downsampling: u32) -> UVec2 {
    let factor = downsample_factor(downsampling);
    UVec2::new(full.x.div_ceil(factor), full.y.div_ceil(factor)).max(UVec2::ONE)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowParams {
    pub kind: ShadowType,
    pub darkness: f32,
    /// Strength lost per full-resolution pixel of distance from the caster.
    pub falloff: f32,
    pub direction_degrees: f32,
    pub blur_iterations: u32,
    pub rim_strength: f32,
    pub downsampling: u32,
}

impl ShadowParams {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            kind: config.shadow_type,
            darkness: config.shadow_darkness,
            falloff: config.shadow_falloff,
            direction_degrees: config.shadow_direction,
            blur_iterations: config.shadow_blur_iterations,
            rim_strength: config.rim_shading_strength,
            downsampling: config.shadow_downsampling,
        }
    }

    pub fn factor(&self) -> u32 {
        downsample_factor(self.downsampling)
    }
}

/// Uniform block shared by the shadow shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShadowUniforms {
    pub full_size: [u32; 2],
    pub work_size: [u32; 2],
    pub light: [f32; 2],
    pub factor: u32,
    pub blur_offset: u32,
    pub darkness: f32,
    pub falloff: f32,
    pub rim_strength: f32,
    pub max_steps: u32,
}

impl ShadowUniforms {
    pub fn new(params: &ShadowParams, full: UVec2, light: Vec2) -> Self {
        Self {
            full_size: full.to_array(),
            work_size: working_resolution(full, params.downsampling).to_array(),
            light: light.to_array(),
            factor: params.factor(),
            blur_offset: 1,
            darkness: params.darkness,
            falloff: params.falloff,
            rim_strength: params.rim_strength,
            max_steps: MAX_MARCH_STEPS,
        }
    }
}

/// The five working buffers, all at the working resolution.
#[derive(Clone, Debug)]
pub struct ShadowBuffers {
    pub occluders: ScalarBuffer,
    pub mask: ScalarBuffer,
    pub rim: ScalarBuffer,
    pub blur_ping: ScalarBuffer,
    pub blur_pong: ScalarBuffer,
}

impl ShadowBuffers {
    fn new(size: UVec2) -> Self {
        Self {
            occluders: ScalarBuffer::new(size),
            mask: ScalarBuffer::new(size),
            rim: ScalarBuffer::new(size),
            blur_ping: ScalarBuffer::new(size),
            blur_pong: ScalarBuffer::new(size),
        }
    }
}

/// Which buffer holds the final shadow mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MaskSource {
    Sharp,
    Ping,
    Pong,
}

#[derive(Debug, Default)]
pub struct ShadowPipeline {
    buffers: Option<ShadowBuffers>,
    resolution: Option<UVec2>,
    reallocations: usize,
}

impl ShadowPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Working resolution of the current buffers.
    pub fn resolution(&self) -> Option<UVec2> {
        self.resolution
    }

    /// Number of times the working buffers were (re)allocated.
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    pub fn buffers(&self) -> Option<&ShadowBuffers> {
        self.buffers.as_ref()
    }

    /// Re-derive the working resolution and reallocate if it changed.
    pub fn prepare(&mut self, full: UVec2, downsampling: u32) -> UVec2 {
        let res = working_resolution(full, downsampling);
        if self.resolution != Some(res) || self.buffers.is_none() {
            log::debug!("Shadow buffers {:?} -> {}x{}", self.resolution, res.x, res.y);
            self.buffers = Some(ShadowBuffers::new(res));
            self.resolution = Some(res);
            self.reallocations += 1;
        }
        res
    }

    /// Shade `frame` into `out`.
    pub fn run(&mut self, frame: &Framebuffer, params: &ShadowParams, out: &mut Vec<Vec4>) {
        let Some(light) = params.kind.toward_light(params.direction_degrees) else {
            apply_without_shadows(frame, out);
            return;
        };
        self.prepare(frame.size(), params.downsampling);
        let Some(buffers) = self.buffers.as_mut() else {
            apply_without_shadows(frame, out);
            return;
        };

        downsample(&frame.shadow_source, &mut buffers.occluders, params.factor());
        ray_march(&buffers.occluders, &mut buffers.mask, &mut buffers.rim, light, params);

        let source = if params.kind.is_blurred() && params.blur_iterations > 0 {
            blur(buffers, params.blur_iterations)
        } else {
            MaskSource::Sharp
        };
        let mask = match source {
            MaskSource::Sharp => &buffers.mask,
            MaskSource::Ping => &buffers.blur_ping,
            MaskSource::Pong => &buffers.blur_pong,
        };
        composite(frame, mask, &buffers.rim, params, out);
    }
}

/// Strongest full-resolution source in each `factor × factor` block.
pub fn downsample(full: &ScalarBuffer, work: &mut ScalarBuffer, factor: u32) {
    let full_size = full.size();
    let width = work.size().x as usize;
    work.data_mut().par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let y0 = (y as u32).saturating_mul(factor).min(full_size.y.saturating_sub(1));
        let y1 = y0.saturating_add(factor).min(full_size.y);
        for (x, out) in row.iter_mut().enumerate() {
            let x0 = (x as u32).saturating_mul(factor).min(full_size.x.saturating_sub(1));
            let x1 = x0.saturating_add(factor).min(full_size.x);
            let mut strongest = 0.0f32;
            for fy in y0..y1 {
                for fx in x0..x1 {
                    strongest = strongest.max(full.get(fx, fy));
                }
            }
            *out = strongest;
        }
    });
}

/// March toward the light from every working pixel.
///
/// The mask is the strongest occluder met on the way, faded by distance. The
/// rim is how much stronger a pixel is than its neighbour toward the light,
/// which lights the edges that face it.
pub fn ray_march(
    occluders: &ScalarBuffer,
    mask: &mut ScalarBuffer,
    rim: &mut ScalarBuffer,
    light: Vec2,
    params: &ShadowParams,
) {
    let size = occluders.size();
    let bounds = size.as_vec2();
    let factor = params.factor() as f32;
    let width = size.x as usize;

    mask.data_mut()
        .par_chunks_mut(width)
        .zip(rim.data_mut().par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, (mask_row, rim_row))| {
            for x in 0..width {
                let p = Vec2::new(x as f32, y as f32) + 0.5;
                let mut shadow = 0.0f32;
                for s in 1..=MAX_MARCH_STEPS {
                    let q = p + light * s as f32;
                    if q.cmplt(Vec2::ZERO).any() || q.cmpge(bounds).any() {
                        break;
                    }
                    let fade = (1.0 - params.falloff * s as f32 * factor).max(0.0);
                    shadow = shadow.max(occluders.get_clamped(q.floor().as_ivec2()) * fade);
                }
                let here = occluders.get_clamped(IVec2::new(x as i32, y as i32));
                let ahead = occluders.get_clamped((p + light).floor().as_ivec2());
                mask_row[x] = shadow.min(1.0);
                rim_row[x] = ((here - ahead) * params.rim_strength).clamp(0.0, 1.0);
            }
        });
}

/// One 3×3 box pass with taps `offset` pixels apart.
pub fn blur_pass(read: &ScalarBuffer, write: &mut ScalarBuffer, offset: i32) {
    let width = write.size().x as usize;
    write.data_mut().par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, out) in row.iter_mut().enumerate() {
            let centre = IVec2::new(x as i32, y as i32);
            let mut total = 0.0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    total += read.get_clamped(centre + IVec2::new(dx, dy) * offset);
                }
            }
            *out = total / 9.0;
        }
    });
}

/// Blur the sharp mask `iterations` times. The first pass reads the mask,
/// later passes alternate between the ping-pong pair.
fn blur(buffers: &mut ShadowBuffers, iterations: u32) -> MaskSource {
    let mut current = MaskSource::Sharp;
    for i in 0..iterations {
        let offset = 1i32 << (iterations - 1 - i).min(16);
        current = match current {
            MaskSource::Sharp => {
                blur_pass(&buffers.mask, &mut buffers.blur_ping, offset);
                MaskSource::Ping
            }
            MaskSource::Ping => {
                blur_pass(&buffers.blur_ping, &mut buffers.blur_pong, offset);
                MaskSource::Pong
            }
            MaskSource::Pong => {
                blur_pass(&buffers.blur_pong, &mut buffers.blur_ping, offset);
                MaskSource::Ping
            }
        };
    }
    current
}

/// Darken by the mask and add rim light, sampling the working buffers at the
/// block each full-resolution pixel belongs to.
pub fn composite(frame: &Framebuffer, mask: &ScalarBuffer, rim: &ScalarBuffer, params: &ShadowParams, out: &mut Vec<Vec4>) {
    let size = frame.size();
    let factor = params.factor();
    let work_max = mask.size().saturating_sub(UVec2::ONE);
    out.resize(frame.color.len(), Vec4::ZERO);

    out.par_chunks_mut(size.x as usize).enumerate().for_each(|(y, row)| {
        for (x, px) in row.iter_mut().enumerate() {
            let w = (UVec2::new(x as u32, y as u32) / factor).min(work_max);
            let m = mask.get(w.x, w.y);
            let r = rim.get(w.x, w.y);
            let c = frame.color[y * size.x as usize + x];
            let lit = c.truncate() * (1.0 - m * params.darkness) + Vec3::splat(r * RIM_LIGHT);
            *px = lit.extend(c.w);
        }
    });
}

/// Copy the colour buffer straight through.
pub fn apply_without_shadows(frame: &Framebuffer, out: &mut Vec<Vec4>) {
    out.clear();
    out.extend_from_slice(&frame.color);
}

/// Block maximum of the full-resolution shadow source.
pub const SHADOW_DOWNSAMPLE_WGSL: &str = r#"
struct ShadowUniforms {
    full_size: vec2<u32>,
    work_size: vec2<u32>,
    light: vec2<f32>,
    factor: u32,
    blur_offset: u32,
    darkness: f32,
    falloff: f32,
    rim_strength: f32,
    max_steps: u32,
};

@group(0) @binding(0) var<storage, read> shadow_source: array<f32>;
@group(0) @binding(1) var<storage, read_write> occluders: array<f32>;
@group(0) @binding(2) var<uniform> params: ShadowUniforms;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    if global_id.x >= params.work_size.x || global_id.y >= params.work_size.y {
        return;
    }
    let x0 = min(global_id.x * params.factor, params.full_size.x - 1u);
    let y0 = min(global_id.y * params.factor, params.full_size.y - 1u);
    let x1 = min(x0 + params.factor, params.full_size.x);
    let y1 = min(y0 + params.factor, params.full_size.y);
    var strongest = 0.0;
    for (var y = y0; y < y1; y = y + 1u) {
        for (var x = x0; x < x1; x = x + 1u) {
            strongest = max(strongest, shadow_source[y * params.full_size.x + x]);
        }
    }
    occluders[global_id.y * params.work_size.x + global_id.x] = strongest;
}
"#;

/// Sharp shadow and rim masks at the working resolution.
pub const SHADOW_RAY_MARCH_WGSL: &str = r#"
struct ShadowUniforms {
    full_size: vec2<u32>,
    work_size: vec2<u32>,
    light: vec2<f32>,
    factor: u32,
    blur_offset: u32,
    darkness: f32,
    falloff: f32,
    rim_strength: f32,
    max_steps: u32,
};

@group(0) @binding(0) var<storage, read> occluders: array<f32>;
@group(0) @binding(1) var<storage, read_write> shadow_mask: array<f32>;
@group(0) @binding(2) var<storage, read_write> rim_mask: array<f32>;
@group(0) @binding(3) var<uniform> params: ShadowUniforms;

fn occluder_at(p: vec2<i32>) -> f32 {
    let c = clamp(p, vec2<i32>(0, 0), vec2<i32>(params.work_size) - vec2<i32>(1, 1));
    return occluders[u32(c.y) * params.work_size.x + u32(c.x)];
}

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    if global_id.x >= params.work_size.x || global_id.y >= params.work_size.y {
        return;
    }
    let bounds = vec2<f32>(params.work_size);
    let p = vec2<f32>(global_id.xy) + vec2<f32>(0.5, 0.5);
    var shadow = 0.0;
    for (var s = 1u; s <= params.max_steps; s = s + 1u) {
        let q = p + params.light * f32(s);
        if q.x < 0.0 || q.y < 0.0 || q.x >= bounds.x || q.y >= bounds.y {
            break;
        }
        let fade = max(1.0 - params.falloff * f32(s * params.factor), 0.0);
        shadow = max(shadow, occluder_at(vec2<i32>(floor(q))) * fade);
    }
    let here = occluder_at(vec2<i32>(global_id.xy));
    let ahead = occluder_at(vec2<i32>(floor(p + params.light)));
    let i = global_id.y * params.work_size.x + global_id.x;
    shadow_mask[i] = min(shadow, 1.0);
    rim_mask[i] = clamp((here - ahead) * params.rim_strength, 0.0, 1.0);
}
"#;

/// One blur pass. The host sets `blur_offset` and swaps the bind groups.
pub const SHADOW_BLUR_WGSL: &str = r#"
struct ShadowUniforms {
    full_size: vec2<u32>,
    work_size: vec2<u32>,
    light: vec2<f32>,
    factor: u32,
    blur_offset: u32,
    darkness: f32,
    falloff: f32,
    rim_strength: f32,
    max_steps: u32,
};

@group(0) @binding(0) var<storage, read> blur_read: array<f32>;
@group(0) @binding(1) var<storage, read_write> blur_write: array<f32>;
@group(0) @binding(2) var<uniform> params: ShadowUniforms;

fn read_at(p: vec2<i32>) -> f32 {
    let c = clamp(p, vec2<i32>(0, 0), vec2<i32>(params.work_size) - vec2<i32>(1, 1));
    return blur_read[u32(c.y) * params.work_size.x + u32(c.x)];
}

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    if global_id.x >= params.work_size.x || global_id.y >= params.work_size.y {
        return;
    }
    let o = i32(params.blur_offset);
    let centre = vec2<i32>(global_id.xy);
    var total = 0.0;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            total = total + read_at(centre + vec2<i32>(dx, dy) * o);
        }
    }
    blur_write[global_id.y * params.work_size.x + global_id.x] = total / 9.0;
}
"#;

/// Apply the masks to the colour buffer.
pub const SHADOW_COMPOSITE_WGSL: &str = r#"
struct ShadowUniforms {
    full_size: vec2<u32>,
    work_size: vec2<u32>,
    light: vec2<f32>,
    factor: u32,
    blur_offset: u32,
    darkness: f32,
    falloff: f32,
    rim_strength: f32,
    max_steps: u32,
};

const RIM_LIGHT: f32 = 0.15;

@group(0) @binding(0) var<storage, read> color_in: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read> shadow_mask: array<f32>;
@group(0) @binding(2) var<storage, read> rim_mask: array<f32>;
@group(0) @binding(3) var<storage, read_write> color_out: array<vec4<f32>>;
@group(0) @binding(4) var<uniform> params: ShadowUniforms;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    if global_id.x >= params.full_size.x || global_id.y >= params.full_size.y {
        return;
    }
    let w = min(global_id.xy / params.factor, params.work_size - vec2<u32>(1u, 1u));
    let wi = w.y * params.work_size.x + w.x;
    let i = global_id.y * params.full_size.x + global_id.x;
    let c = color_in[i];
    let lit = c.rgb * (1.0 - shadow_mask[wi] * params.darkness) + vec3<f32>(rim_mask[wi] * RIM_LIGHT);
    color_out[i] = vec4<f32>(lit, c.a);
}
"#;

/// Copy pass used when shadows are off.
pub const APPLY_WITHOUT_SHADOWS_WGSL: &str = r#"
struct ShadowUniforms {
    full_size: vec2<u32>,
    work_size: vec2<u32>,
    light: vec2<f32>,
    factor: u32,
    blur_offset: u32,
    darkness: f32,
    falloff: f32,
    rim_strength: f32,
    max_steps: u32,
};

@group(0) @binding(0) var<storage, read> color_in: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read_write> color_out: array<vec4<f32>>;
@group(0) @binding(2) var<uniform> params: ShadowUniforms;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    if global_id.x >= params.full_size.x || global_id.y >= params.full_size.y {
        return;
    }
    let i = global_id.y * params.full_size.x + global_id.x;
    color_out[i] = color_in[i];
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_wgsl(code: &str) -> Result<(), String> {
        let module = naga::front::wgsl::parse_str(code)
            .map_err(|e| format!("WGSL parse error: {:?}", e))?;
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| format!("WGSL validation error: {:?}", e))?;
        Ok(())
    }

    fn params(kind: ShadowType, downsampling: u32) -> ShadowParams {
        ShadowParams {
            kind,
            darkness: 0.5,
            falloff: 0.0,
            direction_degrees: 90.0,
            blur_iterations: 2,
            rim_strength: 2.0,
            downsampling,
        }
    }

    /// A frame with one opaque caster block near the top-middle.
    fn frame(size: UVec2) -> Framebuffer {
        let mut fb = Framebuffer::new(size);
        fb.color.fill(Vec4::ONE);
        for y in size.y - 6..size.y - 2 {
            for x in size.x / 2 - 2..size.x / 2 + 2 {
                let i = fb.index(x, y);
                fb.shadow_source.data_mut()[i] = 1.0;
            }
        }
        fb
    }

    #[test]
    fn test_working_resolution_rounds_up() {
        assert_eq!(working_resolution(UVec2::new(600, 400), 0), UVec2::new(600, 400));
        assert_eq!(working_resolution(UVec2::new(601, 401), 1), UVec2::new(301, 201));
        assert_eq!(working_resolution(UVec2::new(5, 3), 2), UVec2::new(2, 1));
        assert_eq!(working_resolution(UVec2::new(1, 1), 4), UVec2::ONE);
    }

    #[test]
    fn test_deep_downsampling_is_honoured() {
        assert_eq!(working_resolution(UVec2::new(4096, 2048), 10), UVec2::new(4, 2));
        assert_eq!(working_resolution(UVec2::new(4096, 2048), MAX_DOWNSAMPLING), UVec2::ONE);

        let mut pipeline = ShadowPipeline::new();
        let full = UVec2::new(2048, 1024);
        assert_eq!(pipeline.prepare(full, 9), UVec2::new(4, 2));
        assert_eq!(pipeline.buffers().unwrap().mask.size(), UVec2::new(4, 2));

        let mut source = ScalarBuffer::new(UVec2::new(5, 3));
        source.data_mut()[14] = 0.9; // (4, 2)
        let mut work = ScalarBuffer::new(working_resolution(source.size(), 12));
        downsample(&source, &mut work, params(ShadowType::VerticalSharp, 12).factor());
        assert_eq!(work.data(), &[0.9f32]);
    }

    #[test]
    fn test_buffers_cached_until_resolution_changes() {
        let mut pipeline = ShadowPipeline::new();
        let full = UVec2::new(33, 17);
        pipeline.prepare(full, 1);
        pipeline.prepare(full, 1);
        assert_eq!(pipeline.reallocations(), 1);

        assert_eq!(pipeline.prepare(full, 2), UVec2::new(9, 5));
        assert_eq!(pipeline.reallocations(), 2);
        let buffers = pipeline.buffers().unwrap();
        assert_eq!(buffers.blur_pong.size(), UVec2::new(9, 5));
        assert_eq!(buffers.occluders.data().len(), 45);
    }

    #[test]
    fn test_downsample_keeps_thin_casters() {
        let mut full = ScalarBuffer::new(UVec2::new(4, 4));
        full.data_mut()[5] = 0.7; // (1, 1)
        let mut work = ScalarBuffer::new(UVec2::new(2, 2));
        downsample(&full, &mut work, 2);
        assert_eq!(work.data(), &[0.7f32, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_shadow_falls_below_caster() {
        let size = UVec2::new(16, 16);
        let fb = frame(size);
        let mut out = Vec::new();
        let mut pipeline = ShadowPipeline::new();
        pipeline.run(&fb, &params(ShadowType::VerticalSharp, 0), &mut out);

        // Directly below the caster is darkened, off to the side is not.
        assert!(out[fb.index(8, 2)].x < 0.6);
        assert_eq!(out[fb.index(1, 2)].x, 1.0);
        // Only the caster's top row faces empty space toward the light.
        let rim = &pipeline.buffers().unwrap().rim;
        assert!(rim.get(8, 13) > 0.0);
        assert_eq!(rim.get(8, 11), 0.0);
    }

    #[test]
    fn test_blur_spreads_shadow_sideways() {
        let size = UVec2::new(16, 16);
        let fb = frame(size);
        let mut sharp = Vec::new();
        let mut blurred = Vec::new();
        ShadowPipeline::new().run(&fb, &params(ShadowType::VerticalSharp, 0), &mut sharp);
        ShadowPipeline::new().run(&fb, &params(ShadowType::VerticalBlurred, 0), &mut blurred);
        let beside = fb.index(5, 4);
        assert_eq!(sharp[beside].x, 1.0);
        assert!(blurred[beside].x < 1.0);
    }

    #[test]
    fn test_no_shadows_copies_colour() {
        let fb = frame(UVec2::new(8, 8));
        let mut out = Vec::new();
        let mut pipeline = ShadowPipeline::new();
        pipeline.run(&fb, &params(ShadowType::None, 0), &mut out);
        assert_eq!(out, fb.color);
        assert_eq!(pipeline.reallocations(), 0);
    }

    #[test]
    fn test_downsampled_output_is_full_size() {
        let fb = frame(UVec2::new(21, 13));
        let mut out = Vec::new();
        let mut pipeline = ShadowPipeline::new();
        pipeline.run(&fb, &params(ShadowType::DirectionalBlurred, 2), &mut out);
        assert_eq!(out.len(), 21 * 13);
        assert_eq!(pipeline.resolution(), Some(UVec2::new(6, 4)));
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<ShadowUniforms>(), 48);
    }

    #[test]
    fn test_shaders_validate() {
        for (name, code) in [
            ("downsample", SHADOW_DOWNSAMPLE_WGSL),
            ("ray march", SHADOW_RAY_MARCH_WGSL),
            ("blur", SHADOW_BLUR_WGSL),
            ("composite", SHADOW_COMPOSITE_WGSL),
            ("copy", APPLY_WITHOUT_SHADOWS_WGSL),
        ] {
            if let Err(e) = validate_wgsl(code) {
                panic!("{} shader invalid: {}", name, e);
            }
        }
    }
}
