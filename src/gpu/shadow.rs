//! Shadow post-process on the device.

use glam::{UVec2, Vec4};

use super::{dispatch, GpuContext, TILE};
use crate::error::GpuError;
use crate::render::framebuffer::Framebuffer;
use crate::render::shadow::{
    working_resolution, ShadowParams, ShadowUniforms, APPLY_WITHOUT_SHADOWS_WGSL, SHADOW_BLUR_WGSL,
    SHADOW_COMPOSITE_WGSL, SHADOW_DOWNSAMPLE_WGSL, SHADOW_RAY_MARCH_WGSL,
};

/// Buffers sized for one full and working resolution.
struct Targets {
    full: UVec2,
    work: UVec2,
    shadow_source: wgpu::Buffer,
    color_in: wgpu::Buffer,
    color_out: wgpu::Buffer,
    occluders: wgpu::Buffer,
    mask: wgpu::Buffer,
    rim: wgpu::Buffer,
    blur_ping: wgpu::Buffer,
    blur_pong: wgpu::Buffer,
    downsample_group: wgpu::BindGroup,
    march_group: wgpu::BindGroup,
    copy_group: wgpu::BindGroup,
    /// Composite groups reading the sharp mask, ping and pong.
    composite_groups: [wgpu::BindGroup; 3],
}

pub struct GpuShadowPipeline {
    params: wgpu::Buffer,
    downsample: wgpu::ComputePipeline,
    ray_march: wgpu::ComputePipeline,
    blur: wgpu::ComputePipeline,
    composite: wgpu::ComputePipeline,
    copy: wgpu::ComputePipeline,
    targets: Option<Targets>,
    reallocations: usize,
}

impl GpuShadowPipeline {
    pub fn new(ctx: &GpuContext) -> Self {
        Self {
            params: ctx.uniform("Shadow Params", &ShadowUniforms::default()),
            downsample: ctx.pipeline("Shadow Downsample", SHADOW_DOWNSAMPLE_WGSL),
            ray_march: ctx.pipeline("Shadow Ray March", SHADOW_RAY_MARCH_WGSL),
            blur: ctx.pipeline("Shadow Blur", SHADOW_BLUR_WGSL),
            composite: ctx.pipeline("Shadow Composite", SHADOW_COMPOSITE_WGSL),
            copy: ctx.pipeline("Apply Without Shadows", APPLY_WITHOUT_SHADOWS_WGSL),
            targets: None,
            reallocations: 0,
        }
    }

    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    pub fn resolution(&self) -> Option<UVec2> {
        self.targets.as_ref().map(|t| t.work)
    }

    fn prepare(&mut self, ctx: &GpuContext, full: UVec2, downsampling: u32) {
        let work = working_resolution(full, downsampling);
        if self.targets.as_ref().is_some_and(|t| t.full == full && t.work == work) {
            return;
        }
        log::debug!("GPU shadow targets -> {}x{} (working {}x{})", full.x, full.y, work.x, work.y);

        let full_px = (full.x * full.y) as u64;
        let work_bytes = (work.x * work.y) as u64 * 4;
        let shadow_source = ctx.storage("Shadow Source", full_px * 4);
        let color_in = ctx.storage("Color In", full_px * 16);
        let color_out = ctx.storage("Color Out", full_px * 16);
        let occluders = ctx.storage("Shadow Occluders", work_bytes);
        let mask = ctx.storage("Shadow Mask", work_bytes);
        let rim = ctx.storage("Rim Mask", work_bytes);
        let blur_ping = ctx.storage("Blur Ping", work_bytes);
        let blur_pong = ctx.storage("Blur Pong", work_bytes);

        let p = &self.params;
        let composite_group = |m: &wgpu::Buffer| {
            ctx.bind_group("Shadow Composite", &self.composite, &[&color_in, m, &rim, &color_out, p])
        };
        let composite_groups = [composite_group(&mask), composite_group(&blur_ping), composite_group(&blur_pong)];

        self.targets = Some(Targets {
            full,
            work,
            downsample_group: ctx.bind_group("Shadow Downsample", &self.downsample, &[&shadow_source, &occluders, p]),
            march_group: ctx.bind_group("Shadow Ray March", &self.ray_march, &[&occluders, &mask, &rim, p]),
            copy_group: ctx.bind_group("Apply Without Shadows", &self.copy, &[&color_in, &color_out, p]),
            composite_groups,
            shadow_source,
            color_in,
            color_out,
            occluders,
            mask,
            rim,
            blur_ping,
            blur_pong,
        });
        self.reallocations += 1;
    }

    /// Shade `frame` and read the lit colour buffer back.
    pub fn run(&mut self, ctx: &GpuContext, frame: &Framebuffer, params: &ShadowParams) -> Result<Vec<Vec4>, GpuError> {
        let full = frame.size();
        self.prepare(ctx, full, params.downsampling);
        let Some(t) = self.targets.as_ref() else {
            return Ok(frame.color.clone());
        };

        let light = params.kind.toward_light(params.direction_degrees);
        let uniforms = ShadowUniforms::new(params, full, light.unwrap_or_default());
        ctx.queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&uniforms));
        ctx.queue.write_buffer(&t.color_in, 0, bytemuck::cast_slice(&frame.color));

        let full_tiles = (full.x.div_ceil(TILE), full.y.div_ceil(TILE));
        let work_tiles = (t.work.x.div_ceil(TILE), t.work.y.div_ceil(TILE));
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Shadows") });

        if light.is_none() {
            dispatch(&mut encoder, "Apply Without Shadows", &self.copy, &t.copy_group, full_tiles);
        } else {
            ctx.queue.write_buffer(&t.shadow_source, 0, bytemuck::cast_slice(frame.shadow_source.data()));
            dispatch(&mut encoder, "Shadow Downsample", &self.downsample, &t.downsample_group, work_tiles);
            dispatch(&mut encoder, "Shadow Ray March", &self.ray_march, &t.march_group, work_tiles);

            // 0 = sharp mask, 1 = ping, 2 = pong.
            let mut current = 0usize;
            if params.kind.is_blurred() {
                let iterations = params.blur_iterations;
                for i in 0..iterations {
                    let offset = 1u32 << (iterations - 1 - i).min(16);
                    let pass_params = ctx.uniform("Blur Params", &ShadowUniforms { blur_offset: offset, ..uniforms });
                    let (read, write, next) = match current {
                        0 => (&t.mask, &t.blur_ping, 1),
                        1 => (&t.blur_ping, &t.blur_pong, 2),
                        _ => (&t.blur_pong, &t.blur_ping, 1),
                    };
                    let group = ctx.bind_group("Shadow Blur", &self.blur, &[read, write, &pass_params]);
                    dispatch(&mut encoder, "Shadow Blur", &self.blur, &group, work_tiles);
                    current = next;
                }
            }
            dispatch(&mut encoder, "Shadow Composite", &self.composite, &t.composite_groups[current], full_tiles);
        }
        ctx.queue.submit(Some(encoder.finish()));

        ctx.read_back(&t.color_out, (full.x * full.y) as usize)
    }
}

impl std::fmt::Debug for GpuShadowPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuShadowPipeline")
            .field("resolution", &self.resolution())
            .field("reallocations", &self.reallocations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::shadow::ShadowPipeline;
    use crate::render::ShadowType;

    fn frame() -> Framebuffer {
        let size = UVec2::new(24, 16);
        let mut fb = Framebuffer::new(size);
        fb.color.fill(Vec4::new(0.8, 0.6, 0.4, 1.0));
        for y in 10..14 {
            for x in 10..14 {
                let i = fb.index(x, y);
                fb.blend(i, Vec4::new(0.2, 0.2, 0.2, 1.0), 1.0);
            }
        }
        fb
    }

    fn params(kind: ShadowType) -> ShadowParams {
        ShadowParams {
            kind,
            darkness: 0.5,
            falloff: 0.01,
            direction_degrees: 90.0,
            blur_iterations: 2,
            rim_strength: 1.0,
            downsampling: 1,
        }
    }

    #[test]
    fn test_gpu_shadows_match_cpu() {
        let Ok(ctx) = GpuContext::blocking() else {
            eprintln!("No GPU adapter, skipping");
            return;
        };
        let fb = frame();
        let mut gpu = GpuShadowPipeline::new(&ctx);
        for kind in [ShadowType::None, ShadowType::VerticalSharp, ShadowType::VerticalBlurred] {
            let p = params(kind);
            let out = gpu.run(&ctx, &fb, &p).unwrap();
            let mut expected = Vec::new();
            ShadowPipeline::new().run(&fb, &p, &mut expected);
            assert_eq!(out.len(), expected.len());
            for (a, b) in out.iter().zip(&expected) {
                assert!((*a - *b).abs().max_element() < 1e-4, "{:?} vs {:?}", a, b);
            }
        }
        assert_eq!(gpu.reallocations(), 1);
        assert_eq!(gpu.resolution(), Some(UVec2::new(12, 8)));
    }
}
