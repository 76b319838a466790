//! Spring capacities and their exclusive prefix scan on the device.

use bytemuck::{Pod, Zeroable};

use super::{dispatch, GpuContext, WORKGROUP_SIZE};
use crate::error::GpuError;
use crate::springs::{scan_offsets, PREFIX_COPY_WGSL, PREFIX_SCAN_WGSL, PREFIX_SEED_WGSL};

/// Mirrors `ScanParams` in the prefix shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ScanUniforms {
    pub cell_count: u32,
    pub offset: u32,
    pub slots_per_particle: u32,
    pub _pad: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScanOutput {
    pub capacities: Vec<u32>,
    pub start_offsets: Vec<u32>,
}

pub struct GpuPrefixScan {
    cell_count: u32,
    cell_counts: wgpu::Buffer,
    capacities: wgpu::Buffer,
    start_offsets: wgpu::Buffer,
    seed_pipeline: wgpu::ComputePipeline,
    scan_pipeline: wgpu::ComputePipeline,
    copy_pipeline: wgpu::ComputePipeline,
    seed_group: wgpu::BindGroup,
    /// Pass `i` reads A and writes B when `i` is even, the reverse otherwise.
    pass_groups: Vec<wgpu::BindGroup>,
    copy_group: wgpu::BindGroup,
}

impl GpuPrefixScan {
    pub fn new(ctx: &GpuContext, cell_count: u32, slots_per_particle: u32) -> Self {
        let bytes = cell_count as u64 * 4;
        let cell_counts = ctx.storage("Cell Counts", bytes);
        let capacities = ctx.storage("Spring Capacities", bytes);
        let scan_a = ctx.storage("Scan A", bytes);
        let scan_b = ctx.storage("Scan B", bytes);
        let start_offsets = ctx.storage("Spring Start Offsets", bytes);

        let base = ScanUniforms { cell_count, offset: 0, slots_per_particle, _pad: 0 };
        let params = ctx.uniform("Scan Params", &base);

        let seed_pipeline = ctx.pipeline("Prefix Seed", PREFIX_SEED_WGSL);
        let scan_pipeline = ctx.pipeline("Prefix Scan", PREFIX_SCAN_WGSL);
        let copy_pipeline = ctx.pipeline("Prefix Copy", PREFIX_COPY_WGSL);

        let seed_group = ctx.bind_group("Prefix Seed", &seed_pipeline, &[&cell_counts, &capacities, &scan_a, &params]);

        let offsets = scan_offsets(cell_count as usize);
        let pass_groups = offsets
            .iter()
            .enumerate()
            .map(|(i, &offset)| {
                let buffer = ctx.uniform("Scan Pass Params", &ScanUniforms { offset: offset as u32, ..base });
                let (read, write) = if i % 2 == 0 { (&scan_a, &scan_b) } else { (&scan_b, &scan_a) };
                ctx.bind_group("Prefix Scan", &scan_pipeline, &[read, write, &buffer])
            })
            .collect();

        let authoritative = if offsets.len() % 2 == 0 { &scan_a } else { &scan_b };
        let copy_group = ctx.bind_group("Prefix Copy", &copy_pipeline, &[authoritative, &start_offsets, &params]);

        Self {
            cell_count,
            cell_counts,
            capacities,
            start_offsets,
            seed_pipeline,
            scan_pipeline,
            copy_pipeline,
            seed_group,
            pass_groups,
            copy_group,
        }
    }

    pub fn pass_count(&self) -> usize {
        self.pass_groups.len()
    }

    pub fn run(&mut self, ctx: &GpuContext, cell_counts: &[u32]) -> Result<ScanOutput, GpuError> {
        let n = cell_counts.len().min(self.cell_count as usize);
        ctx.queue.write_buffer(&self.cell_counts, 0, bytemuck::cast_slice(&cell_counts[..n]));

        let groups = self.cell_count.div_ceil(WORKGROUP_SIZE);
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Prefix Scan") });
        dispatch(&mut encoder, "Prefix Seed", &self.seed_pipeline, &self.seed_group, (groups, 1));
        for group in &self.pass_groups {
            dispatch(&mut encoder, "Prefix Scan", &self.scan_pipeline, group, (groups, 1));
        }
        dispatch(&mut encoder, "Prefix Copy", &self.copy_pipeline, &self.copy_group, (groups, 1));
        ctx.queue.submit(Some(encoder.finish()));

        Ok(ScanOutput {
            capacities: ctx.read_back(&self.capacities, self.cell_count as usize)?,
            start_offsets: ctx.read_back(&self.start_offsets, self.cell_count as usize)?,
        })
    }
}
