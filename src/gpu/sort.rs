//! Cell keys, bitonic network and start indices on the device.

use bytemuck::{Pod, Zeroable};

use super::{dispatch, GpuContext, WORKGROUP_SIZE};
use crate::error::GpuError;
use crate::grid::{bitonic_passes, GridLayout, SpatialEntry, BITONIC_WGSL, CELL_KEYS_WGSL, CLEAR_STARTS_WGSL, START_INDICES_WGSL};
use crate::particle::Particle;

/// Mirrors `GridParams` in the grid shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GridUniforms {
    pub cell_size: f32,
    pub cols: u32,
    pub rows: u32,
    pub num_particles: u32,
    pub table_len: u32,
    pub flip: u32,
    pub block_len: u32,
    pub _pad: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortOutput {
    /// Sorted table, padded to a power of two.
    pub entries: Vec<SpatialEntry>,
    pub start_indices: Vec<u32>,
}

/// Buffers and pipelines sized for one grid layout and capacity.
pub struct GpuGridSort {
    layout: GridLayout,
    capacity: usize,
    table_len: u32,
    particles: wgpu::Buffer,
    entries: wgpu::Buffer,
    start_indices: wgpu::Buffer,
    params: wgpu::Buffer,
    keys_pipeline: wgpu::ComputePipeline,
    bitonic_pipeline: wgpu::ComputePipeline,
    clear_pipeline: wgpu::ComputePipeline,
    starts_pipeline: wgpu::ComputePipeline,
    keys_group: wgpu::BindGroup,
    clear_group: wgpu::BindGroup,
    starts_group: wgpu::BindGroup,
    /// One bind group per bitonic pass, each with its own uniform.
    pass_groups: Vec<wgpu::BindGroup>,
}

impl GpuGridSort {
    pub fn new(ctx: &GpuContext, layout: GridLayout, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let table_len = capacity.next_power_of_two() as u32;
        let entry_size = std::mem::size_of::<SpatialEntry>() as u64;

        let particles = ctx.storage("Particles", (capacity * std::mem::size_of::<Particle>()) as u64);
        let entries = ctx.storage("Spatial Lookup", table_len as u64 * entry_size);
        let start_indices = ctx.storage("Start Indices", layout.cell_count() as u64 * 4);

        let base = GridUniforms {
            cell_size: layout.cell_size,
            cols: layout.cols,
            rows: layout.rows,
            table_len,
            ..Default::default()
        };
        let params = ctx.uniform("Grid Params", &base);

        let keys_pipeline = ctx.pipeline("Cell Keys", CELL_KEYS_WGSL);
        let bitonic_pipeline = ctx.pipeline("Bitonic Pass", BITONIC_WGSL);
        let clear_pipeline = ctx.pipeline("Clear Starts", CLEAR_STARTS_WGSL);
        let starts_pipeline = ctx.pipeline("Start Indices", START_INDICES_WGSL);

        let keys_group = ctx.bind_group("Cell Keys", &keys_pipeline, &[&particles, &entries, &params]);
        let clear_group = ctx.bind_group("Clear Starts", &clear_pipeline, &[&start_indices, &params]);
        let starts_group = ctx.bind_group("Start Indices", &starts_pipeline, &[&entries, &start_indices, &params]);

        let pass_groups = bitonic_passes(table_len)
            .into_iter()
            .map(|pass| {
                let uniforms = GridUniforms { flip: pass.flip as u32, block_len: pass.block_len, ..base };
                let buffer = ctx.uniform("Bitonic Params", &uniforms);
                ctx.bind_group("Bitonic Pass", &bitonic_pipeline, &[&entries, &buffer])
            })
            .collect();

        log::debug!("GPU grid sort: {} cells, table {}", layout.cell_count(), table_len);

        Self {
            layout,
            capacity,
            table_len,
            particles,
            entries,
            start_indices,
            params,
            keys_pipeline,
            bitonic_pipeline,
            clear_pipeline,
            starts_pipeline,
            keys_group,
            clear_group,
            starts_group,
            pass_groups,
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn pass_count(&self) -> usize {
        self.pass_groups.len()
    }

    /// Sort `particles` and read the table back. Particles beyond the
    /// capacity are ignored.
    pub fn run(&mut self, ctx: &GpuContext, particles: &[Particle]) -> Result<SortOutput, GpuError> {
        let n = particles.len().min(self.capacity);
        if n < particles.len() {
            log::debug!("GPU sort capacity {} exceeded by {} particles", self.capacity, particles.len() - n);
        }
        ctx.queue.write_buffer(&self.particles, 0, bytemuck::cast_slice(&particles[..n]));
        let uniforms = GridUniforms {
            cell_size: self.layout.cell_size,
            cols: self.layout.cols,
            rows: self.layout.rows,
            num_particles: n as u32,
            table_len: self.table_len,
            ..Default::default()
        };
        ctx.queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&uniforms));

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Grid Sort") });
        let table_groups = self.table_len.div_ceil(WORKGROUP_SIZE);
        dispatch(&mut encoder, "Cell Keys", &self.keys_pipeline, &self.keys_group, (table_groups, 1));
        let pair_groups = (self.table_len / 2).div_ceil(WORKGROUP_SIZE);
        for group in &self.pass_groups {
            dispatch(&mut encoder, "Bitonic Pass", &self.bitonic_pipeline, group, (pair_groups, 1));
        }
        let cell_groups = self.layout.cell_count().div_ceil(WORKGROUP_SIZE);
        dispatch(&mut encoder, "Clear Starts", &self.clear_pipeline, &self.clear_group, (cell_groups, 1));
        dispatch(
            &mut encoder,
            "Start Indices",
            &self.starts_pipeline,
            &self.starts_group,
            ((n as u32).div_ceil(WORKGROUP_SIZE), 1),
        );
        ctx.queue.submit(Some(encoder.finish()));

        Ok(SortOutput {
            entries: ctx.read_back(&self.entries, self.table_len as usize)?,
            start_indices: ctx.read_back(&self.start_indices, self.layout.cell_count() as usize)?,
        })
    }
}
