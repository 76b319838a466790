//! Uniform-grid spatial index built with a bitonic sort network.
//!
//! The simulation domain is tiled by square cells whose width equals the
//! maximum interaction radius, so every neighbour of a particle lives in the
//! 3x3 block of cells around it. Cell identity is `y * cols + x`.
//!
//! Rebuilding the index is three data-parallel stages, each of which maps to
//! one or more GPU dispatches:
//!
//! 1. **Keys**: write `(particle index, cell key)` for every particle, padded
//!    to the next power of two with [`SpatialEntry::PADDING`].
//! 2. **Sort**: run the bitonic network from [`bitonic_passes`]. Every pass is
//!    a separate dispatch; within a pass all compare-exchanges are disjoint.
//! 3. **Start indices**: for each key transition in the sorted table, record
//!    where the key's run begins. Cells with no particles hold [`EMPTY_CELL`].
//!
//! The sort does no allocation and its work depends only on the table length.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, UVec2, Vec2};
use rayon::prelude::*;

use crate::config::SimConfig;
use crate::particle::Particle;

/// Start index of a cell that holds no particles.
pub const EMPTY_CELL: u32 = u32::MAX;

/// One row of the spatial lookup table.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SpatialEntry {
    pub index: u32,
    pub key: u32,
}

impl SpatialEntry {
    /// Fills the table past the particle count. Sorts after every real key.
    pub const PADDING: SpatialEntry = SpatialEntry { index: u32::MAX, key: u32::MAX };

    #[inline]
    pub fn is_padding(&self) -> bool {
        self.key == u32::MAX
    }
}

/// Grid dimensions over the (rounded) simulation bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridLayout {
    pub cell_size: f32,
    pub cols: u32,
    pub rows: u32,
}

impl GridLayout {
    /// `bounds` should already be a multiple of `cell_size`.
    pub fn new(bounds: UVec2, cell_size: u32) -> Self {
        let cell_size = cell_size.max(1);
        Self {
            cell_size: cell_size as f32,
            cols: bounds.x.div_ceil(cell_size).max(1),
            rows: bounds.y.div_ceil(cell_size).max(1),
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(config.rounded_bounds(), config.max_influence_radius)
    }

    #[inline]
    pub fn cell_count(&self) -> u32 {
        self.cols * self.rows
    }

    /// Cell coordinate of a position, clamped into the grid.
    #[inline]
    pub fn cell_coord(&self, pos: Vec2) -> IVec2 {
        let c = (pos / self.cell_size).floor().as_ivec2();
        c.clamp(IVec2::ZERO, IVec2::new(self.cols as i32 - 1, self.rows as i32 - 1))
    }

    #[inline]
    pub fn key_of(&self, coord: IVec2) -> u32 {
        coord.y as u32 * self.cols + coord.x as u32
    }

    #[inline]
    pub fn cell_key(&self, pos: Vec2) -> u32 {
        self.key_of(self.cell_coord(pos))
    }

    /// Keys of the up to nine cells around `coord`, skipping cells outside the grid.
    pub fn neighbour_keys(&self, coord: IVec2) -> impl Iterator<Item = u32> + '_ {
        (-1..=1).flat_map(move |dy| {
            (-1..=1).filter_map(move |dx| {
                let c = coord + IVec2::new(dx, dy);
                let inside = c.x >= 0 && c.y >= 0 && c.x < self.cols as i32 && c.y < self.rows as i32;
                inside.then(|| self.key_of(c))
            })
        })
    }
}

/// One pass of the bitonic network.
///
/// `flip` passes compare mirrored pairs across a block and turn two sorted
/// halves into a bitonic sequence. The other passes compare elements half a
/// block apart and merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitonicPass {
    pub block_len: u32,
    pub flip: bool,
}

/// Pass schedule that sorts a table of `len` entries ascending.
///
/// `len` must be a power of two. The schedule has `log2(len) * (log2(len) + 1) / 2`
/// passes.
pub fn bitonic_passes(len: u32) -> Vec<BitonicPass> {
    debug_assert!(len == 0 || len.is_power_of_two());
    let mut passes = Vec::new();
    let mut base = 2;
    while base <= len {
        passes.push(BitonicPass { block_len: base, flip: true });
        let mut block_len = base / 2;
        while block_len >= 2 {
            passes.push(BitonicPass { block_len, flip: false });
            block_len /= 2;
        }
        base *= 2;
    }
    passes
}

/// Indices compared by invocation `i` of a pass. There are `len / 2`
/// invocations per pass and their pairs never overlap.
#[inline]
pub fn pair_for_invocation(pass: BitonicPass, i: u32) -> (u32, u32) {
    let half = pass.block_len / 2;
    let block_start = (i / half) * pass.block_len;
    let offset = i % half;
    if pass.flip {
        (block_start + offset, block_start + pass.block_len - 1 - offset)
    } else {
        (block_start + offset, block_start + offset + half)
    }
}

/// Run one pass over the table. Blocks are processed in parallel.
pub fn run_bitonic_pass(entries: &mut [SpatialEntry], pass: BitonicPass) {
    let block_len = pass.block_len as usize;
    let half = block_len / 2;
    entries.par_chunks_mut(block_len).for_each(|block| {
        let (lo, hi) = block.split_at_mut(half);
        for o in 0..half {
            let j = if pass.flip { half - 1 - o } else { o };
            if lo[o].key > hi[j].key {
                std::mem::swap(&mut lo[o], &mut hi[j]);
            }
        }
    });
}

/// Sort a power-of-two table by key. Returns the number of passes run.
pub fn bitonic_sort(entries: &mut [SpatialEntry]) -> usize {
    let passes = bitonic_passes(entries.len() as u32);
    for pass in &passes {
        run_bitonic_pass(entries, *pass);
    }
    passes.len()
}

/// The spatial lookup table and its per-cell start indices.
#[derive(Debug)]
pub struct GridIndex {
    layout: GridLayout,
    entries: Vec<SpatialEntry>,
    start_indices: Vec<u32>,
    particle_count: usize,
}

impl GridIndex {
    /// Allocate for up to `max_particles` so rebuilds never reallocate.
    pub fn new(layout: GridLayout, max_particles: usize) -> Self {
        Self {
            layout,
            entries: Vec::with_capacity(max_particles.max(1).next_power_of_two()),
            start_indices: vec![EMPTY_CELL; layout.cell_count() as usize],
            particle_count: 0,
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// The padded, sorted table.
    pub fn entries(&self) -> &[SpatialEntry] {
        &self.entries
    }

    pub fn start_indices(&self) -> &[u32] {
        &self.start_indices
    }

    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    /// Rebuild the whole index from predicted positions.
    pub fn rebuild(&mut self, particles: &[Particle]) {
        self.compute_keys(particles);
        bitonic_sort(&mut self.entries);
        self.compute_start_indices();
    }

    /// Stage 1: keys from predicted positions, padded to a power of two.
    pub fn compute_keys(&mut self, particles: &[Particle]) {
        let n = particles.len();
        let len = if n == 0 { 0 } else { n.next_power_of_two() };
        self.particle_count = n;
        self.entries.resize(len, SpatialEntry::PADDING);

        let layout = self.layout;
        self.entries.par_iter_mut().enumerate().for_each(|(i, entry)| {
            *entry = match particles.get(i) {
                Some(p) => SpatialEntry { index: i as u32, key: layout.cell_key(p.pred_pos) },
                None => SpatialEntry::PADDING,
            };
        });
    }

    /// Stage 3: record where every key's run starts.
    pub fn compute_start_indices(&mut self) {
        self.start_indices.par_iter_mut().for_each(|s| *s = EMPTY_CELL);

        let entries = &self.entries[..self.particle_count];
        let starts: Vec<(u32, u32)> = entries
            .par_iter()
            .enumerate()
            .filter(|(s, e)| *s == 0 || entries[s - 1].key != e.key)
            .map(|(s, e)| (e.key, s as u32))
            .collect();
        for (key, s) in starts {
            self.start_indices[key as usize] = s;
        }
    }

    /// Sorted-table range holding the particles of one cell.
    pub fn cell_range(&self, key: u32) -> Range<usize> {
        let start = self.start_indices[key as usize];
        if start == EMPTY_CELL {
            return 0..0;
        }
        let start = start as usize;
        let len = self.entries[start..self.particle_count]
            .iter()
            .take_while(|e| e.key == key)
            .count();
        start..start + len
    }

    /// Indices of the particles in the 3x3 cells around `pos`.
    pub fn neighbours(&self, pos: Vec2) -> impl Iterator<Item = u32> + '_ {
        let coord = self.layout.cell_coord(pos);
        self.layout
            .neighbour_keys(coord)
            .flat_map(move |key| self.entries[self.cell_range(key)].iter().map(|e| e.index))
    }

    /// Number of particles per cell.
    pub fn cell_counts(&self) -> Vec<u32> {
        (0..self.layout.cell_count())
            .into_par_iter()
            .map(|key| self.cell_range(key).len() as u32)
            .collect()
    }

    /// `(cell key, order inside the cell)` for every particle index.
    pub fn cell_orders(&self) -> Vec<(u32, u32)> {
        let mut orders = vec![(0, 0); self.particle_count];
        for (s, e) in self.entries[..self.particle_count].iter().enumerate() {
            let start = self.start_indices[e.key as usize];
            orders[e.index as usize] = (e.key, s as u32 - start);
        }
        orders
    }
}

/// Computes one lookup entry per particle and pads the table.
pub const CELL_KEYS_WGSL: &str = r#"
struct Particle {
    pred_pos: vec2<f32>,
    pos: vec2<f32>,
    vel_as_int: vec2<i32>,
    last_vel: vec2<f32>,
    density: f32,
    near_density: f32,
    packed: u32,
    recorded_pressure: f32,
    temperature: f32,
    temperature_exchange: f32,
};

struct Entry {
    index: u32,
    key: u32,
};

struct GridParams {
    cell_size: f32,
    cols: u32,
    rows: u32,
    num_particles: u32,
    table_len: u32,
    flip: u32,
    block_len: u32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read> particles: array<Particle>;
@group(0) @binding(1) var<storage, read_write> entries: array<Entry>;
@group(0) @binding(2) var<uniform> params: GridParams;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = global_id.x;
    if idx >= params.table_len {
        return;
    }
    if idx >= params.num_particles {
        entries[idx] = Entry(0xFFFFFFFFu, 0xFFFFFFFFu);
        return;
    }

    let cell = vec2<i32>(floor(particles[idx].pred_pos / params.cell_size));
    let x = u32(clamp(cell.x, 0, i32(params.cols) - 1));
    let y = u32(clamp(cell.y, 0, i32(params.rows) - 1));
    entries[idx] = Entry(idx, y * params.cols + x);
}
"#;

/// One bitonic pass. Dispatched once per entry of [`bitonic_passes`].
pub const BITONIC_WGSL: &str = r#"
struct Entry {
    index: u32,
    key: u32,
};

struct GridParams {
    cell_size: f32,
    cols: u32,
    rows: u32,
    num_particles: u32,
    table_len: u32,
    flip: u32,
    block_len: u32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read_write> entries: array<Entry>;
@group(0) @binding(1) var<uniform> params: GridParams;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if i >= params.table_len / 2u {
        return;
    }

    let half_len = params.block_len / 2u;
    let block_start = (i / half_len) * params.block_len;
    let o = i % half_len;
    let a = block_start + o;
    var b = block_start + o + half_len;
    if params.flip == 1u {
        b = block_start + params.block_len - 1u - o;
    }

    let ea = entries[a];
    let eb = entries[b];
    if ea.key > eb.key {
        entries[a] = eb;
        entries[b] = ea;
    }
}
"#;

/// Clears the start-index table. Dispatched over cells.
pub const CLEAR_STARTS_WGSL: &str = r#"
struct GridParams {
    cell_size: f32,
    cols: u32,
    rows: u32,
    num_particles: u32,
    table_len: u32,
    flip: u32,
    block_len: u32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read_write> start_indices: array<u32>;
@group(0) @binding(1) var<uniform> params: GridParams;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let key = global_id.x;
    if key >= params.cols * params.rows {
        return;
    }
    start_indices[key] = 0xFFFFFFFFu;
}
"#;

/// Writes the start index of every key transition. Dispatched over particles.
pub const START_INDICES_WGSL: &str = r#"
struct Entry {
    index: u32,
    key: u32,
};

struct GridParams {
    cell_size: f32,
    cols: u32,
    rows: u32,
    num_particles: u32,
    table_len: u32,
    flip: u32,
    block_len: u32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read> entries: array<Entry>;
@group(0) @binding(1) var<storage, read_write> start_indices: array<u32>;
@group(0) @binding(2) var<uniform> params: GridParams;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let s = global_id.x;
    if s >= params.num_particles {
        return;
    }
    let key = entries[s].key;
    if s == 0u || entries[s - 1u].key != key {
        start_indices[key] = s;
    }
}
"#;
