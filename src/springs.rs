//! Spring storage allocation with a ping-pong prefix scan.
//!
//! Inter-particle springs live in one combined buffer split into two halves.
//! After every resort the halves swap roles: the new half receives this
//! layout's springs, the old half still holds the springs laid out for the
//! previous sort so the transfer kernel can copy them across.
//!
//! Inside a half, each cell owns a contiguous range of
//! `particles_in_cell * slots_per_particle` records. The per-cell start
//! offsets are the exclusive prefix sum of those capacities, computed with a
//! Hillis-Steele scan: for `offset = 1, 2, 4, ...` every cell adds the value
//! `offset` cells behind it, reading one buffer and writing the other. A flag
//! tracks which buffer holds the latest values and a final copy moves them
//! into the offset table for the current half.
//!
//! `slots_per_particle` is `half_len / max_particles`, so the capacities of
//! all cells together never exceed one half.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use crate::grid::SpatialEntry;
use crate::particle::{PackLayout, Particle};

/// One inter-particle spring, owned by particle `owner`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Spring {
    /// `u32::MAX` marks an unused slot.
    pub owner: u32,
    pub other: u32,
    pub rest_length: f32,
    pub _pad: u32,
}

impl Spring {
    pub const EMPTY: Spring = Spring { owner: u32::MAX, other: u32::MAX, rest_length: 0.0, _pad: 0 };

    pub fn new(owner: u32, other: u32, rest_length: f32) -> Self {
        Self { owner, other, rest_length, _pad: 0 }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.owner == u32::MAX
    }
}

impl Default for Spring {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Read offsets of the scan passes for `len` values: 1, 2, 4, ... < len.
pub fn scan_offsets(len: usize) -> Vec<usize> {
    std::iter::successors(Some(1usize), |o| o.checked_mul(2))
        .take_while(|o| *o < len)
        .collect()
}

/// Exclusive prefix sum of `input` into `result` using two scratch buffers.
///
/// Each pass is one parallel sweep, mirroring one dispatch. Returns the number
/// of passes.
pub fn ping_pong_exclusive_scan(
    input: &[u32],
    ping: &mut Vec<u32>,
    pong: &mut Vec<u32>,
    result: &mut Vec<u32>,
) -> usize {
    let n = input.len();
    ping.resize(n, 0);
    pong.resize(n, 0);
    result.resize(n, 0);

    // Seeding with the inputs shifted right by one turns the inclusive scan
    // into an exclusive one.
    ping.par_iter_mut()
        .enumerate()
        .for_each(|(i, v)| *v = if i == 0 { 0 } else { input[i - 1] });

    let offsets = scan_offsets(n);
    let mut ping_is_current = true;
    for &offset in &offsets {
        let (read, write) = if ping_is_current {
            (&**ping, &mut **pong)
        } else {
            (&**pong, &mut **ping)
        };
        write.par_iter_mut().enumerate().for_each(|(i, w)| {
            *w = if i >= offset { read[i] + read[i - offset] } else { read[i] };
        });
        ping_is_current = !ping_is_current;
    }

    let current = if ping_is_current { &**ping } else { &**pong };
    result.par_iter_mut().zip(current.par_iter()).for_each(|(r, c)| *r = *c);
    offsets.len()
}

/// Owns the combined spring buffer and the double-buffered cell offsets.
#[derive(Debug)]
pub struct SpringAllocator {
    half_len: usize,
    slots_per_particle: usize,
    capacities: Vec<u32>,
    /// Start offsets per cell, one table per half.
    start_offsets: [Vec<u32>; 2],
    ping: Vec<u32>,
    pong: Vec<u32>,
    springs: Vec<Spring>,
    /// Index of the half written by the current layout.
    parity: usize,
}

impl SpringAllocator {
    pub fn new(cell_count: usize, max_particles: usize, max_springs_per_particle: usize) -> Self {
        let half_len = max_particles * max_springs_per_particle / 2;
        let slots_per_particle = if max_particles == 0 { 0 } else { half_len / max_particles };
        Self {
            half_len,
            slots_per_particle,
            capacities: vec![0; cell_count],
            start_offsets: [vec![0; cell_count], vec![0; cell_count]],
            ping: vec![0; cell_count],
            pong: vec![0; cell_count],
            springs: vec![Spring::EMPTY; half_len * 2],
            parity: 0,
        }
    }

    pub fn half_len(&self) -> usize {
        self.half_len
    }

    pub fn slots_per_particle(&self) -> usize {
        self.slots_per_particle
    }

    pub fn parity(&self) -> usize {
        self.parity
    }

    pub fn capacities(&self) -> &[u32] {
        &self.capacities
    }

    /// Cell start offsets of the current half.
    pub fn start_offsets(&self) -> &[u32] {
        &self.start_offsets[self.parity]
    }

    /// Swap halves and compute the new layout's cell offsets from per-cell
    /// particle counts. Returns the number of scan passes.
    pub fn allocate(&mut self, cell_counts: &[u32]) -> usize {
        debug_assert_eq!(cell_counts.len(), self.capacities.len());
        self.parity ^= 1;

        let slots = self.slots_per_particle as u32;
        self.capacities
            .par_iter_mut()
            .zip(cell_counts.par_iter())
            .for_each(|(c, n)| *c = n * slots);

        let passes = ping_pong_exclusive_scan(
            &self.capacities,
            &mut self.ping,
            &mut self.pong,
            &mut self.start_offsets[self.parity],
        );

        debug_assert!(
            self.start_offsets[self.parity].last().zip(self.capacities.last())
                .map_or(true, |(s, c)| (s + c) as usize <= self.half_len),
            "spring capacities exceed half the combined buffer"
        );
        passes
    }

    /// Slots of the particle with this cell key and in-cell order in the given half.
    pub fn slot_range(&self, half: usize, key: u32, order: u32) -> Range<usize> {
        let start = half * self.half_len
            + self.start_offsets[half][key as usize] as usize
            + order as usize * self.slots_per_particle;
        start..start + self.slots_per_particle
    }

    /// Springs of the current half.
    pub fn current(&self) -> &[Spring] {
        let base = self.parity * self.half_len;
        &self.springs[base..base + self.half_len]
    }

    pub fn current_mut(&mut self) -> &mut [Spring] {
        let base = self.parity * self.half_len;
        &mut self.springs[base..base + self.half_len]
    }

    /// Current-half springs of the particle with this cell key and order.
    pub fn springs_of(&self, key: u32, order: u32) -> &[Spring] {
        let range = self.slot_range(self.parity, key, order);
        self.springs.get(range).unwrap_or(&[])
    }

    /// Springs of the particle at sorted position `sorted_pos`.
    ///
    /// Offsets are prefix sums of `count * slots`, so a particle's slots start
    /// at `sorted_pos * slots` in the current half.
    pub fn particle_springs(&self, sorted_pos: usize) -> &[Spring] {
        let s = self.slots_per_particle;
        &self.current()[sorted_pos * s..(sorted_pos + 1) * s]
    }

    /// Copy each particle's springs from the old half into its new slots.
    ///
    /// Reads the last key and order from `packed`, which must not have been
    /// updated for the new layout yet. Records owned by another particle are
    /// dropped, which covers particles injected since the last sort.
    pub fn transfer(&mut self, particles: &[Particle], sorted: &[SpatialEntry], pack: PackLayout) {
        let slots = self.slots_per_particle;
        if slots == 0 {
            return;
        }
        let old_half = self.parity ^ 1;
        let half_len = self.half_len;
        let old_offsets = &self.start_offsets[old_half];
        let (first, second) = self.springs.split_at_mut(half_len);
        let (old, new) = if old_half == 0 { (&*first, second) } else { (&*second, first) };

        let n = particles.len();
        new.par_chunks_mut(slots).enumerate().for_each(|(s, dst)| {
            dst.fill(Spring::EMPTY);
            let Some(entry) = sorted.get(s).filter(|e| s < n && !e.is_padding()) else {
                return;
            };
            let owner = entry.index;
            let last = pack.unpack(particles[owner as usize].packed);
            let Some(&old_start) = old_offsets.get(last.key as usize) else {
                return;
            };
            let start = old_start as usize + last.order as usize * slots;
            let Some(src) = old.get(start..start + slots) else {
                return;
            };
            let kept = src.iter().filter(|sp| sp.owner == owner);
            for (d, sp) in dst.iter_mut().zip(kept) {
                *d = *sp;
            }
        });
    }
}

/// Seeds the scan buffer with shifted capacities. Dispatched over cells.
pub const PREFIX_SEED_WGSL: &str = r#"
struct ScanParams {
    cell_count: u32,
    offset: u32,
    slots_per_particle: u32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read> cell_counts: array<u32>;
@group(0) @binding(1) var<storage, read_write> capacities: array<u32>;
@group(0) @binding(2) var<storage, read_write> scan_a: array<u32>;
@group(0) @binding(3) var<uniform> params: ScanParams;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if i >= params.cell_count {
        return;
    }
    capacities[i] = cell_counts[i] * params.slots_per_particle;
    if i == 0u {
        scan_a[i] = 0u;
    } else {
        scan_a[i] = cell_counts[i - 1u] * params.slots_per_particle;
    }
}
"#;

/// One Hillis-Steele pass. Bind groups alternate which buffer is read.
pub const PREFIX_SCAN_WGSL: &str = r#"
struct ScanParams {
    cell_count: u32,
    offset: u32,
    slots_per_particle: u32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read> scan_read: array<u32>;
@group(0) @binding(1) var<storage, read_write> scan_write: array<u32>;
@group(0) @binding(2) var<uniform> params: ScanParams;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if i >= params.cell_count {
        return;
    }
    if i >= params.offset {
        scan_write[i] = scan_read[i] + scan_read[i - params.offset];
    } else {
        scan_write[i] = scan_read[i];
    }
}
"#;

/// Copies the authoritative scan buffer into the fixed result binding.
pub const PREFIX_COPY_WGSL: &str = r#"
struct ScanParams {
    cell_count: u32,
    offset: u32,
    slots_per_particle: u32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read> scan_final: array<u32>;
@group(0) @binding(1) var<storage, read_write> start_offsets: array<u32>;
@group(0) @binding(2) var<uniform> params: ScanParams;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if i >= params.cell_count {
        return;
    }
    start_offsets[i] = scan_final[i];
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridIndex, GridLayout};
    use glam::{UVec2, Vec2};
    use rand::{rngs::StdRng, Rng, SeedableRng};

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

    #[test]
    fn test_scan_offsets() {
        assert!(scan_offsets(0).is_empty());
        assert!(scan_offsets(1).is_empty());
        assert_eq!(scan_offsets(5), vec![1, 2, 4]);
        assert_eq!(scan_offsets(8), vec![1, 2, 4]);
        assert_eq!(scan_offsets(9), vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_exclusive_scan_random() {
        let mut rng = StdRng::seed_from_u64(5);
        let (mut ping, mut pong, mut result) = (Vec::new(), Vec::new(), Vec::new());
        for _ in 0..100 {
            let n = rng.gen_range(0..300);
            let input: Vec<u32> = (0..n).map(|_| rng.gen_range(0..50)).collect();
            let passes = ping_pong_exclusive_scan(&input, &mut ping, &mut pong, &mut result);
            assert_eq!(passes, scan_offsets(n).len());

            let mut acc = 0;
            for i in 0..n {
                assert_eq!(result[i], acc, "n={} i={}", n, i);
                acc += input[i];
                if i + 1 < n {
                    assert!(result[i] + input[i] <= result[i + 1]);
                }
            }
        }
    }

    #[test]
    fn test_allocate_fits_half() {
        let mut rng = StdRng::seed_from_u64(11);
        let cells = 64;
        let max_particles = 500;
        let mut alloc = SpringAllocator::new(cells, max_particles, 6);
        assert_eq!(alloc.slots_per_particle(), 3);

        // Any distribution of at most max_particles particles fits one half.
        let mut counts = vec![0u32; cells];
        for _ in 0..max_particles {
            counts[rng.gen_range(0..cells)] += 1;
        }
        alloc.allocate(&counts);
        let last = cells - 1;
        let total = alloc.start_offsets()[last] + alloc.capacities()[last];
        assert_eq!(total as usize, max_particles * 3);
        assert!(total as usize <= alloc.half_len());
    }

    #[test]
    fn test_allocate_toggles_parity() {
        let mut alloc = SpringAllocator::new(4, 10, 4);
        let p0 = alloc.parity();
        alloc.allocate(&[1, 0, 2, 0]);
        assert_ne!(alloc.parity(), p0);
        assert_eq!(alloc.start_offsets(), &[0, 2, 2, 6]);
        alloc.allocate(&[0, 0, 0, 0]);
        assert_eq!(alloc.parity(), p0);
    }

    #[test]
    fn test_transfer_follows_particles_to_new_cells() {
        let layout = GridLayout::new(UVec2::new(8, 2), 2);
        let pack = PackLayout::new(layout.cell_count(), 1);
        let mut particles = vec![
            Particle::new(Vec2::new(1.0, 1.0), 0, pack),
            Particle::new(Vec2::new(5.0, 1.0), 0, pack),
        ];
        let mut grid = GridIndex::new(layout, 2);
        let mut alloc = SpringAllocator::new(layout.cell_count() as usize, 2, 4);

        // First layout: give particle 0 one spring and record the cells.
        grid.rebuild(&particles);
        alloc.allocate(&grid.cell_counts());
        alloc.transfer(&particles, grid.entries(), pack);
        let orders = grid.cell_orders();
        let range = alloc.slot_range(alloc.parity(), orders[0].0, orders[0].1);
        alloc.springs[range.start] = Spring::new(0, 1, 1.5);
        for (p, (key, order)) in particles.iter_mut().zip(&orders) {
            p.packed = pack.pack(crate::particle::PackedCell { key: *key, ptype: 0, order: *order });
        }

        // Particle 0 moves two cells over.
        particles[0].pred_pos = Vec2::new(7.0, 1.0);
        grid.rebuild(&particles);
        alloc.allocate(&grid.cell_counts());
        alloc.transfer(&particles, grid.entries(), pack);

        let sorted_pos = grid.entries().iter().position(|e| e.index == 0).unwrap();
        let springs = alloc.particle_springs(sorted_pos);
        assert_eq!(springs[0], Spring::new(0, 1, 1.5));
        assert!(springs[1].is_empty());
        let other_pos = grid.entries().iter().position(|e| e.index == 1).unwrap();
        assert!(alloc.particle_springs(other_pos).iter().all(Spring::is_empty));
    }

    #[test]
    fn test_prefix_wgsl_is_valid() {
        for (name, src) in [
            ("seed", PREFIX_SEED_WGSL),
            ("scan", PREFIX_SCAN_WGSL),
            ("copy", PREFIX_COPY_WGSL),
        ] {
            validate_wgsl(src).unwrap_or_else(|e| panic!("{}: {}", name, e));
        }
    }
}
