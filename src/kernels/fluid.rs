//! Fluid sub-step kernels.
//!
//! Particles follow a double-density SPH model: a density and a near density
//! are accumulated from neighbours with spiky kernels, turned into pressure
//! and near pressure, and applied as symmetric pair forces. Viscosity,
//! inter-particle springs, gravity and the pointer add to the same
//! acceleration before the velocity is stored back in fixed point.
//!
//! With temperature on, the force pass also gathers conductive heat flow
//! from neighbours. [`update_temperatures`] applies it along with pointer
//! heating and moves particles across their type's phase thresholds.
//!
//! Neighbour queries read the sorted grid; they never change it.

use std::f32::consts::PI;

use glam::Vec2;
use rayon::prelude::*;

use super::PointerForce;
use crate::config::SimConfig;
use crate::fixed::Precision;
use crate::grid::GridIndex;
use crate::particle::{PackLayout, PackedCell, Particle, ParticleType};
use crate::springs::{Spring, SpringAllocator};

/// Per-dispatch parameters shared by the fluid kernels.
#[derive(Clone, Copy, Debug)]
pub struct FluidParams {
    pub dt: f32,
    pub look_ahead_time: f32,
    pub bounds: Vec2,
    pub padding: f32,
    pub max_velocity: f32,
    pub precision: Precision,
    pub pack: PackLayout,
    pub simulate_viscosity: bool,
    pub simulate_temperature: bool,
    pub pointer: PointerForce,
}

impl FluidParams {
    pub fn new(config: &SimConfig, dt: f32, pack: PackLayout, pointer: PointerForce) -> Self {
        Self {
            dt,
            look_ahead_time: config.look_ahead_time,
            bounds: config.bounds_f32(),
            padding: config.fluid_padding,
            max_velocity: config.max_particle_velocity,
            precision: config.particle_precision(),
            pack,
            simulate_viscosity: config.simulate_viscosity,
            simulate_temperature: config.simulate_temperature,
            pointer,
        }
    }
}

// Smoothing kernels, normalized over the 2D disc of radius `r`.

#[inline]
fn spiky_pow2(d: f32, r: f32) -> f32 {
    if d >= r {
        return 0.0;
    }
    let v = r - d;
    v * v * 6.0 / (PI * r.powi(4))
}

#[inline]
fn spiky_pow3(d: f32, r: f32) -> f32 {
    if d >= r {
        return 0.0;
    }
    let v = r - d;
    v * v * v * 10.0 / (PI * r.powi(5))
}

#[inline]
fn spiky_pow2_derivative(d: f32, r: f32) -> f32 {
    if d >= r {
        return 0.0;
    }
    -(r - d) * 12.0 / (PI * r.powi(4))
}

#[inline]
fn spiky_pow3_derivative(d: f32, r: f32) -> f32 {
    if d >= r {
        return 0.0;
    }
    let v = r - d;
    -v * v * 30.0 / (PI * r.powi(5))
}

#[inline]
fn poly6(d: f32, r: f32) -> f32 {
    if d >= r {
        return 0.0;
    }
    let v = r * r - d * d;
    v * v * v * 4.0 / (PI * r.powi(8))
}

#[inline]
pub(super) fn ptype<'a>(types: &'a [ParticleType], pack: PackLayout, p: &Particle) -> &'a ParticleType {
    let t = pack.ptype(p.packed) as usize;
    &types[t.min(types.len() - 1)]
}

/// Gravity, passive damping and look-ahead position.
pub fn predict(particles: &mut [Particle], types: &[ParticleType], params: &FluidParams) {
    particles.par_iter_mut().for_each(|p| {
        let t = ptype(types, params.pack, p);
        let mut vel = p.velocity(params.precision);
        vel.y -= t.gravity * params.dt;
        vel *= (1.0 - t.passive_damping * params.dt).max(0.0);
        p.set_velocity(vel, params.precision);
        p.pred_pos = p.pos + vel * params.look_ahead_time;
    });
}

/// Density and near density at every particle.
pub fn compute_densities(
    particles: &mut [Particle],
    grid: &GridIndex,
    types: &[ParticleType],
    params: &FluidParams,
) {
    let read: &[Particle] = &*particles;
    let densities: Vec<(f32, f32)> = read
        .par_iter()
        .map(|p| {
            let r = ptype(types, params.pack, p).influence_radius;
            grid.neighbours(p.pred_pos).fold((0.0, 0.0), |(d, nd), j| {
                let q = &read[j as usize];
                let m = ptype(types, params.pack, q).mass;
                let dist = p.pred_pos.distance(q.pred_pos);
                (d + m * spiky_pow2(dist, r), nd + m * spiky_pow3(dist, r))
            })
        })
        .collect();

    particles.par_iter_mut().zip(densities).for_each(|(p, (d, nd))| {
        p.density = d;
        p.near_density = nd;
    });
}

/// Maintain each particle's own springs in the current half.
///
/// Springs stretched past the influence radius or to a particle of another
/// group are removed. Remaining springs flow plastically toward the current
/// distance once the deformation exceeds the tolerance. Free slots are then
/// filled with new springs to unbound neighbours of the same group.
pub fn update_springs(
    particles: &[Particle],
    grid: &GridIndex,
    springs: &mut SpringAllocator,
    types: &[ParticleType],
    params: &FluidParams,
) {
    let slots = springs.slots_per_particle();
    if slots == 0 {
        return;
    }
    let entries = grid.entries();
    let n = particles.len();
    let dt = params.dt;
    let pack = params.pack;

    springs.current_mut().par_chunks_mut(slots).enumerate().for_each(|(s, own)| {
        let Some(entry) = entries.get(s).filter(|e| s < n && !e.is_padding()) else {
            return;
        };
        let i = entry.index;
        let p = &particles[i as usize];
        let t = ptype(types, pack, p);
        let Some(group) = t.spring_group else {
            own.fill(Spring::EMPTY);
            return;
        };
        let r = t.influence_radius;

        for sp in own.iter_mut().filter(|sp| !sp.is_empty()) {
            let q = &particles[sp.other as usize];
            let dist = p.pred_pos.distance(q.pred_pos);
            if dist >= r || ptype(types, pack, q).spring_group != Some(group) {
                *sp = Spring::EMPTY;
                continue;
            }
            let tolerance = t.spring_tolerance * sp.rest_length;
            let deformation = dist - sp.rest_length;
            if deformation.abs() > tolerance {
                let flow = dt * t.spring_plasticity * (deformation.abs() - tolerance);
                sp.rest_length = (sp.rest_length + flow.copysign(deformation)).clamp(0.0, r);
            }
        }

        for j in grid.neighbours(p.pred_pos) {
            if j == i || own.iter().any(|sp| sp.other == j && !sp.is_empty()) {
                continue;
            }
            let q = &particles[j as usize];
            if ptype(types, pack, q).spring_group != Some(group) {
                continue;
            }
            let dist = p.pred_pos.distance(q.pred_pos);
            if dist >= r {
                continue;
            }
            match own.iter_mut().find(|sp| sp.is_empty()) {
                Some(slot) => *slot = Spring::new(i, j, dist),
                None => break,
            }
        }
    });
}

/// Pair forces, springs and pointer; integrates the velocity. Also gathers
/// each particle's heat exchange when temperature is simulated.
pub fn compute_forces(
    particles: &mut [Particle],
    grid: &GridIndex,
    springs: Option<&SpringAllocator>,
    orders: &[(u32, u32)],
    types: &[ParticleType],
    params: &FluidParams,
) {
    let read: &[Particle] = &*particles;
    let results: Vec<(Vec2, f32, f32)> = read
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let t = ptype(types, params.pack, p);
            let r = t.influence_radius;
            let vel = p.velocity(params.precision);
            let pressure = (p.density - t.target_density) * t.pressure;
            let near_pressure = p.near_density * t.near_pressure;

            let mut force = Vec2::ZERO;
            let mut viscosity = Vec2::ZERO;
            let mut heat = 0.0;
            for j in grid.neighbours(p.pred_pos) {
                if j as usize == i {
                    continue;
                }
                let q = &read[j as usize];
                let qt = ptype(types, params.pack, q);
                let offset = q.pred_pos - p.pred_pos;
                let dist = offset.length();
                if dist >= r {
                    continue;
                }
                // Coincident particles are pushed apart along a fixed axis.
                let dir = if dist > 1e-6 { offset / dist } else { Vec2::Y };

                let q_pressure = (q.density - qt.target_density) * qt.pressure;
                let q_near = q.near_density * qt.near_pressure;
                let shared = (pressure + q_pressure) * 0.5;
                let shared_near = (near_pressure + q_near) * 0.5;
                if q.density > 0.0 {
                    force += dir * spiky_pow2_derivative(dist, r) * shared / q.density * qt.mass;
                }
                if q.near_density > 0.0 {
                    force += dir * spiky_pow3_derivative(dist, r) * shared_near / q.near_density * qt.mass;
                }
                if params.simulate_viscosity {
                    let qv = q.velocity(params.precision);
                    viscosity += (qv - vel) * poly6(dist, r) * (t.viscosity + qt.viscosity) * 0.5;
                }
                if params.simulate_temperature {
                    let conductivity = (t.thermal_conductivity + qt.thermal_conductivity) * 0.5;
                    heat += (q.temperature - p.temperature) * conductivity * poly6(dist, r);
                }
            }

            let mut acc = if p.density > 0.0 { force / p.density } else { Vec2::ZERO };
            acc += viscosity;

            if let Some(springs) = springs {
                let (key, order) = orders.get(i).copied().unwrap_or_default();
                for sp in springs.springs_of(key, order).iter().filter(|sp| !sp.is_empty()) {
                    let q = &read[sp.other as usize];
                    let offset = q.pred_pos - p.pred_pos;
                    let dist = offset.length();
                    if dist > 1e-6 {
                        let falloff = 1.0 - sp.rest_length / r;
                        acc += offset / dist * t.spring_stiffness * falloff * (dist - sp.rest_length);
                    }
                }
            }

            acc += params.pointer.acceleration(p.pos, vel);
            (acc, pressure, heat)
        })
        .collect();

    particles.par_iter_mut().zip(results).for_each(|(p, (acc, pressure, heat))| {
        let vel = (p.velocity(params.precision) + acc * params.dt).clamp_length_max(params.max_velocity);
        p.set_velocity(vel, params.precision);
        p.recorded_pressure = pressure;
        p.temperature_exchange = heat;
    });
}

/// Apply gathered heat and pointer heating, then switch particles whose
/// temperature crossed a phase threshold to the target type.
///
/// Pair flows are symmetric, so the heat one particle gains its neighbour
/// loses; each side divides by its own heat capacity and mass.
pub fn update_temperatures(particles: &mut [Particle], types: &[ParticleType], params: &FluidParams) {
    let type_count = types.len() as u32;
    particles.par_iter_mut().for_each(|p| {
        let t = ptype(types, params.pack, p);
        let capacity = (t.specific_heat_capacity * t.mass).max(f32::EPSILON);
        p.temperature += p.temperature_exchange / capacity * params.dt;
        p.temperature += params.pointer.heating(p.pos) * params.dt;
        p.temperature = p.temperature.max(0.0);
        p.temperature_exchange = 0.0;

        if let Some(into) = t.phase_target(p.temperature).filter(|&into| into < type_count) {
            p.packed = params.pack.with_ptype(p.packed, into);
        }
    });
}

/// Move particles and bounce them off the padded boundary.
pub fn update_positions(particles: &mut [Particle], types: &[ParticleType], params: &FluidParams) {
    let min = Vec2::splat(params.padding);
    let max = (params.bounds - params.padding).max(min);
    particles.par_iter_mut().for_each(|p| {
        let t = ptype(types, params.pack, p);
        let mut vel = p.velocity(params.precision);
        let mut pos = p.pos + vel * params.dt;

        for axis in 0..2 {
            if pos[axis] < min[axis] {
                pos[axis] = min[axis];
                vel[axis] = vel[axis].abs() * t.damping;
            } else if pos[axis] > max[axis] {
                pos[axis] = max[axis];
                vel[axis] = -vel[axis].abs() * t.damping;
            }
        }

        p.pos = pos;
        p.last_vel = vel;
        p.set_velocity(vel, params.precision);
    });
}

/// Store the new cell key and order in each particle's packed field.
/// Runs after the spring transfer has read the old values.
pub fn record_cells(particles: &mut [Particle], orders: &[(u32, u32)], pack: PackLayout) {
    particles.par_iter_mut().zip(orders.par_iter()).for_each(|(p, &(key, order))| {
        let ptype = pack.ptype(p.packed);
        p.packed = pack.pack(PackedCell { key, ptype, order });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridLayout;
    use crate::input::Buttons;
    use crate::particle::{ROOM_TEMPERATURE, ZERO_CELSIUS};
    use glam::UVec2;

    fn params(pack: PackLayout) -> FluidParams {
        FluidParams {
            dt: 0.01,
            look_ahead_time: 0.0,
            bounds: Vec2::new(20.0, 20.0),
            padding: 1.0,
            max_velocity: 100.0,
            precision: Precision(1000.0),
            pack,
            simulate_viscosity: true,
            simulate_temperature: true,
            pointer: PointerForce { buttons: Buttons::NONE, ..Default::default() },
        }
    }

    fn setup(points: &[Vec2], types: usize) -> (Vec<Particle>, GridIndex, PackLayout) {
        let layout = GridLayout::new(UVec2::new(20, 20), 2);
        let pack = PackLayout::new(layout.cell_count(), types as u32);
        let particles: Vec<Particle> = points.iter().map(|p| Particle::new(*p, 0, pack)).collect();
        let mut grid = GridIndex::new(layout, points.len());
        grid.rebuild(&particles);
        (particles, grid, pack)
    }

    #[test]
    fn test_kernels_vanish_at_radius() {
        for f in [spiky_pow2, spiky_pow3, spiky_pow2_derivative, spiky_pow3_derivative, poly6] {
            assert_eq!(f(2.0, 2.0), 0.0);
            assert_eq!(f(3.0, 2.0), 0.0);
        }
        assert!(spiky_pow2(0.0, 2.0) > spiky_pow2(1.0, 2.0));
    }

    #[test]
    fn test_density_counts_neighbours() {
        let types = vec![ParticleType::default()];
        let (mut lonely, grid, pack) = setup(&[Vec2::new(5.0, 5.0)], 1);
        compute_densities(&mut lonely, &grid, &types, &params(pack));
        let alone = lonely[0].density;

        let (mut crowd, grid, pack) =
            setup(&[Vec2::new(5.0, 5.0), Vec2::new(5.5, 5.0), Vec2::new(5.0, 5.5)], 1);
        compute_densities(&mut crowd, &grid, &types, &params(pack));
        assert!(crowd[0].density > alone);
        assert!((alone - spiky_pow2(0.0, 2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_compressed_pair_is_pushed_apart() {
        let types = vec![ParticleType { gravity: 0.0, viscosity: 0.0, target_density: 0.0, ..Default::default() }];
        let (mut ps, grid, pack) = setup(&[Vec2::new(5.0, 5.0), Vec2::new(5.2, 5.0)], 1);
        let params = params(pack);
        compute_densities(&mut ps, &grid, &types, &params);
        compute_forces(&mut ps, &grid, None, &[], &types, &params);
        assert!(ps[0].velocity(params.precision).x < 0.0);
        assert!(ps[1].velocity(params.precision).x > 0.0);
    }

    #[test]
    fn test_boundary_reflects() {
        let types = vec![ParticleType { damping: 0.5, ..Default::default() }];
        let (mut ps, _, pack) = setup(&[Vec2::new(1.1, 10.0)], 1);
        let params = params(pack);
        ps[0].set_velocity(Vec2::new(-100.0, 0.0), params.precision);
        update_positions(&mut ps, &types, &params);
        assert_eq!(ps[0].pos.x, 1.0);
        assert_eq!(ps[0].velocity(params.precision).x, 50.0);
    }

    #[test]
    fn test_predict_applies_gravity() {
        let types = vec![ParticleType { gravity: 10.0, ..Default::default() }];
        let (mut ps, _, pack) = setup(&[Vec2::new(5.0, 5.0)], 1);
        let mut params = params(pack);
        params.look_ahead_time = 0.5;
        predict(&mut ps, &types, &params);
        let v = ps[0].velocity(params.precision);
        assert!((v.y + 0.1).abs() < 1e-3);
        assert!((ps[0].pred_pos.y - 4.95).abs() < 1e-3);
    }

    #[test]
    fn test_springs_form_and_break() {
        let types = vec![ParticleType::elastic(1)];
        let (ps, grid, pack) = setup(&[Vec2::new(5.0, 5.0), Vec2::new(6.0, 5.0), Vec2::new(15.0, 15.0)], 1);
        let params = params(pack);
        let mut springs = SpringAllocator::new(grid.layout().cell_count() as usize, 3, 4);
        springs.allocate(&grid.cell_counts());
        update_springs(&ps, &grid, &mut springs, &types, &params);

        let orders = grid.cell_orders();
        let own0: Vec<Spring> = springs.springs_of(orders[0].0, orders[0].1).to_vec();
        assert_eq!(own0.iter().filter(|s| !s.is_empty()).count(), 1);
        assert_eq!(own0[0].other, 1);
        assert!((own0[0].rest_length - 1.0).abs() < 1e-5);
        assert!(springs.springs_of(orders[2].0, orders[2].1).iter().all(Spring::is_empty));

        // Pull particle 1 out of range: the spring breaks.
        let mut moved = ps.clone();
        moved[1].pred_pos = Vec2::new(8.5, 5.0);
        update_springs(&moved, &grid, &mut springs, &types, &params);
        assert!(springs.springs_of(orders[0].0, orders[0].1).iter().all(Spring::is_empty));
    }

    #[test]
    fn test_heat_flows_from_hot_to_cold() {
        let types = vec![ParticleType { gravity: 0.0, ..Default::default() }];
        let (mut ps, grid, pack) = setup(&[Vec2::new(5.0, 5.0), Vec2::new(5.5, 5.0), Vec2::new(15.0, 15.0)], 1);
        ps[0].temperature = 400.0;
        ps[1].temperature = 300.0;
        ps[2].temperature = 500.0;
        let params = params(pack);
        compute_densities(&mut ps, &grid, &types, &params);
        compute_forces(&mut ps, &grid, None, &[], &types, &params);
        assert!(ps[0].temperature_exchange < 0.0);
        assert!((ps[0].temperature_exchange + ps[1].temperature_exchange).abs() < 1e-4);
        // Out of reach, nothing to exchange with.
        assert_eq!(ps[2].temperature_exchange, 0.0);

        let total = ps[0].temperature + ps[1].temperature;
        update_temperatures(&mut ps, &types, &params);
        assert!(ps[0].temperature < 400.0 && ps[1].temperature > 300.0);
        assert!((ps[0].temperature + ps[1].temperature - total).abs() < 1e-3);
        assert_eq!(ps[2].temperature, 500.0);
        assert_eq!(ps[0].temperature_exchange, 0.0);
    }

    #[test]
    fn test_disabled_temperature_exchanges_nothing() {
        let types = vec![ParticleType::default()];
        let (mut ps, grid, pack) = setup(&[Vec2::new(5.0, 5.0), Vec2::new(5.5, 5.0)], 1);
        ps[0].temperature = 400.0;
        let params = FluidParams { simulate_temperature: false, ..params(pack) };
        compute_densities(&mut ps, &grid, &types, &params);
        compute_forces(&mut ps, &grid, None, &[], &types, &params);
        assert_eq!(ps[0].temperature_exchange, 0.0);
        assert_eq!(ps[1].temperature_exchange, 0.0);
    }

    #[test]
    fn test_phase_change_rewrites_type_only() {
        let types = ParticleType::phase_states(
            0,
            ZERO_CELSIUS,
            ZERO_CELSIUS + 100.0,
            [ParticleType::default(), ParticleType::default(), ParticleType::default()],
        )
        .to_vec();
        let pack = PackLayout::new(16, 3);
        let mut ps = vec![
            Particle::new(Vec2::ONE, 1, pack).with_temperature(ZERO_CELSIUS - 10.0),
            Particle::new(Vec2::ONE, 1, pack).with_temperature(ZERO_CELSIUS + 120.0),
            Particle::new(Vec2::ONE, 1, pack),
        ];
        record_cells(&mut ps, &[(7, 0), (7, 1), (9, 0)], pack);
        update_temperatures(&mut ps, &types, &params(pack));

        assert_eq!(pack.unpack(ps[0].packed), PackedCell { key: 7, ptype: 0, order: 0 });
        assert_eq!(pack.unpack(ps[1].packed), PackedCell { key: 7, ptype: 2, order: 1 });
        assert_eq!(pack.ptype(ps[2].packed), 1);
    }

    #[test]
    fn test_pointer_heats_particles() {
        let types = vec![ParticleType::default()];
        let pack = PackLayout::new(16, 1);
        let mut ps = vec![Particle::new(Vec2::new(5.0, 5.0), 0, pack)];
        let mut params = params(pack);
        params.pointer = PointerForce {
            pos: Vec2::new(5.0, 5.0),
            buttons: Buttons::new(true, false),
            radius: 10.0,
            temperature_power: 2.0,
            ..Default::default()
        };
        update_temperatures(&mut ps, &types, &params);
        // 2 K/s scaled by the radius, for 0.01 s.
        assert!((ps[0].temperature - (ROOM_TEMPERATURE + 0.2)).abs() < 1e-3);
    }

    #[test]
    fn test_record_cells_keeps_type() {
        let pack = PackLayout::new(16, 3);
        let mut ps = vec![Particle::new(Vec2::ZERO, 2, pack)];
        record_cells(&mut ps, &[(5, 1)], pack);
        assert_eq!(pack.unpack(ps[0].packed), PackedCell { key: 5, ptype: 2, order: 1 });
    }
}
