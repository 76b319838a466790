//! Rigid-body sub-step kernels.
//!
//! A rigid update runs every `sub_steps_per_rb_update` fluid sub-steps:
//!
//! 1. [`transform_vertices`] places every local vertex in world space.
//! 2. [`particle_body_interaction`] pushes particles out of bodies and hands
//!    the reaction to the body.
//! 3. [`body_collisions`] resolves vertex-in-polygon contacts between bodies.
//! 4. [`constraints`] applies spring and rigid links.
//! 5. [`ImpulseAccumulator::apply`] folds the accumulated impulses into the
//!    body velocities.
//! 6. [`integrate`] advances positions and resolves the scene boundary.
//!
//! Steps 2 to 4 read body state from the start of the update and only add
//! into the accumulator, so the result does not depend on invocation order.

use std::sync::atomic::{AtomicI32, Ordering};

use glam::{IVec2, Vec2};
use rayon::prelude::*;

use super::fluid::{ptype, FluidParams};
use super::PointerForce;
use crate::config::SimConfig;
use crate::fixed::Precision;
use crate::particle::{Particle, ParticleType};
use crate::rigid::path::{closest_edge_point, contains_point};
use crate::rigid::{Constraint, Motion, RigidBody, RigidBodyVertex};

/// Per-update parameters shared by the rigid kernels.
#[derive(Clone, Copy, Debug)]
pub struct RigidParams {
    pub dt: f32,
    /// Simulation time driving linear motors.
    pub time: f32,
    pub bounds: Vec2,
    pub padding: f32,
    pub boundary_elasticity: f32,
    pub boundary_friction: f32,
    pub max_velocity: f32,
    pub max_rot_velocity: f32,
    pub min_velocity: f32,
    pub precision: Precision,
    pub rot_precision: Precision,
    pub allow_linked_collisions: bool,
    pub collision_correction: f32,
    pub fixed_collision_correction: f32,
    pub rigid_constraint_correction: f32,
    pub pointer: PointerForce,
}

impl RigidParams {
    pub fn new(config: &SimConfig, dt: f32, time: f32, pointer: PointerForce) -> Self {
        Self {
            dt,
            time,
            bounds: config.bounds_f32(),
            padding: config.rigid_body_padding,
            boundary_elasticity: config.boundary_elasticity,
            boundary_friction: config.boundary_friction,
            max_velocity: config.max_rb_velocity,
            max_rot_velocity: config.max_rb_rot_velocity,
            min_velocity: config.min_rb_velocity_for_movement,
            precision: config.rb_precision(),
            rot_precision: config.rb_rot_precision(),
            allow_linked_collisions: config.allow_linked_rb_collisions,
            collision_correction: config.rb_collision_correction,
            fixed_collision_correction: config.rb_fixed_collision_correction,
            rigid_constraint_correction: config.rigid_constraint_correction,
            pointer,
        }
    }
}

#[inline]
fn point_velocity(vel: Vec2, rot_vel: f32, r: Vec2) -> Vec2 {
    vel + rot_vel * r.perp()
}

fn body_paths<'a>(body: &RigidBody, world: &'a [Vec2]) -> Vec<&'a [Vec2]> {
    body.paths.iter().map(|r| &world[r.clone()]).collect()
}

/// Per-body velocity and position changes added from parallel invocations.
///
/// Values are stored in the fixed-point units of the body precisions, so the
/// sum is exact regardless of the order the additions land in.
#[derive(Debug, Default)]
pub struct ImpulseAccumulator {
    velocity: Vec<[AtomicI32; 2]>,
    rot_velocity: Vec<AtomicI32>,
    correction: Vec<[AtomicI32; 2]>,
}

fn atomic_pairs(n: usize) -> Vec<[AtomicI32; 2]> {
    (0..n).map(|_| [AtomicI32::new(0), AtomicI32::new(0)]).collect()
}

impl ImpulseAccumulator {
    pub fn new(body_count: usize) -> Self {
        Self {
            velocity: atomic_pairs(body_count),
            rot_velocity: (0..body_count).map(|_| AtomicI32::new(0)).collect(),
            correction: atomic_pairs(body_count),
        }
    }

    pub fn len(&self) -> usize {
        self.rot_velocity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rot_velocity.is_empty()
    }

    /// Nothing is pending.
    pub fn is_idle(&self) -> bool {
        let zero = |a: &AtomicI32| a.load(Ordering::Relaxed) == 0;
        self.velocity.iter().flatten().all(zero)
            && self.rot_velocity.iter().all(zero)
            && self.correction.iter().flatten().all(zero)
    }

    pub fn add_velocity(&self, body: usize, dv: Vec2, dw: f32, params: &RigidParams) {
        let dv = params.precision.encode2(dv);
        let v = &self.velocity[body];
        v[0].fetch_add(dv.x, Ordering::Relaxed);
        v[1].fetch_add(dv.y, Ordering::Relaxed);
        self.rot_velocity[body].fetch_add(params.rot_precision.encode(dw), Ordering::Relaxed);
    }

    pub fn add_correction(&self, body: usize, offset: Vec2, params: &RigidParams) {
        let d = params.precision.encode2(offset);
        let c = &self.correction[body];
        c[0].fetch_add(d.x, Ordering::Relaxed);
        c[1].fetch_add(d.y, Ordering::Relaxed);
    }

    /// Add everything pending to the bodies and reset.
    pub fn apply(&self, bodies: &mut [RigidBody], params: &RigidParams) {
        bodies
            .par_iter_mut()
            .zip(self.velocity.par_iter())
            .zip(self.rot_velocity.par_iter())
            .zip(self.correction.par_iter())
            .for_each(|(((body, v), w), c)| {
                let dv = IVec2::new(v[0].swap(0, Ordering::Relaxed), v[1].swap(0, Ordering::Relaxed));
                let dc = IVec2::new(c[0].swap(0, Ordering::Relaxed), c[1].swap(0, Ordering::Relaxed));
                body.vel_as_int = body.vel_as_int.saturating_add(dv);
                body.rot_vel_as_int = body.rot_vel_as_int.saturating_add(w.swap(0, Ordering::Relaxed));
                body.pos += params.precision.decode2(dc);
            });
    }
}

/// World positions of every body vertex.
pub fn transform_vertices(bodies: &[RigidBody], vertices: &[RigidBodyVertex], world: &mut Vec<Vec2>) {
    world.resize(vertices.len(), Vec2::ZERO);
    world.par_iter_mut().zip(vertices.par_iter()).for_each(|(w, v)| {
        *w = bodies[v.parent as usize].to_world(v.local);
    });
}

/// Move particles found inside an interactable body to its nearest edge.
///
/// The velocity component into the body, relative to the surface velocity at
/// the contact, is reflected with the body's fluid elasticity. The opposite
/// impulse goes to the body.
pub fn particle_body_interaction(
    particles: &mut [Particle],
    types: &[ParticleType],
    bodies: &[RigidBody],
    world: &[Vec2],
    impulses: &ImpulseAccumulator,
    fluid: &FluidParams,
    rigid: &RigidParams,
) {
    let shapes: Vec<Vec<&[Vec2]>> = bodies.iter().map(|b| body_paths(b, world)).collect();

    particles.par_iter_mut().for_each(|p| {
        let mass = ptype(types, fluid.pack, p).mass;
        let mut vel = p.velocity(fluid.precision);
        let mut touched = false;

        for (index, (body, paths)) in bodies.iter().zip(&shapes).enumerate() {
            if !body.interactable || p.pos.distance_squared(body.pos) > body.bounding_radius_sqr {
                continue;
            }
            if !contains_point(paths, p.pos) {
                continue;
            }
            let Some((edge, _)) = closest_edge_point(paths, p.pos) else {
                continue;
            };
            let Some(normal) = (edge - p.pos).try_normalize() else {
                continue;
            };
            p.pos = edge;
            touched = true;

            let r = edge - body.pos;
            let surface = point_velocity(
                body.velocity(rigid.precision),
                body.rot_velocity(rigid.rot_precision),
                r,
            );
            let vn = (vel - surface).dot(normal);
            if vn >= 0.0 {
                continue;
            }
            let dv = -(1.0 + body.fluid_elasticity) * vn * normal;
            vel += dv;

            let (inv_m, inv_i) = body.motion.inverse_mass();
            if inv_m > 0.0 || inv_i > 0.0 {
                let j = -dv * mass;
                impulses.add_velocity(index, j * inv_m, r.perp_dot(j) * inv_i, rigid);
            }
        }

        if touched {
            p.pred_pos = p.pos;
            p.set_velocity(vel, fluid.precision);
        }
    });
}

fn linked(a: usize, body_a: &RigidBody, b: usize, body_b: &RigidBody) -> bool {
    body_a.constraint.target() == Some(b) || body_b.constraint.target() == Some(a)
}

/// Resolve body-body contacts.
///
/// The invocation for body `a` handles every vertex of `a` inside another
/// body `b` and writes the impulse pair for both, so each contact is counted
/// once. Impulses and corrections are shared evenly among the contacts of a
/// pair. Bodies without a body elasticity are skipped, as are linked pairs
/// unless linked collisions are allowed.
pub fn body_collisions(
    bodies: &[RigidBody],
    world: &[Vec2],
    impulses: &ImpulseAccumulator,
    params: &RigidParams,
) {
    let shapes: Vec<Vec<&[Vec2]>> = bodies.iter().map(|b| body_paths(b, world)).collect();

    (0..bodies.len()).into_par_iter().for_each(|a| {
        let body_a = &bodies[a];
        let Some(elasticity_a) = body_a.rb_elasticity else {
            return;
        };
        let (inv_ma, inv_ia) = body_a.motion.inverse_mass();
        let vel_a = body_a.velocity(params.precision);
        let rot_a = body_a.rot_velocity(params.rot_precision);

        for (b, body_b) in bodies.iter().enumerate() {
            if b == a {
                continue;
            }
            let Some(elasticity_b) = body_b.rb_elasticity else {
                continue;
            };
            if !params.allow_linked_collisions && linked(a, body_a, b, body_b) {
                continue;
            }
            let (inv_mb, inv_ib) = body_b.motion.inverse_mass();
            if inv_ma + inv_ia + inv_mb + inv_ib == 0.0 {
                continue;
            }
            let reach = body_a.bounding_radius_sqr.sqrt() + body_b.bounding_radius_sqr.sqrt();
            if body_a.pos.distance_squared(body_b.pos) > reach * reach {
                continue;
            }

            let contacts: Vec<(Vec2, Vec2, f32)> = world[body_a.vertices.clone()]
                .iter()
                .filter(|v| contains_point(&shapes[b], **v))
                .filter_map(|v| {
                    let (edge, dist_sqr) = closest_edge_point(&shapes[b], *v)?;
                    let normal = (edge - *v).try_normalize()?;
                    Some((*v, normal, dist_sqr.sqrt()))
                })
                .collect();
            if contacts.is_empty() {
                continue;
            }

            let share = 1.0 / contacts.len() as f32;
            let elasticity = elasticity_a.min(elasticity_b);
            let vel_b = body_b.velocity(params.precision);
            let rot_b = body_b.rot_velocity(params.rot_precision);
            let total_inv_mass = inv_ma + inv_mb;

            for (v, normal, depth) in contacts {
                let ra = v - body_a.pos;
                let rb = v - body_b.pos;
                let rel = point_velocity(vel_a, rot_a, ra) - point_velocity(vel_b, rot_b, rb);
                let vn = rel.dot(normal);
                if vn < 0.0 {
                    let k = total_inv_mass
                        + ra.perp_dot(normal).powi(2) * inv_ia
                        + rb.perp_dot(normal).powi(2) * inv_ib;
                    if k > 0.0 {
                        let j = normal * (-(1.0 + elasticity) * vn / k * share);
                        impulses.add_velocity(a, j * inv_ma, ra.perp_dot(j) * inv_ia, params);
                        impulses.add_velocity(b, -j * inv_mb, rb.perp_dot(-j) * inv_ib, params);
                    }
                }

                if total_inv_mass > 0.0 {
                    let push = normal * depth * params.collision_correction * share;
                    impulses.add_correction(a, push * (inv_ma / total_inv_mass), params);
                    impulses.add_correction(b, -push * (inv_mb / total_inv_mass), params);
                }
                // Resting contact against an immovable body gets a constant
                // extra push so it does not settle into it.
                if inv_mb == 0.0 && inv_ma > 0.0 {
                    impulses.add_correction(a, normal * params.fixed_collision_correction * share, params);
                }
            }
        }
    });
}

/// Apply links. Records the spring force of every spring-linked body.
///
/// A spring adds `stiffness * stretch + damping * closing_speed` along the
/// link. A rigid link removes the relative speed along the link and corrects
/// the length error at `rigid_constraint_correction` per second.
pub fn constraints(bodies: &mut [RigidBody], impulses: &ImpulseAccumulator, params: &RigidParams) {
    let read: &[RigidBody] = &*bodies;
    let recorded: Vec<Option<f32>> = read
        .par_iter()
        .enumerate()
        .map(|(a, body)| {
            let (target, anchors) = match body.constraint {
                Constraint::None => return None,
                Constraint::Spring { target, anchors, .. } | Constraint::Rigid { target, anchors, .. } => {
                    (target, anchors)
                }
            };
            let other = read.get(target)?;

            let pa = body.to_world(anchors.this);
            let pb = other.to_world(anchors.other);
            let ra = pa - body.pos;
            let rb = pb - other.pos;
            let delta = pb - pa;
            let dist = delta.length();
            let dir = delta.try_normalize()?;

            let va = point_velocity(body.velocity(params.precision), body.rot_velocity(params.rot_precision), ra);
            let vb = point_velocity(other.velocity(params.precision), other.rot_velocity(params.rot_precision), rb);
            let separating = (vb - va).dot(dir);

            let (inv_ma, inv_ia) = body.motion.inverse_mass();
            let (inv_mb, inv_ib) = other.motion.inverse_mass();

            let (j, recorded) = match body.constraint {
                Constraint::None => return None,
                Constraint::Spring { rest_length, stiffness, damping, .. } => {
                    let stretch_force = stiffness * (dist - rest_length);
                    ((stretch_force + damping * separating) * params.dt, stretch_force)
                }
                Constraint::Rigid { rest_length, .. } => {
                    let k = inv_ma + inv_mb + ra.perp_dot(dir).powi(2) * inv_ia + rb.perp_dot(dir).powi(2) * inv_ib;
                    if k <= 0.0 {
                        return Some(0.0);
                    }
                    let error = dist - rest_length;
                    ((separating + error * params.rigid_constraint_correction) / k, 0.0)
                }
            };

            let impulse = dir * j;
            impulses.add_velocity(a, impulse * inv_ma, ra.perp_dot(impulse) * inv_ia, params);
            impulses.add_velocity(target, -impulse * inv_mb, rb.perp_dot(-impulse) * inv_ib, params);
            Some(recorded)
        })
        .collect();

    for (body, force) in bodies.iter_mut().zip(recorded) {
        if let Some(force) = force {
            body.recorded_spring_force = force;
        }
    }
}

/// Advance every body by one rigid step.
pub fn integrate(bodies: &mut [RigidBody], vertices: &[RigidBodyVertex], params: &RigidParams) {
    bodies.par_iter_mut().for_each(|body| match body.motion {
        Motion::Static => {
            body.vel_as_int = IVec2::ZERO;
            body.rot_vel_as_int = 0;
        }
        Motion::LinearMotor(motor) => {
            body.pos = motor.position(params.time);
            body.vel_as_int = params.precision.encode2(motor.velocity(params.time));
            body.rot_vel_as_int = 0;
        }
        Motion::Dynamic { .. } => integrate_dynamic(body, vertices, params),
    });
}

fn integrate_dynamic(body: &mut RigidBody, vertices: &[RigidBodyVertex], params: &RigidParams) {
    let dt = params.dt;
    let mut vel = body.velocity(params.precision);
    let mut rot = body.rot_velocity(params.rot_precision);

    vel.y -= body.gravity * dt;
    if body.interactable {
        vel += params.pointer.acceleration(body.pos, vel) * dt;
    }
    let damping = (1.0 - body.passive_damping * dt).max(0.0);
    vel = (vel * damping).clamp_length_max(params.max_velocity);
    rot = (rot * damping).clamp(-params.max_rot_velocity, params.max_rot_velocity);

    if vel.length() >= params.min_velocity {
        body.pos += vel * dt;
    }
    body.rotation += rot * dt;

    resolve_boundary(body, vertices, &mut vel, params);

    body.vel_as_int = params.precision.encode2(vel);
    body.rot_vel_as_int = params.rot_precision.encode(rot);
}

/// Keep all vertices inside the padded scene rectangle.
fn resolve_boundary(body: &mut RigidBody, vertices: &[RigidBodyVertex], vel: &mut Vec2, params: &RigidParams) {
    if body.vertices.is_empty() {
        return;
    }
    let (min, max) = vertices[body.vertices.clone()].iter().map(|v| body.to_world(v.local)).fold(
        (Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)),
        |(lo, hi), w| (lo.min(w), hi.max(w)),
    );
    let lo = Vec2::splat(params.padding);
    let hi = params.bounds - params.padding;

    let shift_x = if min.x < lo.x { lo.x - min.x } else if max.x > hi.x { hi.x - max.x } else { 0.0 };
    let shift_y = if min.y < lo.y { lo.y - min.y } else if max.y > hi.y { hi.y - max.y } else { 0.0 };
    let friction = (1.0 - params.boundary_friction.max(body.friction)).clamp(0.0, 1.0);

    if shift_x != 0.0 {
        body.pos.x += shift_x;
        if vel.x * shift_x < 0.0 {
            vel.x = -vel.x * params.boundary_elasticity;
            vel.y *= friction;
        }
    }
    if shift_y != 0.0 {
        body.pos.y += shift_y;
        if vel.y * shift_y < 0.0 {
            vel.y = -vel.y * params.boundary_elasticity;
            vel.x *= friction;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::PackLayout;
    use crate::rigid::{assemble, AssemblyParams, LinkAnchors, LinkDesc, MassCache, RestLength, RigidBodyDesc};

    fn config() -> SimConfig {
        SimConfig { min_rb_velocity_for_movement: 0.0, ..Default::default() }
    }

    fn params() -> RigidParams {
        RigidParams::new(&config(), 0.01, 0.0, PointerForce::default())
    }

    fn scene(descs: &[RigidBodyDesc]) -> (Vec<RigidBody>, Vec<RigidBodyVertex>) {
        let c = config();
        let assembly = AssemblyParams {
            mass_grid_spacing: 0.5,
            material_count: 0,
            rb_precision: c.rb_precision(),
            rb_rot_precision: c.rb_rot_precision(),
        };
        let out = assemble(descs, &assembly, &mut MassCache::new()).expect("scene assembles");
        (out.bodies, out.vertices)
    }

    fn rect(name: &str, pos: Vec2, size: Vec2, vel: Vec2) -> RigidBodyDesc {
        RigidBodyDesc { gravity: 0.0, start_velocity: vel, ..RigidBodyDesc::rect(name, pos, size) }
    }

    #[test]
    fn test_accumulator_is_order_independent() {
        let p = params();
        let impulses: Vec<Vec2> = (0..64).map(|i| Vec2::new(i as f32 * 0.013, -(i as f32) * 0.007)).collect();

        let forward = ImpulseAccumulator::new(1);
        impulses.par_iter().for_each(|j| forward.add_velocity(0, *j, 0.001, &p));
        let backward = ImpulseAccumulator::new(1);
        impulses.iter().rev().for_each(|j| backward.add_velocity(0, *j, 0.001, &p));

        let (mut a, _) = scene(&[rect("a", Vec2::splat(50.0), Vec2::splat(2.0), Vec2::ZERO)]);
        let mut b = a.clone();
        forward.apply(&mut a, &p);
        backward.apply(&mut b, &p);
        assert_eq!(a[0].vel_as_int, b[0].vel_as_int);
        assert_eq!(a[0].rot_vel_as_int, b[0].rot_vel_as_int);
        assert!(forward.is_idle());
    }

    #[test]
    fn test_static_body_never_moves() {
        let (mut bodies, vertices) = scene(&[RigidBodyDesc {
            can_move: false,
            ..rect("wall", Vec2::splat(50.0), Vec2::splat(2.0), Vec2::new(3.0, 0.0))
        }]);
        integrate(&mut bodies, &vertices, &params());
        assert_eq!(bodies[0].pos, Vec2::splat(50.0));
        assert_eq!(bodies[0].vel_as_int, IVec2::ZERO);
    }

    #[test]
    fn test_motor_follows_its_line() {
        let motor = crate::rigid::LinearMotor {
            start: Vec2::new(10.0, 10.0),
            end: Vec2::new(20.0, 10.0),
            speed: 1.0,
            time_offset: 0.0,
            round_trip: false,
        };
        let (mut bodies, vertices) = scene(&[RigidBodyDesc {
            motor: Some(motor),
            ..rect("lift", Vec2::ZERO, Vec2::splat(2.0), Vec2::ZERO)
        }]);
        let p = RigidParams { time: 0.25, ..params() };
        integrate(&mut bodies, &vertices, &p);
        assert!((bodies[0].pos - Vec2::new(12.5, 10.0)).length() < 1e-4);
        assert!((bodies[0].velocity(p.precision) - Vec2::new(10.0, 0.0)).length() < 1e-3);
    }

    #[test]
    fn test_dynamic_body_falls() {
        let (mut bodies, vertices) = scene(&[RigidBodyDesc {
            gravity: 10.0,
            ..RigidBodyDesc::rect("box", Vec2::splat(50.0), Vec2::splat(2.0))
        }]);
        let p = params();
        integrate(&mut bodies, &vertices, &p);
        assert!((bodies[0].velocity(p.precision).y + 0.1).abs() < 1e-4);
        assert!(bodies[0].pos.y < 50.0);
    }

    #[test]
    fn test_slow_body_holds_position() {
        let (mut bodies, vertices) = scene(&[rect("box", Vec2::splat(50.0), Vec2::splat(2.0), Vec2::new(0.5, 0.0))]);
        let p = RigidParams { min_velocity: 1.0, ..params() };
        integrate(&mut bodies, &vertices, &p);
        assert_eq!(bodies[0].pos, Vec2::splat(50.0));
        assert!((bodies[0].velocity(p.precision).x - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_floor_bounces_body() {
        let (mut bodies, vertices) = scene(&[rect("box", Vec2::new(50.0, 2.5), Vec2::splat(2.0), Vec2::new(0.0, -5.0))]);
        let p = params();
        integrate(&mut bodies, &vertices, &p);
        // Bottom edge rests on the padding line.
        assert!((bodies[0].pos.y - 3.0).abs() < 1e-4);
        let vel = bodies[0].velocity(p.precision);
        assert!((vel.y - 5.0 * p.boundary_elasticity).abs() < 1e-3, "{}", vel.y);
    }

    #[test]
    fn test_particle_pushed_out_of_body() {
        let (bodies, vertices) = scene(&[rect("box", Vec2::splat(50.0), Vec2::splat(4.0), Vec2::ZERO)]);
        let c = config();
        let pack = PackLayout::new(16, 1);
        let fluid = FluidParams::new(&c, 0.01, pack, PointerForce::default());
        let rigid = params();
        let types = vec![ParticleType::default()];
        let mut particles =
            vec![Particle::new(Vec2::new(50.5, 51.5), 0, pack).with_velocity(Vec2::new(0.0, -3.0), fluid.precision)];

        let mut world = Vec::new();
        transform_vertices(&bodies, &vertices, &mut world);
        let impulses = ImpulseAccumulator::new(bodies.len());
        particle_body_interaction(&mut particles, &types, &bodies, &world, &impulses, &fluid, &rigid);

        assert!((particles[0].pos - Vec2::new(50.5, 52.0)).length() < 1e-4);
        let vel = particles[0].velocity(fluid.precision);
        assert!((vel.y - 3.0 * bodies[0].fluid_elasticity).abs() < 1e-2, "{}", vel.y);

        let mut bodies = bodies;
        impulses.apply(&mut bodies, &rigid);
        assert!(bodies[0].velocity(rigid.precision).y < 0.0);
    }

    fn colliding_pair(link: LinkDesc) -> (Vec<RigidBody>, Vec<RigidBodyVertex>) {
        scene(&[
            RigidBodyDesc { link, ..rect("a", Vec2::new(10.0, 10.0), Vec2::splat(2.0), Vec2::new(1.0, 0.0)) },
            rect("b", Vec2::new(11.7, 10.0), Vec2::new(2.0, 4.0), Vec2::new(-1.0, 0.0)),
        ])
    }

    #[test]
    fn test_bodies_bounce_apart() {
        let (mut bodies, vertices) = colliding_pair(LinkDesc::None);
        let p = params();
        let mut world = Vec::new();
        transform_vertices(&bodies, &vertices, &mut world);
        let impulses = ImpulseAccumulator::new(bodies.len());
        body_collisions(&bodies, &world, &impulses, &p);
        impulses.apply(&mut bodies, &p);

        assert!(bodies[0].velocity(p.precision).x < 1.0);
        assert!(bodies[1].velocity(p.precision).x > -1.0);
        assert!(bodies[0].pos.x < 10.0);
    }

    #[test]
    fn test_linked_bodies_do_not_collide() {
        let link = LinkDesc::Rigid {
            target: Some("b".into()),
            rest_length: RestLength::Auto,
            anchors: LinkAnchors::default(),
        };
        let (bodies, vertices) = colliding_pair(link);
        let mut world = Vec::new();
        transform_vertices(&bodies, &vertices, &mut world);
        let impulses = ImpulseAccumulator::new(bodies.len());
        body_collisions(&bodies, &world, &impulses, &params());
        assert!(impulses.is_idle());

        let allowed = RigidParams { allow_linked_collisions: true, ..params() };
        body_collisions(&bodies, &world, &impulses, &allowed);
        assert!(!impulses.is_idle());
    }

    #[test]
    fn test_bodies_without_elasticity_pass_through() {
        let (mut bodies, vertices) = colliding_pair(LinkDesc::None);
        bodies[1].rb_elasticity = None;
        let mut world = Vec::new();
        transform_vertices(&bodies, &vertices, &mut world);
        let impulses = ImpulseAccumulator::new(bodies.len());
        body_collisions(&bodies, &world, &impulses, &params());
        assert!(impulses.is_idle());
    }

    fn linked_pair(link: LinkDesc, vel_b: Vec2) -> Vec<RigidBody> {
        scene(&[
            RigidBodyDesc { link, ..rect("a", Vec2::new(10.0, 10.0), Vec2::splat(2.0), Vec2::ZERO) },
            rect("b", Vec2::new(20.0, 10.0), Vec2::splat(2.0), vel_b),
        ])
        .0
    }

    #[test]
    fn test_spring_pulls_and_records_force() {
        let link = LinkDesc::Spring {
            target: Some("b".into()),
            rest_length: RestLength::Fixed(6.0),
            stiffness: 10.0,
            damping: 0.0,
            anchors: LinkAnchors::default(),
        };
        let mut bodies = linked_pair(link, Vec2::ZERO);
        let p = params();
        let impulses = ImpulseAccumulator::new(bodies.len());
        constraints(&mut bodies, &impulses, &p);
        assert!((bodies[0].recorded_spring_force - 40.0).abs() < 1e-3);

        impulses.apply(&mut bodies, &p);
        assert!(bodies[0].velocity(p.precision).x > 0.0);
        assert!(bodies[1].velocity(p.precision).x < 0.0);
    }

    #[test]
    fn test_rigid_link_cancels_separation() {
        let link = LinkDesc::Rigid {
            target: Some("b".into()),
            rest_length: RestLength::Fixed(10.0),
            anchors: LinkAnchors::default(),
        };
        let mut bodies = linked_pair(link, Vec2::new(1.0, 0.0));
        let p = params();
        let impulses = ImpulseAccumulator::new(bodies.len());
        constraints(&mut bodies, &impulses, &p);
        impulses.apply(&mut bodies, &p);

        let va = bodies[0].velocity(p.precision);
        let vb = bodies[1].velocity(p.precision);
        assert!((va.x - 0.5).abs() < 1e-3, "{}", va.x);
        assert!((vb.x - va.x).abs() < 1e-3);
    }
}
