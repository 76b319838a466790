//! Rigid-body state and its GPU wire format.
//!
//! In memory a body's motion and constraint are tagged enums that the
//! integrator matches exhaustively. The compact sentinel encoding (negative
//! masses for motors, `-1` indices for "none", stiffness `0` for rigid links)
//! exists only in [`RbData`], the buffer record uploaded to the GPU and read
//! back for pose snapshots.

use std::f32::consts::TAU;
use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

use crate::fixed::Precision;

/// Wire mass of a static body.
pub const MASS_STATIC: f32 = 0.0;
/// Wire mass of a one-shot linear motor.
pub const MASS_MOTOR_ONE_SHOT: f32 = -1.0;
/// Wire mass of a round-trip linear motor.
pub const MASS_MOTOR_ROUND_TRIP: f32 = -2.0;

/// A body driven along a straight line between two world-space anchors.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearMotor {
    pub start: Vec2,
    pub end: Vec2,
    /// Cycles per second.
    pub speed: f32,
    /// Phase offset in cycles.
    pub time_offset: f32,
    /// Ease back and forth instead of jumping from `end` to `start`.
    pub round_trip: bool,
}

impl LinearMotor {
    /// Interpolation factor in `[0, 1]` at simulation time `time`.
    pub fn phase(&self, time: f32) -> f32 {
        let cycles = time * self.speed + self.time_offset;
        if self.round_trip {
            ((cycles + 0.75) * TAU).sin() * 0.5 + 0.5
        } else {
            cycles.rem_euclid(1.0)
        }
    }

    pub fn position(&self, time: f32) -> Vec2 {
        self.start.lerp(self.end, self.phase(time))
    }

    /// Time derivative of [`position`](Self::position).
    pub fn velocity(&self, time: f32) -> Vec2 {
        let cycles = time * self.speed + self.time_offset;
        let dphase = if self.round_trip {
            ((cycles + 0.75) * TAU).cos() * 0.5 * TAU * self.speed
        } else {
            self.speed
        };
        (self.end - self.start) * dphase
    }
}

/// How a body moves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Motion {
    /// Never moves. Collides with infinite mass.
    Static,
    Dynamic { mass: f32, inertia: f32 },
    LinearMotor(LinearMotor),
}

impl Motion {
    /// Inverse mass and inverse inertia. Zero for bodies that are not pushed.
    pub fn inverse_mass(&self) -> (f32, f32) {
        match self {
            Motion::Dynamic { mass, inertia } => (
                if *mass > 0.0 { 1.0 / mass } else { 0.0 },
                if *inertia > 0.0 { 1.0 / inertia } else { 0.0 },
            ),
            Motion::Static | Motion::LinearMotor(_) => (0.0, 0.0),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Motion::Dynamic { .. })
    }
}

/// Attachment points of a link, in each body's local frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkAnchors {
    pub this: Vec2,
    pub other: Vec2,
}

/// A link from this body to another one.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Constraint {
    #[default]
    None,
    Spring {
        target: usize,
        rest_length: f32,
        stiffness: f32,
        damping: f32,
        anchors: LinkAnchors,
    },
    /// Holds the anchors at a fixed distance.
    Rigid {
        target: usize,
        rest_length: f32,
        anchors: LinkAnchors,
    },
}

impl Constraint {
    pub fn target(&self) -> Option<usize> {
        match self {
            Constraint::None => None,
            Constraint::Spring { target, .. } | Constraint::Rigid { target, .. } => Some(*target),
        }
    }
}

/// Draw settings. `None` disables the corresponding pass for this body.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BodyRender {
    pub priority: Option<u32>,
    pub material: Option<usize>,
    pub spring_material: Option<usize>,
}

/// Simulation state of one rigid body.
#[derive(Clone, Debug, PartialEq)]
pub struct RigidBody {
    pub name: String,
    /// Centroid position.
    pub pos: Vec2,
    /// Accumulated rotation in radians.
    pub rotation: f32,
    /// Linear velocity in fixed-point units of the body precision.
    pub vel_as_int: IVec2,
    /// Angular velocity in fixed-point units of the rotation precision.
    pub rot_vel_as_int: i32,
    pub motion: Motion,
    pub gravity: f32,
    /// Restitution against other bodies. `None` means the body does not
    /// take part in body-body collisions.
    pub rb_elasticity: Option<f32>,
    pub fluid_elasticity: f32,
    pub friction: f32,
    pub passive_damping: f32,
    /// Whether particles and the pointer interact with this body.
    pub interactable: bool,
    /// Squared radius of the bounding circle around the centroid.
    pub bounding_radius_sqr: f32,
    /// Range of this body's vertices in the shared vertex buffer.
    pub vertices: Range<usize>,
    /// Closed paths, as ranges into the shared vertex buffer.
    pub paths: Vec<Range<usize>>,
    pub constraint: Constraint,
    /// Signed spring force of the last constraint update.
    pub recorded_spring_force: f32,
    pub render: BodyRender,
}

impl RigidBody {
    #[inline]
    pub fn velocity(&self, precision: Precision) -> Vec2 {
        precision.decode2(self.vel_as_int)
    }

    #[inline]
    pub fn rot_velocity(&self, precision: Precision) -> f32 {
        precision.decode(self.rot_vel_as_int)
    }

    /// Local point to world space.
    #[inline]
    pub fn to_world(&self, local: Vec2) -> Vec2 {
        self.pos + Vec2::from_angle(self.rotation).rotate(local)
    }

    /// Serialize to the GPU record.
    pub fn to_wire(&self) -> RbData {
        let (mass, inertia, lerp_speed, lerp_time_offset) = match self.motion {
            Motion::Static => (MASS_STATIC, 0.0, 0.0, 0.0),
            Motion::Dynamic { mass, inertia } => (mass, inertia, 0.0, 0.0),
            Motion::LinearMotor(m) => (
                if m.round_trip { MASS_MOTOR_ROUND_TRIP } else { MASS_MOTOR_ONE_SHOT },
                0.0,
                m.speed,
                m.time_offset,
            ),
        };

        let (linked, rest, stiffness, damping, anchors) = match self.constraint {
            Constraint::None => (-1, 0.0, 0.0, 0.0, LinkAnchors::default()),
            Constraint::Spring { target, rest_length, stiffness, damping, anchors } => {
                (target as i32, rest_length, stiffness, damping, anchors)
            }
            Constraint::Rigid { target, rest_length, anchors } => {
                (target as i32, rest_length, 0.0, 0.0, anchors)
            }
        };
        // Motors reuse the anchor slots for their endpoints.
        let (link_this, link_other) = match self.motion {
            Motion::LinearMotor(m) => (m.start, m.end),
            _ => (anchors.this, anchors.other),
        };

        let radius = if self.interactable { self.bounding_radius_sqr } else { -self.bounding_radius_sqr };

        RbData {
            pos: self.pos,
            vel_as_int: self.vel_as_int,
            rot_vel_as_int: self.rot_vel_as_int,
            tot_rot: self.rotation,
            mass,
            inertia,
            gravity: self.gravity,
            rb_elasticity: self.rb_elasticity.unwrap_or(-1.0),
            fluid_elasticity: self.fluid_elasticity,
            friction: self.friction,
            passive_damping: self.passive_damping,
            max_radius_sqr: radius,
            start_index: self.vertices.start as i32,
            end_index: self.vertices.end as i32 - 1,
            linked_rb_index: linked,
            spring_rest_length: rest,
            spring_stiffness: stiffness,
            damping,
            local_link_pos_this: link_this,
            local_link_pos_other: link_other,
            lerp_speed,
            lerp_time_offset,
            recorded_spring_force: self.recorded_spring_force,
            render_priority: self.render.priority.map_or(-1, |p| p as i32),
            mat_index: self.render.material.map_or(-1, |m| m as i32),
            spring_mat_index: self.render.spring_material.map_or(-1, |m| m as i32),
            _pad: [0; 2],
        }
    }
}

/// GPU record of a rigid body.
///
/// Sentinels:
/// - `mass`: `0` static, `-1` one-shot motor, `-2` round-trip motor.
/// - `max_radius_sqr < 0`: not interactable.
/// - `rb_elasticity == -1`: no body-body collisions.
/// - `linked_rb_index == -1`: no link. `spring_stiffness == 0` with a link
///   is a rigid link.
/// - `render_priority`, `mat_index`, `spring_mat_index == -1`: not drawn.
/// - For motors `local_link_pos_this/other` hold the start and end anchors.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RbData {
    pub pos: Vec2,
    pub vel_as_int: IVec2,
    pub rot_vel_as_int: i32,
    pub tot_rot: f32,
    pub mass: f32,
    pub inertia: f32,
    pub gravity: f32,
    pub rb_elasticity: f32,
    pub fluid_elasticity: f32,
    pub friction: f32,
    pub passive_damping: f32,
    pub max_radius_sqr: f32,
    pub start_index: i32,
    pub end_index: i32,
    pub linked_rb_index: i32,
    pub spring_rest_length: f32,
    pub spring_stiffness: f32,
    pub damping: f32,
    pub local_link_pos_this: Vec2,
    pub local_link_pos_other: Vec2,
    pub lerp_speed: f32,
    pub lerp_time_offset: f32,
    pub recorded_spring_force: f32,
    pub render_priority: i32,
    pub mat_index: i32,
    pub spring_mat_index: i32,
    pub _pad: [u32; 2],
}

impl RbData {
    /// Decode the motion sentinel.
    pub fn motion(&self) -> Motion {
        if self.mass > 0.0 {
            Motion::Dynamic { mass: self.mass, inertia: self.inertia }
        } else if self.mass == MASS_STATIC {
            Motion::Static
        } else {
            Motion::LinearMotor(LinearMotor {
                start: self.local_link_pos_this,
                end: self.local_link_pos_other,
                speed: self.lerp_speed,
                time_offset: self.lerp_time_offset,
                round_trip: self.mass == MASS_MOTOR_ROUND_TRIP,
            })
        }
    }

    /// Decode the link sentinels.
    pub fn constraint(&self) -> Constraint {
        if self.linked_rb_index < 0 {
            return Constraint::None;
        }
        let target = self.linked_rb_index as usize;
        let anchors = LinkAnchors { this: self.local_link_pos_this, other: self.local_link_pos_other };
        if self.spring_stiffness == 0.0 {
            Constraint::Rigid { target, rest_length: self.spring_rest_length, anchors }
        } else {
            Constraint::Spring {
                target,
                rest_length: self.spring_rest_length,
                stiffness: self.spring_stiffness,
                damping: self.damping,
                anchors,
            }
        }
    }
}

/// A vertex in its body's local frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RigidBodyVertex {
    pub local: Vec2,
    pub parent: u32,
}

/// GPU record of a vertex. `pos.x` of every path start after the first
/// carries the path flag offset, see [`crate::rigid::path`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RbVertexData {
    pub pos: Vec2,
    pub parent_index: i32,
    pub _pad: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(motion: Motion, constraint: Constraint) -> RigidBody {
        RigidBody {
            name: "b".into(),
            pos: Vec2::new(3.0, 4.0),
            rotation: 0.0,
            vel_as_int: IVec2::ZERO,
            rot_vel_as_int: 0,
            motion,
            gravity: 9.82,
            rb_elasticity: None,
            fluid_elasticity: 0.2,
            friction: 0.1,
            passive_damping: 0.0,
            interactable: false,
            bounding_radius_sqr: 4.0,
            vertices: 0..4,
            paths: vec![0..4],
            constraint,
            recorded_spring_force: 0.0,
            render: BodyRender::default(),
        }
    }

    #[test]
    fn test_motion_sentinels_round_trip() {
        let motor = LinearMotor {
            start: Vec2::ZERO,
            end: Vec2::X,
            speed: 0.5,
            time_offset: 0.25,
            round_trip: true,
        };
        for motion in [
            Motion::Static,
            Motion::Dynamic { mass: 2.0, inertia: 3.0 },
            Motion::LinearMotor(motor),
            Motion::LinearMotor(LinearMotor { round_trip: false, ..motor }),
        ] {
            assert_eq!(body(motion, Constraint::None).to_wire().motion(), motion);
        }
    }

    #[test]
    fn test_constraint_sentinels_round_trip() {
        let anchors = LinkAnchors { this: Vec2::X, other: -Vec2::Y };
        for constraint in [
            Constraint::None,
            Constraint::Rigid { target: 3, rest_length: 2.0, anchors },
            Constraint::Spring { target: 1, rest_length: 5.0, stiffness: 20.0, damping: 1.0, anchors },
        ] {
            let wire = body(Motion::Static, constraint).to_wire();
            assert_eq!(wire.constraint(), constraint);
        }
    }

    #[test]
    fn test_wire_flags() {
        let wire = body(Motion::Static, Constraint::None).to_wire();
        assert_eq!(wire.linked_rb_index, -1);
        assert_eq!(wire.rb_elasticity, -1.0);
        assert!(wire.max_radius_sqr < 0.0);
        assert_eq!(wire.render_priority, -1);
        assert_eq!(wire.end_index, 3);
        assert_eq!(std::mem::size_of::<RbData>() % 8, 0);
    }

    #[test]
    fn test_one_shot_motor_wraps() {
        let m = LinearMotor { start: Vec2::ZERO, end: Vec2::new(10.0, 0.0), speed: 1.0, time_offset: 0.0, round_trip: false };
        assert!((m.position(0.25).x - 2.5).abs() < 1e-4);
        assert!((m.position(1.25).x - 2.5).abs() < 1e-4);
        assert_eq!(m.velocity(0.3), Vec2::new(10.0, 0.0));
    }

    #[test]
    fn test_round_trip_motor_starts_at_start() {
        let m = LinearMotor { start: Vec2::ZERO, end: Vec2::new(10.0, 0.0), speed: 1.0, time_offset: 0.0, round_trip: true };
        // sin(0.75 * TAU) = -1, so phase 0 sits at the start anchor.
        assert!(m.position(0.0).x.abs() < 1e-4);
        assert!((m.position(0.5).x - 10.0).abs() < 1e-3);
        assert!(m.velocity(0.0).x.abs() < 1e-3);
    }
}
