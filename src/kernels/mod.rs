//! Sub-step kernels of the CPU backend.
//!
//! Each public function is one dispatch: it reads its inputs in full, runs
//! one independent invocation per particle, cell or body on the rayon pool,
//! and writes its outputs. Nothing inside a dispatch relies on the order in
//! which invocations run. Where invocations must add into shared state they
//! do so through fixed-point atomics, see [`rigid::ImpulseAccumulator`].

pub mod fluid;
pub mod rigid;

use glam::Vec2;

use crate::config::SimConfig;
use crate::input::{Buttons, PointerLatch};

/// Pointer attraction or repulsion applied inside a radius.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointerForce {
    pub pos: Vec2,
    pub buttons: Buttons,
    pub radius: f32,
    pub attraction: f32,
    pub repulsion: f32,
    pub dampening: f32,
    /// Zero for bodies, which carry no temperature.
    pub temperature_power: f32,
}

impl PointerForce {
    pub fn for_particles(config: &SimConfig, latch: &PointerLatch) -> Self {
        Self {
            pos: latch.position(),
            buttons: latch.pressed(),
            radius: config.interaction_radius,
            attraction: config.interaction_attraction,
            repulsion: config.interaction_repulsion,
            dampening: config.interaction_dampening,
            temperature_power: config.interaction_temperature_power,
        }
    }

    pub fn for_bodies(config: &SimConfig, latch: &PointerLatch) -> Self {
        Self {
            pos: latch.position(),
            buttons: latch.pressed(),
            radius: config.rb_interaction_radius,
            attraction: config.rb_interaction_attraction,
            repulsion: config.rb_interaction_repulsion,
            dampening: config.rb_interaction_dampening,
            temperature_power: 0.0,
        }
    }

    /// Acceleration on something at `pos` moving with `vel`.
    ///
    /// The primary button pulls toward the pointer, the secondary pushes away.
    /// Both fade linearly to zero at the radius and damp the velocity.
    pub fn acceleration(&self, pos: Vec2, vel: Vec2) -> Vec2 {
        let strength = match (self.buttons.left, self.buttons.right) {
            (true, _) => self.attraction,
            (false, true) => -self.repulsion,
            (false, false) => return Vec2::ZERO,
        };
        let offset = self.pos - pos;
        let dist = offset.length();
        if dist >= self.radius || self.radius <= 0.0 {
            return Vec2::ZERO;
        }
        let falloff = 1.0 - dist / self.radius;
        let dir = if dist > f32::EPSILON { offset / dist } else { Vec2::ZERO };
        (dir * strength * self.radius - vel * self.dampening) * falloff
    }

    /// Temperature change per second at `pos`: heating while the primary
    /// button is held, cooling on the secondary.
    pub fn heating(&self, pos: Vec2) -> f32 {
        let sign = match (self.buttons.left, self.buttons.right) {
            (true, _) => 1.0,
            (false, true) => -1.0,
            (false, false) => return 0.0,
        };
        let dist = self.pos.distance(pos);
        if dist >= self.radius || self.radius <= 0.0 {
            return 0.0;
        }
        sign * self.temperature_power * self.radius * (1.0 - dist / self.radius)
    }
}
