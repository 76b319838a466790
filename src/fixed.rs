//! Fixed-point storage for velocities.
//!
//! Velocities that are accumulated from many parallel invocations (particle
//! impulses on a rigid body, spring reactions on a linked body) are stored as
//! scaled integers. Integer addition is associative, so the result does not
//! depend on the order in which invocations land, which keeps runs
//! deterministic across dispatch orderings.

use glam::{IVec2, Vec2};

/// Scale factor between a float value and its integer encoding.
///
/// A precision of `1000.0` stores three decimal digits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Precision(pub f32);

impl Precision {
    /// Encode a float. Values outside the `i32` range saturate.
    #[inline]
    pub fn encode(self, value: f32) -> i32 {
        let scaled = (value * self.0).round();
        if scaled >= i32::MAX as f32 {
            i32::MAX
        } else if scaled <= i32::MIN as f32 {
            i32::MIN
        } else {
            scaled as i32
        }
    }

    #[inline]
    pub fn decode(self, value: i32) -> f32 {
        value as f32 / self.0
    }

    #[inline]
    pub fn encode2(self, value: Vec2) -> IVec2 {
        IVec2::new(self.encode(value.x), self.encode(value.y))
    }

    #[inline]
    pub fn decode2(self, value: IVec2) -> Vec2 {
        Vec2::new(self.decode(value.x), self.decode(value.y))
    }

    /// Snap a value onto the fixed-point lattice.
    #[inline]
    pub fn quantize2(self, value: Vec2) -> Vec2 {
        self.decode2(self.encode2(value))
    }
}
