//! Particle records and particle types.
//!
//! [`Particle`] is the storage layout shared by the CPU kernels and the GPU
//! buffers. Velocities are kept as fixed-point integers (see
//! [`crate::fixed`]) so that impulse accumulation does not depend on
//! invocation order.
//!
//! Each particle carries one packed `u32` holding three values in mixed
//! radix: the cell key it was last sorted into, its particle-type index and
//! its order inside that cell. The spring transfer kernel needs last frame's
//! key and order to find the particle's old spring slots, so the packed field
//! is only rewritten after the transfer has read it.
//!
//! Temperatures are in kelvin. A type may name the types its particles turn
//! into when they cool below or heat above a threshold; the switch rewrites
//! only the type part of the packed field.

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

use crate::fixed::Precision;

/// 20 °C, the temperature of spawns that do not give one.
pub const ROOM_TEMPERATURE: f32 = 293.15;

/// Kelvin at 0 °C.
pub const ZERO_CELSIUS: f32 = 273.15;

/// One fluid particle.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    /// Position extrapolated by the look-ahead time. Used for cell keys and
    /// neighbour distances.
    pub pred_pos: Vec2,
    pub pos: Vec2,
    /// Velocity in fixed-point units of the particle precision.
    pub vel_as_int: IVec2,
    pub last_vel: Vec2,
    pub density: f32,
    pub near_density: f32,
    /// Packed `{last cell key, type, order}`, see [`PackLayout`].
    pub packed: u32,
    pub recorded_pressure: f32,
    /// Kelvin.
    pub temperature: f32,
    /// Heat flow from neighbours gathered in the force pass, per second.
    pub temperature_exchange: f32,
}

impl Particle {
    /// A particle at rest and room temperature. `packed` starts with key 0
    /// and order 0.
    pub fn new(pos: Vec2, ptype: u32, layout: PackLayout) -> Self {
        Self {
            pred_pos: pos,
            pos,
            packed: layout.pack(PackedCell { key: 0, ptype, order: 0 }),
            temperature: ROOM_TEMPERATURE,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, kelvin: f32) -> Self {
        self.temperature = kelvin;
        self
    }

    pub fn with_velocity(mut self, vel: Vec2, precision: Precision) -> Self {
        self.vel_as_int = precision.encode2(vel);
        self
    }

    #[inline]
    pub fn velocity(&self, precision: Precision) -> Vec2 {
        precision.decode2(self.vel_as_int)
    }

    #[inline]
    pub fn set_velocity(&mut self, vel: Vec2, precision: Precision) {
        self.vel_as_int = precision.encode2(vel);
    }
}

/// Unpacked form of [`Particle::packed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedCell {
    pub key: u32,
    pub ptype: u32,
    pub order: u32,
}

/// Radices of the packed cell field.
///
/// `packed = key + ptype * cells + order * cells * types`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackLayout {
    pub cell_count: u32,
    pub type_count: u32,
}

impl PackLayout {
    pub fn new(cell_count: u32, type_count: u32) -> Self {
        Self {
            cell_count: cell_count.max(1),
            type_count: type_count.max(1),
        }
    }

    #[inline]
    pub fn pack(self, cell: PackedCell) -> u32 {
        debug_assert!(cell.key < self.cell_count);
        debug_assert!(cell.ptype < self.type_count);
        cell.key + self.cell_count * (cell.ptype + self.type_count * cell.order)
    }

    #[inline]
    pub fn unpack(self, packed: u32) -> PackedCell {
        let key = packed % self.cell_count;
        let rest = packed / self.cell_count;
        PackedCell {
            key,
            ptype: rest % self.type_count,
            order: rest / self.type_count,
        }
    }

    #[inline]
    pub fn ptype(self, packed: u32) -> u32 {
        (packed / self.cell_count) % self.type_count
    }

    /// Replace the type, keeping key and order.
    #[inline]
    pub fn with_ptype(self, packed: u32, ptype: u32) -> u32 {
        self.pack(PackedCell { ptype, ..self.unpack(packed) })
    }
}

/// A state change into another particle type at a temperature threshold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    /// Kelvin.
    pub threshold: f32,
    /// Index of the type the particle becomes.
    pub into: u32,
}

/// Physical and visual properties shared by every particle of one type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleType {
    /// Particles only form springs with particles of the same group.
    pub spring_group: Option<u32>,
    pub spring_plasticity: f32,
    pub spring_stiffness: f32,
    /// Relative deformation tolerated before plastic flow kicks in.
    pub spring_tolerance: f32,

    pub thermal_conductivity: f32,
    pub specific_heat_capacity: f32,
    /// Applies below the threshold.
    pub freeze: Option<PhaseChange>,
    /// Applies above the threshold.
    pub vaporize: Option<PhaseChange>,

    pub pressure: f32,
    pub near_pressure: f32,
    pub viscosity: f32,
    pub gravity: f32,

    pub mass: f32,
    pub target_density: f32,
    /// Velocity multiplier applied on boundary contact.
    pub damping: f32,
    pub passive_damping: f32,

    /// Index into the material table. `None` draws with the default colour.
    pub material: Option<usize>,
    pub influence_radius: f32,
    /// Scales this type's contribution to the shadow source.
    pub shadow_strength: f32,
}

impl Default for ParticleType {
    fn default() -> Self {
        Self {
            spring_group: None,
            spring_plasticity: 0.0,
            spring_stiffness: 0.0,
            spring_tolerance: 0.1,
            thermal_conductivity: 1.0,
            specific_heat_capacity: 10.0,
            freeze: None,
            vaporize: None,
            pressure: 30.0,
            near_pressure: 15.0,
            viscosity: 0.2,
            gravity: 9.82,
            mass: 1.0,
            target_density: 2.0,
            damping: 0.5,
            passive_damping: 0.0,
            material: None,
            influence_radius: 2.0,
            shadow_strength: 1.0,
        }
    }
}

impl ParticleType {
    /// A viscous type whose particles bind to each other.
    pub fn elastic(group: u32) -> Self {
        Self {
            spring_group: Some(group),
            spring_plasticity: 0.5,
            spring_stiffness: 40.0,
            spring_tolerance: 0.1,
            viscosity: 1.0,
            ..Default::default()
        }
    }

    /// Solid, liquid and gas states of one substance, stored at `first`,
    /// `first + 1` and `first + 2`. Melting and freezing happen at
    /// `melting_point`, boiling and condensing at `boiling_point` (kelvin).
    pub fn phase_states(first: u32, melting_point: f32, boiling_point: f32, states: [ParticleType; 3]) -> [ParticleType; 3] {
        let change = |threshold, into| Some(PhaseChange { threshold, into });
        let [solid, liquid, gas] = states;
        [
            ParticleType { freeze: None, vaporize: change(melting_point, first + 1), ..solid },
            ParticleType { freeze: change(melting_point, first), vaporize: change(boiling_point, first + 2), ..liquid },
            ParticleType { freeze: change(boiling_point, first + 1), vaporize: None, ..gas },
        ]
    }

    /// The type this one turns into at `temperature`, if any.
    pub fn phase_target(&self, temperature: f32) -> Option<u32> {
        match (self.freeze, self.vaporize) {
            (Some(f), _) if temperature < f.threshold => Some(f.into),
            (_, Some(v)) if temperature > v.threshold => Some(v.into),
            _ => None,
        }
    }

    pub fn to_wire(&self) -> ParticleTypeData {
        ParticleTypeData {
            spring_group: self.spring_group.map_or(-1, |g| g as i32),
            spring_plasticity: self.spring_plasticity,
            spring_stiffness: self.spring_stiffness,
            spring_tolerance: self.spring_tolerance,
            thermal_conductivity: self.thermal_conductivity,
            specific_heat_capacity: self.specific_heat_capacity,
            freeze_threshold: self.freeze.map_or(f32::MIN, |c| c.threshold),
            vaporize_threshold: self.vaporize.map_or(f32::MAX, |c| c.threshold),
            freeze_into: self.freeze.map_or(-1, |c| c.into as i32),
            vaporize_into: self.vaporize.map_or(-1, |c| c.into as i32),
            pressure: self.pressure,
            near_pressure: self.near_pressure,
            viscosity: self.viscosity,
            gravity: self.gravity,
            mass: self.mass,
            target_density: self.target_density,
            damping: self.damping,
            passive_damping: self.passive_damping,
            mat_index: self.material.map_or(-1, |m| m as i32),
            influence_radius: self.influence_radius,
            shadow_strength: self.shadow_strength,
            _pad: [0.0; 3],
        }
    }
}

/// GPU layout of a [`ParticleType`]. `-1` marks an absent group, material or
/// phase target; absent thresholds sit at the ends of the `f32` range.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ParticleTypeData {
    pub spring_group: i32,
    pub spring_plasticity: f32,
    pub spring_stiffness: f32,
    pub spring_tolerance: f32,
    pub thermal_conductivity: f32,
    pub specific_heat_capacity: f32,
    pub freeze_threshold: f32,
    pub vaporize_threshold: f32,
    pub freeze_into: i32,
    pub vaporize_into: i32,
    pub pressure: f32,
    pub near_pressure: f32,
    pub viscosity: f32,
    pub gravity: f32,
    pub mass: f32,
    pub target_density: f32,
    pub damping: f32,
    pub passive_damping: f32,
    pub mat_index: i32,
    pub influence_radius: f32,
    pub shadow_strength: f32,
    pub _pad: [f32; 3],
}

/// A particle submitted by a spawner, merged at the start of the next frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleSpawn {
    pub pos: Vec2,
    pub vel: Vec2,
    pub ptype: u32,
    /// Kelvin.
    #[serde(default = "room_temperature")]
    pub temperature: f32,
}

fn room_temperature() -> f32 {
    ROOM_TEMPERATURE
}

impl ParticleSpawn {
    /// A spawn at rest and room temperature.
    pub fn at(pos: Vec2, ptype: u32) -> Self {
        Self { pos, vel: Vec2::ZERO, ptype, temperature: ROOM_TEMPERATURE }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let layout = PackLayout::new(15_000, 4);
        let cell = PackedCell { key: 14_999, ptype: 3, order: 17 };
        assert_eq!(layout.unpack(layout.pack(cell)), cell);
        assert_eq!(layout.ptype(layout.pack(cell)), 3);
    }

    #[test]
    fn test_new_particle_keeps_type() {
        let layout = PackLayout::new(100, 3);
        let p = Particle::new(Vec2::new(1.0, 2.0), 2, layout);
        assert_eq!(layout.unpack(p.packed), PackedCell { key: 0, ptype: 2, order: 0 });
    }

    #[test]
    fn test_velocity_is_fixed_point() {
        let precision = Precision(1000.0);
        let p = Particle::new(Vec2::ZERO, 0, PackLayout::new(1, 1))
            .with_velocity(Vec2::new(1.25, -0.5), precision);
        assert_eq!(p.vel_as_int, IVec2::new(1250, -500));
    }

    #[test]
    fn test_wire_sentinels() {
        let wire = ParticleType::default().to_wire();
        assert_eq!(wire.spring_group, -1);
        assert_eq!(wire.mat_index, -1);
        assert_eq!(ParticleType::elastic(2).to_wire().spring_group, 2);
        assert_eq!(wire.freeze_into, -1);
        assert_eq!(wire.vaporize_threshold, f32::MAX);
        assert_eq!(std::mem::size_of::<ParticleTypeData>() % 16, 0);
    }

    #[test]
    fn test_phase_states_link_up() {
        let [solid, liquid, gas] = ParticleType::phase_states(
            3,
            ZERO_CELSIUS,
            ZERO_CELSIUS + 100.0,
            [ParticleType::default(), ParticleType::default(), ParticleType::default()],
        );
        assert_eq!(solid.phase_target(ZERO_CELSIUS - 5.0), None);
        assert_eq!(solid.phase_target(ZERO_CELSIUS + 1.0), Some(4));
        assert_eq!(liquid.phase_target(ROOM_TEMPERATURE), None);
        assert_eq!(liquid.phase_target(ZERO_CELSIUS - 1.0), Some(3));
        assert_eq!(liquid.phase_target(ZERO_CELSIUS + 101.0), Some(5));
        assert_eq!(gas.phase_target(ZERO_CELSIUS + 99.0), Some(4));
        assert_eq!(liquid.to_wire().vaporize_into, 5);
    }

    #[test]
    fn test_with_ptype_keeps_cell() {
        let layout = PackLayout::new(64, 3);
        let packed = layout.pack(PackedCell { key: 40, ptype: 1, order: 6 });
        assert_eq!(layout.unpack(layout.with_ptype(packed, 2)), PackedCell { key: 40, ptype: 2, order: 6 });
    }
}
