//! Flat per-frame configuration record.
//!
//! Every tunable the scheduler, kernels and compositor read lives in one
//! plain struct with named fields. There are no keyed or dynamic config
//! objects: a settings edit replaces the record and the scheduler's
//! `on_settings_changed` path pushes the new values out.
//!
//! Configs can be stored as JSON. Missing fields fall back to defaults, so
//! partial files work:
//!
//! ```ignore
//! let config = SimConfig::from_json_str(r#"{ "time_steps_per_frame": 2 }"#)?;
//! ```

use std::path::Path;

use glam::{UVec2, Vec2};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fixed::Precision;
use crate::render::shadow::MAX_DOWNSAMPLING;
use crate::rigid::MIN_MASS_GRID_SPACING;
use crate::render::{RenderStep, ShadowType};
use crate::time::TimeStepMode;

/// Complete simulation configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    // Fluid simulation
    /// Maximum interaction radius, which is also the grid cell width.
    pub max_influence_radius: u32,
    /// Time used to extrapolate predicted positions for neighbour search.
    pub look_ahead_time: f32,
    /// Hard particle capacity. Buffers are sized to this once.
    pub max_particles: u32,
    pub max_starting_particles: u32,
    pub max_springs_per_particle: u32,
    pub simulate_viscosity: bool,
    pub simulate_springs: bool,
    /// Heat conduction, pointer heating and phase changes.
    pub simulate_temperature: bool,

    // Scene boundary
    pub boundary_dims: UVec2,
    pub fluid_padding: f32,
    pub rigid_body_padding: f32,
    pub boundary_elasticity: f32,
    pub boundary_friction: f32,

    // Safety clamps
    pub max_particle_velocity: f32,
    pub max_rb_velocity: f32,
    pub max_rb_rot_velocity: f32,
    pub min_rb_velocity_for_movement: f32,

    // Fixed-point storage precision
    pub precision_particle: f32,
    pub precision_rb: f32,
    pub precision_rb_rot: f32,

    // Rigid bodies
    pub allow_linked_rb_collisions: bool,
    pub rb_collision_correction: f32,
    pub rb_fixed_collision_correction: f32,
    pub rigid_constraint_correction: f32,
    /// Grid spacing of the mass-property integration.
    pub mass_grid_spacing: f32,

    // Time
    pub time_steps_per_frame: u32,
    pub sub_steps_per_frame: u32,
    /// Rigid-body kernels run once every this many sub-steps.
    pub sub_steps_per_rb_update: u32,
    pub time_step_mode: TimeStepMode,
    pub time_step: f32,
    pub program_speed: f32,
    pub time_scale: f32,

    // Pointer interaction
    pub interaction_radius: f32,
    pub interaction_attraction: f32,
    pub interaction_repulsion: f32,
    pub interaction_dampening: f32,
    /// Heating on the primary button, cooling on the secondary, scaled like
    /// attraction by the radius. Kelvin per second at the pointer.
    pub interaction_temperature_power: f32,
    pub rb_interaction_radius: f32,
    pub rb_interaction_attraction: f32,
    pub rb_interaction_repulsion: f32,
    pub rb_interaction_dampening: f32,

    // Rendering
    pub resolution: UVec2,
    pub render_order: Vec<RenderStep>,
    pub fluid_render_radius: f32,
    pub metaball_threshold: f32,
    pub rb_edge_width: f32,
    pub spring_render_width: f32,
    pub background_color: [f32; 3],
    pub sensor_tint_strength: f32,

    // Post processing
    pub shadow_type: ShadowType,
    pub shadow_darkness: f32,
    pub shadow_falloff: f32,
    pub rb_shadow_strength: f32,
    pub liquid_shadow_strength: f32,
    /// Light direction in degrees for directional shadows.
    pub shadow_direction: f32,
    pub shadow_blur_iterations: u32,
    pub rim_shading_strength: f32,
    /// Shadow working resolution is `resolution / 2^shadow_downsampling`.
    pub shadow_downsampling: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_influence_radius: 2,
            look_ahead_time: 0.017,
            max_particles: 30_000,
            max_starting_particles: 20_000,
            max_springs_per_particle: 150,
            simulate_viscosity: true,
            simulate_springs: true,
            simulate_temperature: true,

            boundary_dims: UVec2::new(300, 200),
            fluid_padding: 4.0,
            rigid_body_padding: 2.0,
            boundary_elasticity: 0.2,
            boundary_friction: 0.0,

            max_particle_velocity: 100.0,
            max_rb_velocity: 100.0,
            max_rb_rot_velocity: 100.0,
            min_rb_velocity_for_movement: 0.1,

            precision_particle: 1000.0,
            precision_rb: 50_000.0,
            precision_rb_rot: 500_000.0,

            allow_linked_rb_collisions: false,
            rb_collision_correction: 0.8,
            rb_fixed_collision_correction: 0.05,
            rigid_constraint_correction: 5.0,
            mass_grid_spacing: 1.0,

            time_steps_per_frame: 3,
            sub_steps_per_frame: 3,
            sub_steps_per_rb_update: 1,
            time_step_mode: TimeStepMode::Fixed,
            time_step: 0.02,
            program_speed: 2.0,
            time_scale: 1.0,

            interaction_radius: 40.0,
            interaction_attraction: 3.5,
            interaction_repulsion: 3.5,
            interaction_dampening: 1.0,
            interaction_temperature_power: 1.0,
            rb_interaction_radius: 40.0,
            rb_interaction_attraction: 3.5,
            rb_interaction_repulsion: 3.5,
            rb_interaction_dampening: 0.1,

            resolution: UVec2::new(600, 400),
            render_order: RenderStep::DEFAULT_ORDER.to_vec(),
            fluid_render_radius: 1.2,
            metaball_threshold: 1.0,
            rb_edge_width: 0.5,
            spring_render_width: 0.5,
            background_color: [0.08, 0.09, 0.12],
            sensor_tint_strength: 0.25,

            shadow_type: ShadowType::DirectionalBlurred,
            shadow_darkness: 0.45,
            shadow_falloff: 0.01,
            rb_shadow_strength: 1.0,
            liquid_shadow_strength: 0.35,
            shadow_direction: 60.0,
            shadow_blur_iterations: 1,
            rim_shading_strength: 2.0,
            shadow_downsampling: 1,
        }
    }
}

impl SimConfig {
    /// Parse a config from JSON text. Absent fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Clamp values the kernels cannot work with.
    ///
    /// Returns a description of every field that was changed. Each change is
    /// also logged as a warning.
    pub fn validate(&mut self) -> Vec<String> {
        let mut changes = Vec::new();
        let mut fix = |changes: &mut Vec<String>, what: String| {
            log::warn!("Config: {}", what);
            changes.push(what);
        };

        if self.max_influence_radius == 0 {
            self.max_influence_radius = 1;
            fix(&mut changes, "max_influence_radius was 0, set to 1".into());
        }
        if self.time_steps_per_frame == 0 {
            self.time_steps_per_frame = 1;
            fix(&mut changes, "time_steps_per_frame was 0, set to 1".into());
        }
        if self.sub_steps_per_frame == 0 {
            self.sub_steps_per_frame = 1;
            fix(&mut changes, "sub_steps_per_frame was 0, set to 1".into());
        }
        if self.sub_steps_per_rb_update == 0 {
            self.sub_steps_per_rb_update = 1;
            fix(&mut changes, "sub_steps_per_rb_update was 0, set to 1".into());
        }
        if self.max_starting_particles > self.max_particles {
            fix(
                &mut changes,
                format!(
                    "max_starting_particles {} exceeds max_particles {}, clamped",
                    self.max_starting_particles, self.max_particles
                ),
            );
            self.max_starting_particles = self.max_particles;
        }
        if self.resolution.x == 0 || self.resolution.y == 0 {
            self.resolution = self.resolution.max(UVec2::ONE);
            fix(&mut changes, "resolution had a zero dimension, raised to 1".into());
        }
        if self.shadow_downsampling > MAX_DOWNSAMPLING {
            fix(
                &mut changes,
                format!("shadow_downsampling {} clamped to {}", self.shadow_downsampling, MAX_DOWNSAMPLING),
            );
            self.shadow_downsampling = MAX_DOWNSAMPLING;
        }
        if self.mass_grid_spacing.is_nan() || self.mass_grid_spacing < MIN_MASS_GRID_SPACING {
            fix(
                &mut changes,
                format!("mass_grid_spacing {} raised to {}", self.mass_grid_spacing, MIN_MASS_GRID_SPACING),
            );
            self.mass_grid_spacing = MIN_MASS_GRID_SPACING;
        }
        if self.time_scale < 0.0 {
            self.time_scale = 0.0;
            fix(&mut changes, "time_scale was negative, set to 0".into());
        }

        changes
    }

    /// Boundary size rounded up to a whole number of grid cells.
    pub fn rounded_bounds(&self) -> UVec2 {
        let r = self.max_influence_radius.max(1);
        UVec2::new(self.boundary_dims.x.div_ceil(r) * r, self.boundary_dims.y.div_ceil(r) * r)
    }

    pub fn bounds_f32(&self) -> Vec2 {
        self.rounded_bounds().as_vec2()
    }

    /// Length of one half of the combined spring buffer.
    pub fn spring_half_length(&self) -> u32 {
        self.max_particles * self.max_springs_per_particle / 2
    }

    /// Total sub-steps executed per presented frame.
    pub fn steps_per_frame(&self) -> u32 {
        self.time_steps_per_frame * self.sub_steps_per_frame
    }

    pub fn particle_precision(&self) -> Precision {
        Precision(self.precision_particle)
    }

    pub fn rb_precision(&self) -> Precision {
        Precision(self.precision_rb)
    }

    pub fn rb_rot_precision(&self) -> Precision {
        Precision(self.precision_rb_rot)
    }
}
