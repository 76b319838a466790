//! # Whirl
//!
//! A 2D fluid and rigid-body simulation built from data-parallel dispatches,
//! with a compositor that draws each frame and casts soft shadows.
//!
//! Whirl owns every buffer of a scene and runs them through a fixed pipeline
//! each frame: a spatial grid sorted by a bitonic network, a ping-pong prefix
//! scan that lays out per-particle springs, double-density fluid kernels,
//! rigid-body kernels on their own cadence, and an ordered set of render
//! passes finished by a multi-resolution shadow pipeline.
//!
//! ## Quick Start
//!
//! ```ignore
//! use whirl::prelude::*;
//!
//! fn main() -> Result<(), SimulationError> {
//!     let config = SimConfig::default();
//!     let scene = Scene {
//!         particles: (0..400)
//!             .map(|i| ParticleSpawn::at(Vec2::new(20.0 + (i % 20) as f32, 40.0 + (i / 20) as f32), 0))
//!             .collect(),
//!         bodies: vec![RigidBodyDesc::rect("crate", Vec2::new(60.0, 60.0), Vec2::splat(8.0))],
//!         ..Default::default()
//!     };
//!
//!     let mut scheduler = SimulationScheduler::new(config, scene, &[])?;
//!     for _ in 0..120 {
//!         scheduler.run_frame(1.0 / 60.0);
//!     }
//!     scheduler.to_image().save("frame.png")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Frame Structure
//!
//! Every frame runs `time_steps_per_frame` outer steps of
//! `sub_steps_per_frame` sub-steps each:
//!
//! | Stage | When | Module |
//! |-------|------|--------|
//! | Merge spawned particles | frame start | [`scheduler`] |
//! | Grid sort + spring layout | once per outer step | [`grid`], [`springs`] |
//! | Render | first outer step | [`render`] |
//! | Fluid kernels | every sub-step | [`kernels::fluid`] |
//! | Spring transfer | sub-step 0 | [`springs`] |
//! | Rigid-body kernels | every `sub_steps_per_rb_update` sub-steps | [`kernels::rigid`] |
//! | Pose snapshots | frame end | [`readback`] |
//!
//! ## Wire Formats
//!
//! In memory, states such as "immovable", "motor" or "no texture" are enums.
//! The `*Data` records ([`RbData`], [`MatData`], [`ParticleTypeData`]) are
//! the compact GPU encodings, with sentinel values documented on each field.
//!
//! ## GPU Backend
//!
//! The [`gpu`] module runs the sort network, the prefix scan and the shadow
//! post-process on a wgpu device from the same WGSL sources the CPU kernels
//! are tested against.

pub mod config;
pub mod error;
pub mod fixed;
pub mod gpu;
pub mod grid;
pub mod input;
pub mod kernels;
pub mod material;
pub mod particle;
pub mod readback;
pub mod render;
pub mod rigid;
pub mod scheduler;
pub mod springs;
pub mod time;

pub use bytemuck;
pub use config::SimConfig;
pub use error::{ConfigError, GpuError, SceneError, SimulationError};
pub use glam::{UVec2, Vec2, Vec3, Vec4};
pub use grid::{GridIndex, GridLayout, SpatialEntry};
pub use material::{BufferUpdate, MatData, Material, MaterialTable, Tiling};
pub use particle::{Particle, ParticleSpawn, ParticleType, ParticleTypeData, PhaseChange};
pub use readback::{BodyPose, PoseSnapshot};
pub use render::{RenderCompositor, RenderStep, SensorArea, ShadowType};
pub use rigid::{LinearMotor, LinkDesc, RbData, RestLength, RigidBody, RigidBodyDesc};
pub use scheduler::{FrameStats, Scene, SettingsChange, SimulationScheduler, SimulationState};
pub use springs::SpringAllocator;
pub use time::{FrameClock, TimeStepMode};

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use whirl::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::SimConfig;
    pub use crate::error::SimulationError;
    pub use crate::input::{Buttons, PointerInput, PointerSample};
    pub use crate::material::{Material, Tiling};
    pub use crate::particle::{ParticleSpawn, ParticleType, PhaseChange, ROOM_TEMPERATURE, ZERO_CELSIUS};
    pub use crate::render::{RenderStep, SensorArea, ShadowType};
    pub use crate::rigid::{LinearMotor, LinkAnchors, LinkDesc, RestLength, RigidBodyDesc, Subdivision};
    pub use crate::scheduler::{Scene, SimulationScheduler};
    pub use crate::time::{FrameClock, TimeStepMode};
    pub use crate::{Vec2, Vec3, Vec4};
}
