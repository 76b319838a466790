//! The frame loop.
//!
//! [`SimulationState`] owns every buffer of a running scene. The
//! [`SimulationScheduler`] drives it one frame at a time:
//!
//! ```text
//! merge spawns
//! for each outer step:
//!     resort (grid + spring layout) unless already sorted this step
//!     render, first outer step only
//!     for each sub-step:
//!         fluid kernels (spring transfer on sub-step 0)
//!         rigid kernels every `sub_steps_per_rb_update` sub-steps
//!         advance step counter and sim time
//! answer pose snapshot requests
//! ```
//!
//! ```ignore
//! let mut scheduler = SimulationScheduler::new(config, scene, &textures)?;
//! loop {
//!     scheduler.set_pointer(raw.sample(bounds), veto);
//!     scheduler.submit(spawner.drain());
//!     scheduler.run_frame(clock.tick());
//!     present(scheduler.output());
//! }
//! ```

use std::sync::mpsc::Receiver;

use glam::{UVec2, Vec2, Vec4};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::error::{SceneError, SimulationError};
use crate::grid::{GridIndex, GridLayout};
use crate::input::{PointerLatch, PointerSample};
use crate::kernels::fluid::{self, FluidParams};
use crate::kernels::rigid::{self as rigid_kernels, ImpulseAccumulator, RigidParams};
use crate::kernels::PointerForce;
use crate::material::{BufferUpdate, Material, MaterialTable};
use crate::particle::{PackLayout, PackedCell, Particle, ParticleSpawn, ParticleType};
use crate::readback::{PoseRequests, PoseSnapshot};
use crate::render::{RenderCompositor, RenderScene, SensorArea};
use crate::rigid::{assemble, AssemblyParams, AssemblyWarning, MassCache, RigidBody, RigidBodyDesc, RigidBodyVertex};
use crate::springs::SpringAllocator;

/// Everything a scene provider hands over when a scene is loaded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
    /// Falls back to a single default type when empty.
    pub particle_types: Vec<ParticleType>,
    pub particles: Vec<ParticleSpawn>,
    pub bodies: Vec<RigidBodyDesc>,
    pub materials: Vec<Material>,
    pub sensors: Vec<SensorArea>,
}

/// Cumulative dispatch counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub outer_steps: u64,
    pub sub_steps: u64,
    /// Grid sorts, at most one per outer step.
    pub grid_rebuilds: u64,
    pub spring_allocations: u64,
    pub spring_transfers: u64,
    /// Sub-steps that ran the fluid kernels.
    pub fluid_sub_steps: u64,
    pub rigid_updates: u64,
    pub renders: u64,
    pub injected: u64,
    pub dropped_spawns: u64,
}

/// What [`SimulationScheduler::on_settings_changed`] had to rebuild.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SettingsChange {
    /// Grid, spring buffers and packed particle fields were reallocated.
    pub grid_reallocated: bool,
    pub bodies_reassembled: bool,
    /// Stored fixed-point velocities were converted to a new precision.
    pub velocities_reencoded: bool,
    /// Particles beyond a lowered capacity were discarded.
    pub particles_truncated: usize,
}

/// All buffers of a running scene.
#[derive(Debug)]
pub struct SimulationState {
    pub config: SimConfig,
    pub types: Vec<ParticleType>,
    pub pack: PackLayout,
    pub particles: Vec<Particle>,
    pub grid: GridIndex,
    /// `(cell key, order)` per particle, from the latest sort.
    pub orders: Vec<(u32, u32)>,
    pub springs: SpringAllocator,
    pub body_descs: Vec<RigidBodyDesc>,
    pub bodies: Vec<RigidBody>,
    pub vertices: Vec<RigidBodyVertex>,
    pub world_vertices: Vec<Vec2>,
    pub impulses: ImpulseAccumulator,
    pub materials: MaterialTable,
    pub sensors: Vec<SensorArea>,
    pub mass_cache: MassCache,
    pub sim_time: f32,
    /// Sub-steps simulated since the scene was loaded.
    pub step_count: u64,
}

impl SimulationState {
    pub fn new(mut config: SimConfig, scene: Scene, textures: &[(String, RgbaImage)]) -> Result<Self, SimulationError> {
        config.validate();

        let materials = MaterialTable::build(scene.materials, textures);
        let types = if scene.particle_types.is_empty() {
            vec![ParticleType::default()]
        } else {
            scene.particle_types
        };
        check_type_materials(&types, materials.len())?;
        check_phase_targets(&types)?;

        let layout = GridLayout::from_config(&config);
        let pack = PackLayout::new(layout.cell_count(), types.len() as u32);

        let mut mass_cache = MassCache::new();
        let assembled = assemble(&scene.bodies, &assembly_params(&config, materials.len()), &mut mass_cache)?;

        let mut state = Self {
            grid: GridIndex::new(layout, config.max_particles as usize),
            springs: spring_allocator(&config, &layout),
            orders: Vec::new(),
            particles: Vec::with_capacity(config.max_particles as usize),
            impulses: ImpulseAccumulator::new(assembled.bodies.len()),
            world_vertices: Vec::with_capacity(assembled.vertices.len()),
            body_descs: scene.bodies,
            bodies: assembled.bodies,
            vertices: assembled.vertices,
            sensors: scene.sensors,
            sim_time: 0.0,
            step_count: 0,
            config,
            types,
            pack,
            materials,
            mass_cache,
        };

        let start = state.config.max_starting_particles as usize;
        if scene.particles.len() > start {
            log::debug!("Scene has {} particles, keeping the first {}", scene.particles.len(), start);
        }
        for spawn in scene.particles.iter().take(start) {
            state.push_particle(spawn);
        }
        rigid_kernels::transform_vertices(&state.bodies, &state.vertices, &mut state.world_vertices);

        log::info!(
            "Scene ready: {} particles, {} rigid bodies, {} vertices, {} materials",
            state.particles.len(),
            state.bodies.len(),
            state.vertices.len(),
            state.materials.len()
        );
        Ok(state)
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        (self.config.max_particles as usize).saturating_sub(self.particles.len())
    }

    fn push_particle(&mut self, spawn: &ParticleSpawn) -> bool {
        if spawn.ptype as usize >= self.types.len() {
            log::debug!("Spawn with unknown particle type {} ignored", spawn.ptype);
            return false;
        }
        let particle = Particle::new(spawn.pos, spawn.ptype, self.pack)
            .with_velocity(spawn.vel, self.config.particle_precision())
            .with_temperature(spawn.temperature);
        self.particles.push(particle);
        true
    }

    pub fn pose_snapshot(&self) -> PoseSnapshot {
        PoseSnapshot::from_bodies(&self.bodies, self.step_count, self.sim_time)
    }
}

fn check_type_materials(types: &[ParticleType], count: usize) -> Result<(), SceneError> {
    for (ptype, t) in types.iter().enumerate() {
        if let Some(index) = t.material.filter(|&m| m >= count) {
            return Err(SceneError::TypeMaterialOutOfRange { ptype, index, count });
        }
    }
    Ok(())
}

fn check_phase_targets(types: &[ParticleType]) -> Result<(), SceneError> {
    let count = types.len();
    for (ptype, t) in types.iter().enumerate() {
        for change in [t.freeze, t.vaporize].into_iter().flatten() {
            if change.into as usize >= count {
                return Err(SceneError::PhaseTargetOutOfRange { ptype, into: change.into, count });
            }
        }
    }
    Ok(())
}

fn assembly_params(config: &SimConfig, material_count: usize) -> AssemblyParams {
    AssemblyParams {
        mass_grid_spacing: config.mass_grid_spacing,
        material_count,
        rb_precision: config.rb_precision(),
        rb_rot_precision: config.rb_rot_precision(),
    }
}

fn spring_allocator(config: &SimConfig, layout: &GridLayout) -> SpringAllocator {
    let per_particle = if config.simulate_springs { config.max_springs_per_particle as usize } else { 0 };
    SpringAllocator::new(layout.cell_count() as usize, config.max_particles as usize, per_particle)
}

/// Drives a [`SimulationState`] frame by frame.
#[derive(Debug)]
pub struct SimulationScheduler {
    state: SimulationState,
    pending: Vec<ParticleSpawn>,
    /// The grid reflects the current particle set for this outer step.
    sorted: bool,
    pointer: PointerLatch,
    pointer_sample: PointerSample,
    pointer_veto: bool,
    compositor: RenderCompositor,
    requests: PoseRequests,
    stats: FrameStats,
}

impl SimulationScheduler {
    pub fn new(config: SimConfig, scene: Scene, textures: &[(String, RgbaImage)]) -> Result<Self, SimulationError> {
        let state = SimulationState::new(config, scene, textures)?;
        Ok(Self::from_state(state))
    }

    pub fn from_state(state: SimulationState) -> Self {
        Self {
            compositor: RenderCompositor::new(state.config.resolution),
            state,
            pending: Vec::new(),
            sorted: false,
            pointer: PointerLatch::new(),
            pointer_sample: PointerSample::default(),
            pointer_veto: false,
            requests: PoseRequests::new(),
            stats: FrameStats::default(),
        }
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn config(&self) -> &SimConfig {
        &self.state.config
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn compositor(&self) -> &RenderCompositor {
        &self.compositor
    }

    /// Last presented colour buffer, rows bottom-up.
    pub fn output(&self) -> &[Vec4] {
        self.compositor.output()
    }

    pub fn output_size(&self) -> UVec2 {
        self.compositor.frame().size()
    }

    pub fn to_image(&self) -> RgbaImage {
        self.compositor.to_image()
    }

    pub fn pointer(&self) -> &PointerLatch {
        &self.pointer
    }

    /// Whether the next outer step will resort.
    pub fn needs_resort(&self) -> bool {
        !self.sorted
    }

    /// Queue particles for the start of the next frame.
    pub fn submit<I: IntoIterator<Item = ParticleSpawn>>(&mut self, spawns: I) {
        self.pending.extend(spawns);
    }

    pub fn pending_spawns(&self) -> usize {
        self.pending.len()
    }

    /// Latest raw pointer sample. Latched once per frame.
    pub fn set_pointer(&mut self, sample: PointerSample, veto: bool) {
        self.pointer_sample = sample;
        self.pointer_veto = veto;
    }

    /// The returned receiver gets the body poses at the end of the next frame.
    pub fn request_pose_snapshot(&mut self) -> Receiver<PoseSnapshot> {
        self.requests.request()
    }

    /// Simulate and render one frame. `frame_time` is the wall time since
    /// the previous frame and only matters in dynamic time-step mode.
    pub fn run_frame(&mut self, frame_time: f32) {
        self.merge_spawns();
        self.pointer.update(self.pointer_sample, self.pointer_veto);

        let config = &self.state.config;
        let dt = crate::time::substep_delta(config, frame_time);
        let outer = config.time_steps_per_frame.max(1);
        let sub = config.sub_steps_per_frame.max(1);

        for i in 0..outer {
            if !self.sorted {
                self.resort();
            }
            if i == 0 {
                self.render();
            }
            for j in 0..sub {
                self.sub_step(dt, j == 0);
            }
            self.sorted = false;
            self.stats.outer_steps += 1;
        }

        if self.requests.pending() > 0 {
            let snapshot = self.state.pose_snapshot();
            self.requests.fulfil(&snapshot);
        }
        self.stats.frames += 1;
    }

    fn merge_spawns(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let remaining = self.state.remaining_capacity();
        let take = self.pending.len().min(remaining);
        let dropped = self.pending.len() - take;
        if dropped > 0 {
            log::debug!(
                "Particle capacity {} reached, dropped {} spawns",
                self.state.config.max_particles,
                dropped
            );
            self.stats.dropped_spawns += dropped as u64;
        }

        let mut added = 0;
        for spawn in self.pending.drain(..).take(take) {
            if self.state.push_particle(&spawn) {
                added += 1;
            }
        }
        if added > 0 {
            self.stats.injected += added;
            self.sorted = false;
        }
    }

    fn resort(&mut self) {
        let state = &mut self.state;
        if state.particles.is_empty() {
            return;
        }
        state.grid.rebuild(&state.particles);
        self.stats.grid_rebuilds += 1;
        if state.config.simulate_springs {
            state.springs.allocate(&state.grid.cell_counts());
            self.stats.spring_allocations += 1;
        }
        state.orders = state.grid.cell_orders();
        self.sorted = true;
    }

    fn render(&mut self) {
        let state = &mut self.state;
        rigid_kernels::transform_vertices(&state.bodies, &state.vertices, &mut state.world_vertices);
        let scene = RenderScene {
            particles: &state.particles,
            types: &state.types,
            pack: state.pack,
            grid: &state.grid,
            bodies: &state.bodies,
            world_vertices: &state.world_vertices,
            materials: &state.materials,
            sensors: &state.sensors,
        };
        self.compositor.render(&scene, &state.config);
        self.stats.renders += 1;
    }

    fn sub_step(&mut self, dt: f32, transfer: bool) {
        let state = &mut self.state;
        let fluid_params =
            FluidParams::new(&state.config, dt, state.pack, PointerForce::for_particles(&state.config, &self.pointer));

        if !state.particles.is_empty() {
            fluid::predict(&mut state.particles, &state.types, &fluid_params);
            fluid::compute_densities(&mut state.particles, &state.grid, &state.types, &fluid_params);
            let springs = state.config.simulate_springs;
            if transfer {
                if springs {
                    state.springs.transfer(&state.particles, state.grid.entries(), state.pack);
                    self.stats.spring_transfers += 1;
                }
                fluid::record_cells(&mut state.particles, &state.orders, state.pack);
            }
            if springs {
                fluid::update_springs(&state.particles, &state.grid, &mut state.springs, &state.types, &fluid_params);
            }
            fluid::compute_forces(
                &mut state.particles,
                &state.grid,
                springs.then_some(&state.springs),
                &state.orders,
                &state.types,
                &fluid_params,
            );
            if state.config.simulate_temperature {
                fluid::update_temperatures(&mut state.particles, &state.types, &fluid_params);
            }
            fluid::update_positions(&mut state.particles, &state.types, &fluid_params);
            self.stats.fluid_sub_steps += 1;
        }

        let cadence = state.config.sub_steps_per_rb_update.max(1);
        if !state.bodies.is_empty() && state.step_count % u64::from(cadence) == 0 {
            let rigid_params = RigidParams::new(
                &state.config,
                dt * cadence as f32,
                state.sim_time,
                PointerForce::for_bodies(&state.config, &self.pointer),
            );
            rigid_kernels::transform_vertices(&state.bodies, &state.vertices, &mut state.world_vertices);
            if !state.particles.is_empty() {
                rigid_kernels::particle_body_interaction(
                    &mut state.particles,
                    &state.types,
                    &state.bodies,
                    &state.world_vertices,
                    &state.impulses,
                    &fluid_params,
                    &rigid_params,
                );
            }
            rigid_kernels::body_collisions(&state.bodies, &state.world_vertices, &state.impulses, &rigid_params);
            rigid_kernels::constraints(&mut state.bodies, &state.impulses, &rigid_params);
            state.impulses.apply(&mut state.bodies, &rigid_params);
            rigid_kernels::integrate(&mut state.bodies, &state.vertices, &rigid_params);
            self.stats.rigid_updates += 1;
        }

        state.step_count += 1;
        state.sim_time += dt;
        self.stats.sub_steps += 1;
    }

    /// Apply an edited config. Only what the edit invalidates is rebuilt.
    pub fn on_settings_changed(&mut self, mut config: SimConfig) -> Result<SettingsChange, SimulationError> {
        config.validate();
        let mut change = SettingsChange::default();
        let old = &self.state.config;

        let layout = GridLayout::from_config(&config);
        let regrid = layout != *self.state.grid.layout()
            || config.max_particles != old.max_particles
            || config.max_springs_per_particle != old.max_springs_per_particle
            || config.simulate_springs != old.simulate_springs;
        let reencode = config.precision_particle != old.precision_particle
            || config.precision_rb != old.precision_rb
            || config.precision_rb_rot != old.precision_rb_rot;
        let reassemble = config.mass_grid_spacing != old.mass_grid_spacing;

        if reencode {
            self.reencode_velocities(&config);
            change.velocities_reencoded = true;
        }

        if regrid {
            let state = &mut self.state;
            let capacity = config.max_particles as usize;
            if state.particles.len() > capacity {
                change.particles_truncated = state.particles.len() - capacity;
                log::debug!("Capacity lowered to {}, dropped {} particles", capacity, change.particles_truncated);
                state.particles.truncate(capacity);
            }

            let pack = PackLayout::new(layout.cell_count(), state.types.len() as u32);
            for p in &mut state.particles {
                let ptype = state.pack.ptype(p.packed);
                p.packed = pack.pack(PackedCell { key: 0, ptype, order: 0 });
            }
            state.pack = pack;
            state.grid = GridIndex::new(layout, capacity);
            state.springs = spring_allocator(&config, &layout);
            state.orders.clear();
            change.grid_reallocated = true;
            log::debug!("Grid reallocated: {} cells, capacity {}", layout.cell_count(), capacity);
        }

        self.state.config = config;

        if reassemble {
            self.reassemble_bodies()?;
            change.bodies_reassembled = true;
        }

        self.sorted = false;
        Ok(change)
    }

    fn reencode_velocities(&mut self, config: &SimConfig) {
        let old = &self.state.config;
        let (old_p, new_p) = (old.particle_precision(), config.particle_precision());
        let (old_rb, new_rb) = (old.rb_precision(), config.rb_precision());
        let (old_rot, new_rot) = (old.rb_rot_precision(), config.rb_rot_precision());

        for p in &mut self.state.particles {
            let vel = p.velocity(old_p);
            p.set_velocity(vel, new_p);
        }
        for b in &mut self.state.bodies {
            b.vel_as_int = new_rb.encode2(old_rb.decode2(b.vel_as_int));
            b.rot_vel_as_int = new_rot.encode(old_rot.decode(b.rot_vel_as_int));
        }
    }

    /// Reassemble every body from its description while keeping the live pose
    /// and velocity of each one.
    fn reassemble_bodies(&mut self) -> Result<Vec<AssemblyWarning>, SimulationError> {
        let state = &mut self.state;
        let params = assembly_params(&state.config, state.materials.len());
        let assembled = assemble(&state.body_descs, &params, &mut state.mass_cache)?;

        let mut bodies = assembled.bodies;
        for (new, old) in bodies.iter_mut().zip(&state.bodies) {
            new.pos = old.pos;
            new.rotation = old.rotation;
            new.vel_as_int = old.vel_as_int;
            new.rot_vel_as_int = old.rot_vel_as_int;
        }
        state.impulses = ImpulseAccumulator::new(bodies.len());
        state.bodies = bodies;
        state.vertices = assembled.vertices;
        rigid_kernels::transform_vertices(&state.bodies, &state.vertices, &mut state.world_vertices);
        Ok(assembled.warnings)
    }

    /// Replace the material table. Particle type and body material indices
    /// are checked against the new table first; on error nothing changes.
    pub fn on_materials_changed(
        &mut self,
        materials: Vec<Material>,
        textures: &[(String, RgbaImage)],
    ) -> Result<BufferUpdate, SimulationError> {
        let count = materials.len();
        check_type_materials(&self.state.types, count)?;
        for desc in &self.state.body_descs {
            for index in [desc.material, desc.spring_material].into_iter().flatten() {
                if index >= count {
                    return Err(SceneError::MaterialOutOfRange { name: desc.name.clone(), index, count }.into());
                }
            }
        }

        let update = self.state.materials.rebuild(materials, textures);
        log::debug!("Materials changed: {:?}, {} materials", update, count);
        Ok(update)
    }
}
