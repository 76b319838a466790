//! Ordered draw passes and the final composite.
//!
//! Every pass shades the shared colour buffer pixel by pixel. Passes that
//! cast shadows also raise the shadow source, which the shadow pipeline
//! reads once all passes have run.

use glam::{UVec2, Vec2, Vec3, Vec4};
use image::RgbaImage;

use super::framebuffer::{to_rgba_image, Framebuffer};
use super::shadow::{ShadowParams, ShadowPipeline};
use super::{RenderStep, SensorArea};
use crate::config::SimConfig;
use crate::grid::GridIndex;
use crate::material::MaterialTable;
use crate::particle::{PackLayout, Particle, ParticleType};
use crate::rigid::path::{closest_edge_point, closest_on_segment, contains_point};
use crate::rigid::{Constraint, RigidBody};

const DEFAULT_FLUID_COLOR: Vec3 = Vec3::new(0.2, 0.5, 0.9);
const DEFAULT_BODY_COLOR: Vec3 = Vec3::new(0.75, 0.75, 0.72);
const DEFAULT_SPRING_COLOR: Vec3 = Vec3::new(0.9, 0.9, 0.9);

/// Everything a frame draws, borrowed from the simulation state.
pub struct RenderScene<'a> {
    pub particles: &'a [Particle],
    pub types: &'a [ParticleType],
    pub pack: PackLayout,
    pub grid: &'a GridIndex,
    pub bodies: &'a [RigidBody],
    /// World positions of every body vertex.
    pub world_vertices: &'a [Vec2],
    pub materials: &'a MaterialTable,
    pub sensors: &'a [SensorArea],
}

#[derive(Debug)]
pub struct RenderCompositor {
    frame: Framebuffer,
    output: Vec<Vec4>,
    shadows: ShadowPipeline,
    frames: u64,
}

impl RenderCompositor {
    pub fn new(resolution: UVec2) -> Self {
        Self {
            frame: Framebuffer::new(resolution),
            output: Vec::new(),
            shadows: ShadowPipeline::new(),
            frames: 0,
        }
    }

    pub fn frame(&self) -> &Framebuffer {
        &self.frame
    }

    /// The composited frame, rows bottom to top.
    pub fn output(&self) -> &[Vec4] {
        &self.output
    }

    pub fn shadows(&self) -> &ShadowPipeline {
        &self.shadows
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn to_image(&self) -> RgbaImage {
        to_rgba_image(&self.output, self.frame.size())
    }

    /// Run the configured passes, then shadows or the plain copy.
    pub fn render(&mut self, scene: &RenderScene, config: &SimConfig) -> &[Vec4] {
        if self.frame.resize(config.resolution) {
            log::debug!("Framebuffer resized to {}x{}", config.resolution.x, config.resolution.y);
        }
        self.frame.shadow_source.fill(0.0);

        let to_world = config.bounds_f32() / config.resolution.max(UVec2::ONE).as_vec2();
        for step in &config.render_order {
            self.draw(*step, scene, config, to_world);
        }

        self.shadows.run(&self.frame, &ShadowParams::from_config(config), &mut self.output);
        self.frames += 1;
        &self.output
    }

    fn draw(&mut self, step: RenderStep, scene: &RenderScene, config: &SimConfig, to_world: Vec2) {
        let world = |p: UVec2| (p.as_vec2() + 0.5) * to_world;
        match step {
            RenderStep::Background => {
                let bg = Vec3::from_array(config.background_color).extend(1.0);
                self.frame.shade(|_| Some((bg, 0.0)));
            }
            RenderStep::Fluids => {
                let shadow = config.liquid_shadow_strength;
                self.frame.shade(|p| shade_fluid(scene, config, world(p), shadow));
            }
            RenderStep::RigidBodies => {
                let mut order: Vec<&RigidBody> = scene.bodies.iter().filter(|b| b.render.priority.is_some()).collect();
                order.sort_by_key(|b| b.render.priority);
                let shadow = config.rb_shadow_strength;
                self.frame.shade(|p| shade_bodies(scene, &order, config, world(p), shadow));
            }
            RenderStep::RigidBodySprings => {
                let springs: Vec<(Vec2, Vec2, Option<usize>)> = scene
                    .bodies
                    .iter()
                    .filter_map(|b| {
                        let material = b.render.spring_material;
                        match b.constraint {
                            Constraint::Spring { target, anchors, .. } if material.is_some() => {
                                let other = scene.bodies.get(target)?;
                                Some((b.to_world(anchors.this), other.to_world(anchors.other), material))
                            }
                            _ => None,
                        }
                    })
                    .collect();
                if springs.is_empty() {
                    return;
                }
                let half_width = config.spring_render_width * 0.5;
                let shadow = config.rb_shadow_strength;
                self.frame.shade(|p| {
                    let w = world(p);
                    springs.iter().find_map(|(a, b, material)| {
                        (closest_on_segment(*a, *b, w).distance(w) <= half_width).then(|| {
                            let color = material.map_or(DEFAULT_SPRING_COLOR.extend(1.0), |m| scene.materials.sample(m, w));
                            (color, shadow)
                        })
                    })
                });
            }
            RenderStep::Ui => {
                let strength = config.sensor_tint_strength;
                self.frame.shade(|p| {
                    let w = world(p);
                    scene.sensors.iter().find_map(|s| {
                        let weight = s.weight(w);
                        (weight > 0.0).then(|| (s.tint.truncate().extend(s.tint.w * weight * strength), 0.0))
                    })
                });
            }
        }
    }
}

/// Metaball field of nearby particles. The colour follows the particle that
/// contributes most.
fn shade_fluid(scene: &RenderScene, config: &SimConfig, w: Vec2, shadow: f32) -> Option<(Vec4, f32)> {
    let r = config.fluid_render_radius;
    let reach = (2.0 * r).min(scene.grid.layout().cell_size);
    let mut field = 0.0f32;
    let mut strongest: Option<(f32, usize)> = None;
    for j in scene.grid.neighbours(w) {
        let Some(p) = scene.particles.get(j as usize) else {
            continue;
        };
        let d2 = p.pos.distance_squared(w);
        if d2 >= reach * reach {
            continue;
        }
        let contribution = r * r / d2.max(1e-6);
        field += contribution;
        if strongest.map_or(true, |(c, _)| contribution > c) {
            strongest = Some((contribution, j as usize));
        }
    }
    if field < config.metaball_threshold {
        return None;
    }
    let (_, index) = strongest?;
    let t = scene.pack.ptype(scene.particles[index].packed) as usize;
    let ptype = scene.types.get(t);
    let color = match ptype.and_then(|t| t.material) {
        Some(m) => scene.materials.sample(m, w),
        None => DEFAULT_FLUID_COLOR.extend(1.0),
    };
    Some((color, shadow * ptype.map_or(1.0, |t| t.shadow_strength)))
}

/// Topmost body covering `w`, with its edge band.
fn shade_bodies(
    scene: &RenderScene,
    order: &[&RigidBody],
    config: &SimConfig,
    w: Vec2,
    shadow: f32,
) -> Option<(Vec4, f32)> {
    order.iter().rev().find_map(|body| {
        if body.pos.distance_squared(w) > body.bounding_radius_sqr {
            return None;
        }
        let paths: Vec<&[Vec2]> = body.paths.iter().map(|r| &scene.world_vertices[r.clone()]).collect();
        if !contains_point(&paths, w) {
            return None;
        }
        let local = Vec2::from_angle(-body.rotation).rotate(w - body.pos);
        let edge = body.render.material.and_then(|m| scene.materials.edge_color(m));
        if let Some(edge) = edge {
            let near_edge = closest_edge_point(&paths, w).is_some_and(|(_, d2)| d2.sqrt() <= config.rb_edge_width);
            if near_edge {
                return Some((edge.extend(1.0), shadow));
            }
        }
        let color = match body.render.material {
            Some(m) => scene.materials.sample(m, local),
            None => DEFAULT_BODY_COLOR.extend(1.0),
        };
        Some((color, shadow))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridLayout;
    use crate::kernels::rigid::transform_vertices;
    use crate::material::Material;
    use crate::render::ShadowType;
    use crate::rigid::{assemble, AssemblyParams, MassCache, RigidBodyDesc};

    fn config() -> SimConfig {
        SimConfig {
            boundary_dims: UVec2::new(40, 20),
            resolution: UVec2::new(40, 20),
            shadow_type: ShadowType::None,
            ..Default::default()
        }
    }

    struct Fixture {
        particles: Vec<Particle>,
        types: Vec<ParticleType>,
        pack: PackLayout,
        grid: GridIndex,
        bodies: Vec<RigidBody>,
        world: Vec<Vec2>,
        materials: MaterialTable,
    }

    fn fixture(config: &SimConfig) -> Fixture {
        let layout = GridLayout::from_config(config);
        let pack = PackLayout::new(layout.cell_count(), 1);
        let particles: Vec<Particle> = (0..9)
            .map(|i| Particle::new(Vec2::new(5.0 + (i % 3) as f32 * 0.5, 5.0 + (i / 3) as f32 * 0.5), 0, pack))
            .collect();
        let mut grid = GridIndex::new(layout, particles.len());
        grid.rebuild(&particles);

        let materials = MaterialTable::build(
            vec![Material { edge_color: Some(Vec3::ZERO), ..Material::flat("red", Vec3::X) }],
            &[],
        );
        let assembly = AssemblyParams {
            mass_grid_spacing: 0.5,
            material_count: materials.len(),
            rb_precision: config.rb_precision(),
            rb_rot_precision: config.rb_rot_precision(),
        };
        let desc = RigidBodyDesc { material: Some(0), ..RigidBodyDesc::rect("box", Vec2::new(30.0, 10.0), Vec2::splat(6.0)) };
        let bodies = assemble(&[desc], &assembly, &mut MassCache::new()).expect("scene assembles");
        let mut world = Vec::new();
        transform_vertices(&bodies.bodies, &bodies.vertices, &mut world);

        Fixture { particles, types: vec![ParticleType::default()], pack, grid, bodies: bodies.bodies, world, materials }
    }

    fn scene(f: &Fixture) -> RenderScene<'_> {
        RenderScene {
            particles: &f.particles,
            types: &f.types,
            pack: f.pack,
            grid: &f.grid,
            bodies: &f.bodies,
            world_vertices: &f.world,
            materials: &f.materials,
            sensors: &[],
        }
    }

    #[test]
    fn test_passes_draw_in_order() {
        let config = config();
        let f = fixture(&config);
        let mut compositor = RenderCompositor::new(config.resolution);
        let out = compositor.render(&scene(&f), &config).to_vec();
        let at = |x: u32, y: u32| out[(y * 40 + x) as usize];

        let bg = Vec3::from_array(config.background_color);
        assert!((at(1, 18).truncate() - bg).length() < 1e-6);
        // Fluid blob around (5.5, 5.5).
        assert!((at(5, 5).truncate() - DEFAULT_FLUID_COLOR).length() < 1e-6);
        // Body interior is the material colour, its border the edge colour.
        assert!((at(30, 10).truncate() - Vec3::X).length() < 1e-6);
        assert!(at(27, 10).truncate().length() < 1e-6);
    }

    #[test]
    fn test_shadow_source_only_from_casters() {
        let config = config();
        let f = fixture(&config);
        let mut compositor = RenderCompositor::new(config.resolution);
        compositor.render(&scene(&f), &config);
        let src = &compositor.frame().shadow_source;
        assert_eq!(src.get(1, 18), 0.0);
        assert!(src.get(30, 10) > 0.0);
        assert!(src.get(5, 5) > 0.0);
    }

    #[test]
    fn test_disabled_body_is_not_drawn() {
        let config = config();
        let mut f = fixture(&config);
        f.bodies[0].render.priority = None;
        let mut compositor = RenderCompositor::new(config.resolution);
        let out = compositor.render(&scene(&f), &config).to_vec();
        let bg = Vec3::from_array(config.background_color);
        assert!((out[(10 * 40 + 30) as usize].truncate() - bg).length() < 1e-6);
    }

    #[test]
    fn test_ui_tints_last() {
        let config = config();
        let f = fixture(&config);
        let sensors = [SensorArea { min: Vec2::new(28.0, 8.0), max: Vec2::new(32.0, 12.0), tint: Vec4::new(0.0, 1.0, 0.0, 1.0), stripes: None }];
        let mut compositor = RenderCompositor::new(config.resolution);
        let out = compositor.render(&RenderScene { sensors: &sensors, ..scene(&f) }, &config).to_vec();
        let c = out[(10 * 40 + 30) as usize];
        assert!(c.y > 0.0 && c.x < 1.0);
    }

    #[test]
    fn test_shadows_darken_below_body() {
        let config = SimConfig { shadow_type: ShadowType::VerticalSharp, shadow_falloff: 0.0, ..config() };
        let f = fixture(&config);
        let mut compositor = RenderCompositor::new(config.resolution);
        let out = compositor.render(&scene(&f), &config).to_vec();
        let bg = Vec3::from_array(config.background_color);
        let below = out[(2 * 40 + 30) as usize].truncate();
        assert!(below.x < bg.x);
        assert_eq!(compositor.shadows().reallocations(), 1);

        compositor.render(&scene(&f), &config);
        assert_eq!(compositor.shadows().reallocations(), 1);
        assert_eq!(compositor.frames_rendered(), 2);
    }
}
