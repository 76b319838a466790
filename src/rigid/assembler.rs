//! Scene rigid-body descriptions to simulation arrays.
//!
//! Assembly runs whenever the scene is loaded or bodies change. For each body
//! it cleans and subdivides the polygon paths, integrates centroid and
//! inertia, recentres the vertices on the centroid and resolves the link
//! target by name. Problems with links are not fatal: they are reported as
//! [`AssemblyWarning`]s, logged, and the link is dropped.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::body::{BodyRender, Constraint, LinearMotor, LinkAnchors, Motion, RbVertexData, RigidBody, RigidBodyVertex};
use super::mass::MassCache;
use super::path::{encode_paths, remove_adjacent_duplicates, snap, subdivide, Subdivision};
use crate::error::SceneError;

/// Rest length of a link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum RestLength {
    /// Distance between the anchors at assembly time.
    #[default]
    Auto,
    Fixed(f32),
}

/// Authoring form of a link. `target` names another body.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum LinkDesc {
    #[default]
    None,
    /// A stiffness of zero makes the link rigid.
    Spring {
        target: Option<String>,
        rest_length: RestLength,
        stiffness: f32,
        damping: f32,
        anchors: LinkAnchors,
    },
    Rigid {
        target: Option<String>,
        rest_length: RestLength,
        anchors: LinkAnchors,
    },
}

/// Scene description of one rigid body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyDesc {
    pub name: String,
    /// Origin of the local frame the paths are given in.
    pub pos: Vec2,
    pub rotation: f32,
    pub paths: Vec<Vec<Vec2>>,
    pub subdivision: Subdivision,
    pub can_move: bool,
    pub mass: f32,
    /// Replaces free motion with a driven line. Ignores `can_move`.
    pub motor: Option<LinearMotor>,
    pub link: LinkDesc,
    pub gravity: f32,
    pub rb_elasticity: Option<f32>,
    pub fluid_elasticity: f32,
    pub friction: f32,
    pub passive_damping: f32,
    pub interactable: bool,
    pub start_velocity: Vec2,
    pub start_rot_velocity: f32,
    pub material: Option<usize>,
    pub spring_material: Option<usize>,
    pub render_priority: u32,
    pub disable_render: bool,
    pub disable_spring_render: bool,
}

impl Default for RigidBodyDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            pos: Vec2::ZERO,
            rotation: 0.0,
            paths: Vec::new(),
            subdivision: Subdivision::None,
            can_move: true,
            mass: 1.0,
            motor: None,
            link: LinkDesc::None,
            gravity: 9.82,
            rb_elasticity: Some(0.2),
            fluid_elasticity: 0.2,
            friction: 0.1,
            passive_damping: 0.0,
            interactable: true,
            start_velocity: Vec2::ZERO,
            start_rot_velocity: 0.0,
            material: None,
            spring_material: None,
            render_priority: 0,
            disable_render: false,
            disable_spring_render: false,
        }
    }
}

impl RigidBodyDesc {
    /// An axis-aligned box centred on `pos`.
    pub fn rect(name: &str, pos: Vec2, size: Vec2) -> Self {
        let h = size * 0.5;
        Self {
            name: name.to_string(),
            pos,
            paths: vec![vec![
                Vec2::new(-h.x, -h.y),
                Vec2::new(h.x, -h.y),
                Vec2::new(h.x, h.y),
                Vec2::new(-h.x, h.y),
            ]],
            ..Default::default()
        }
    }
}

/// A configuration problem that was recovered from.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum AssemblyWarning {
    #[error("Rigid body '{body}' has a link with no target; link removed")]
    UnsetLinkTarget { body: String },
    #[error("Rigid body '{body}' links to unknown body '{target}'; link removed")]
    UnknownLinkTarget { body: String, target: String },
    #[error("Rigid body '{body}' links to itself; link removed")]
    SelfLink { body: String },
    #[error("Rigid body '{body}' has a zero rest length; spring not drawn")]
    ZeroRestLength { body: String },
    #[error("Rigid body '{body}' has no interior at grid spacing {spacing}; treated as static")]
    NoInterior { body: String, spacing: f32 },
}

/// Assembler parameters.
#[derive(Clone, Copy, Debug)]
pub struct AssemblyParams {
    pub mass_grid_spacing: f32,
    pub material_count: usize,
    pub rb_precision: crate::fixed::Precision,
    pub rb_rot_precision: crate::fixed::Precision,
}

/// Output of [`assemble`].
#[derive(Clone, Debug, Default)]
pub struct AssembledBodies {
    pub bodies: Vec<RigidBody>,
    pub vertices: Vec<RigidBodyVertex>,
    pub warnings: Vec<AssemblyWarning>,
}

impl AssembledBodies {
    /// Flat GPU vertex buffer with path flags applied.
    pub fn wire_vertices(&self) -> Vec<RbVertexData> {
        let mut out = Vec::with_capacity(self.vertices.len());
        for (index, body) in self.bodies.iter().enumerate() {
            let paths: Vec<Vec<Vec2>> = body
                .paths
                .iter()
                .map(|r| self.vertices[r.clone()].iter().map(|v| v.local).collect())
                .collect();
            for pos in encode_paths(&paths) {
                out.push(RbVertexData { pos, parent_index: index as i32, _pad: 0 });
            }
        }
        out
    }
}

fn warn(warnings: &mut Vec<AssemblyWarning>, warning: AssemblyWarning) {
    match warning {
        AssemblyWarning::UnsetLinkTarget { .. } => log::error!("{}", warning),
        _ => log::warn!("{}", warning),
    }
    warnings.push(warning);
}

/// Build simulation bodies and the shared vertex buffer.
pub fn assemble(
    descs: &[RigidBodyDesc],
    params: &AssemblyParams,
    cache: &mut MassCache,
) -> Result<AssembledBodies, SceneError> {
    let mut out = AssembledBodies::default();
    cache.begin_generation();

    for (index, desc) in descs.iter().enumerate() {
        for material in [desc.material, desc.spring_material].into_iter().flatten() {
            if material >= params.material_count {
                return Err(SceneError::MaterialOutOfRange {
                    name: desc.name.clone(),
                    index: material,
                    count: params.material_count,
                });
            }
        }

        let paths: Vec<Vec<Vec2>> = desc
            .paths
            .iter()
            .map(|p| remove_adjacent_duplicates(p))
            .filter(|p| p.len() >= 3)
            .map(|p| subdivide(&p, desc.subdivision).into_iter().map(snap).collect())
            .collect();
        if paths.is_empty() {
            return Err(SceneError::EmptyPolygon { name: desc.name.clone() });
        }

        // Motors are not pushed around, so they skip the cache like any other
        // body with no use for inertia.
        let props = if desc.motor.is_some() {
            super::mass::integrate(&paths, params.mass_grid_spacing)
        } else {
            cache.get_or_integrate(&paths, params.mass_grid_spacing)
        };

        let centroid = match props {
            Some(p) => p.centroid,
            None => {
                warn(
                    &mut out.warnings,
                    AssemblyWarning::NoInterior { body: desc.name.clone(), spacing: params.mass_grid_spacing },
                );
                let all: Vec<Vec2> = paths.iter().flatten().copied().collect();
                all.iter().copied().sum::<Vec2>() / all.len() as f32
            }
        };

        let motion = match (desc.motor, desc.can_move, props) {
            (Some(motor), _, _) => Motion::LinearMotor(motor),
            (None, true, Some(p)) => Motion::Dynamic { mass: desc.mass, inertia: p.inertia(desc.mass) },
            _ => Motion::Static,
        };

        let start = out.vertices.len();
        let mut ranges = Vec::with_capacity(paths.len());
        let mut max_r2 = 0.0f32;
        for path in &paths {
            let path_start = out.vertices.len();
            for v in path {
                let local = snap(*v - centroid);
                max_r2 = max_r2.max(local.length_squared());
                out.vertices.push(RigidBodyVertex { local, parent: index as u32 });
            }
            ranges.push(path_start..out.vertices.len());
        }

        let rotation = Vec2::from_angle(desc.rotation);
        let pos = match desc.motor {
            Some(motor) => motor.position(0.0),
            None => desc.pos + rotation.rotate(centroid),
        };

        out.bodies.push(RigidBody {
            name: desc.name.clone(),
            pos,
            rotation: desc.rotation,
            vel_as_int: params.rb_precision.encode2(desc.start_velocity),
            rot_vel_as_int: params.rb_rot_precision.encode(desc.start_rot_velocity),
            motion,
            gravity: desc.gravity,
            rb_elasticity: desc.rb_elasticity,
            fluid_elasticity: desc.fluid_elasticity,
            friction: desc.friction,
            passive_damping: desc.passive_damping,
            interactable: desc.interactable,
            bounding_radius_sqr: max_r2 + 1.0,
            vertices: start..out.vertices.len(),
            paths: ranges,
            constraint: Constraint::None,
            recorded_spring_force: 0.0,
            render: BodyRender {
                priority: (!desc.disable_render).then_some(desc.render_priority),
                material: if desc.disable_render { None } else { desc.material },
                spring_material: if desc.disable_spring_render { None } else { desc.spring_material },
            },
        });
    }

    // Links are resolved once every body has its final frame.
    for (index, desc) in descs.iter().enumerate() {
        let centroid_shift = |i: usize| {
            let body = &out.bodies[i];
            Vec2::from_angle(-body.rotation).rotate(descs[i].pos - body.pos)
        };

        let (target, rest, anchors, kind) = match &desc.link {
            LinkDesc::None => continue,
            LinkDesc::Spring { target, rest_length, stiffness, damping, anchors } => {
                (target, *rest_length, *anchors, Some((*stiffness, *damping)))
            }
            LinkDesc::Rigid { target, rest_length, anchors } => (target, *rest_length, *anchors, None),
        };

        let Some(target_name) = target else {
            warn(&mut out.warnings, AssemblyWarning::UnsetLinkTarget { body: desc.name.clone() });
            continue;
        };
        let Some(target) = descs.iter().position(|d| &d.name == target_name) else {
            warn(
                &mut out.warnings,
                AssemblyWarning::UnknownLinkTarget { body: desc.name.clone(), target: target_name.clone() },
            );
            continue;
        };
        if target == index {
            warn(&mut out.warnings, AssemblyWarning::SelfLink { body: desc.name.clone() });
            continue;
        }

        // Anchors are authored relative to each body's origin; move them into
        // the centroid frame.
        let anchors = LinkAnchors {
            this: anchors.this + centroid_shift(index),
            other: anchors.other + centroid_shift(target),
        };
        let rest_length = match rest {
            RestLength::Fixed(l) => l,
            RestLength::Auto => {
                let a = out.bodies[index].to_world(anchors.this);
                let b = out.bodies[target].to_world(anchors.other);
                a.distance(b)
            }
        };
        if rest_length <= f32::EPSILON {
            warn(&mut out.warnings, AssemblyWarning::ZeroRestLength { body: desc.name.clone() });
            out.bodies[index].render.spring_material = None;
        }

        out.bodies[index].constraint = match kind {
            Some((stiffness, damping)) if stiffness > 0.0 => Constraint::Spring {
                target,
                rest_length,
                stiffness,
                damping,
                anchors,
            },
            _ => Constraint::Rigid { target, rest_length, anchors },
        };
    }

    cache.prune();
    log::info!(
        "Assembled {} rigid bodies with {} vertices ({} warnings)",
        out.bodies.len(),
        out.vertices.len(),
        out.warnings.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::Precision;
    use crate::rigid::path::{decode_paths, is_path_start};

    fn params() -> AssemblyParams {
        AssemblyParams {
            mass_grid_spacing: 0.1,
            material_count: 2,
            rb_precision: Precision(50_000.0),
            rb_rot_precision: Precision(500_000.0),
        }
    }

    fn linked(name: &str, target: Option<&str>) -> RigidBodyDesc {
        RigidBodyDesc {
            link: LinkDesc::Spring {
                target: target.map(str::to_string),
                rest_length: RestLength::Auto,
                stiffness: 10.0,
                damping: 0.5,
                anchors: LinkAnchors::default(),
            },
            ..RigidBodyDesc::rect(name, Vec2::new(10.0, 10.0), Vec2::splat(2.0))
        }
    }

    #[test]
    fn test_recenters_on_centroid() {
        let mut desc = RigidBodyDesc::rect("a", Vec2::new(20.0, 30.0), Vec2::new(4.0, 2.0));
        for v in &mut desc.paths[0] {
            *v += Vec2::new(1.0, 0.0);
        }
        let out = assemble(&[desc], &params(), &mut MassCache::new()).unwrap();
        let body = &out.bodies[0];
        assert!(body.pos.distance(Vec2::new(21.0, 30.0)) < 1e-2);
        let mean: Vec2 = out.vertices.iter().map(|v| v.local).sum::<Vec2>() / 4.0;
        assert!(mean.length() < 1e-2);
        assert!(matches!(body.motion, Motion::Dynamic { .. }));
        assert!(body.bounding_radius_sqr >= 5.0);
    }

    #[test]
    fn test_auto_rest_length_is_live_distance() {
        let a = linked("a", Some("b"));
        let b = RigidBodyDesc::rect("b", Vec2::new(13.0, 14.0), Vec2::splat(2.0));
        let out = assemble(&[a, b], &params(), &mut MassCache::new()).unwrap();
        match out.bodies[0].constraint {
            Constraint::Spring { target, rest_length, .. } => {
                assert_eq!(target, 1);
                assert!((rest_length - 5.0).abs() < 1e-3);
            }
            other => panic!("expected spring, got {:?}", other),
        }
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_unset_and_self_links_degrade() {
        let out = assemble(
            &[linked("a", None), linked("b", Some("b")), linked("c", Some("missing"))],
            &params(),
            &mut MassCache::new(),
        )
        .unwrap();
        assert!(out.bodies.iter().all(|b| b.constraint == Constraint::None));
        assert_eq!(
            out.warnings,
            vec![
                AssemblyWarning::UnsetLinkTarget { body: "a".into() },
                AssemblyWarning::SelfLink { body: "b".into() },
                AssemblyWarning::UnknownLinkTarget { body: "c".into(), target: "missing".into() },
            ]
        );
    }

    #[test]
    fn test_zero_stiffness_is_rigid_and_zero_rest_hides_spring() {
        let mut a = linked("a", Some("b"));
        a.spring_material = Some(1);
        if let LinkDesc::Spring { stiffness, rest_length, .. } = &mut a.link {
            *stiffness = 0.0;
            *rest_length = RestLength::Fixed(0.0);
        }
        let b = RigidBodyDesc::rect("b", Vec2::new(20.0, 10.0), Vec2::splat(2.0));
        let out = assemble(&[a, b], &params(), &mut MassCache::new()).unwrap();
        assert!(matches!(out.bodies[0].constraint, Constraint::Rigid { .. }));
        assert_eq!(out.bodies[0].render.spring_material, None);
        assert_eq!(out.warnings, vec![AssemblyWarning::ZeroRestLength { body: "a".into() }]);
    }

    #[test]
    fn test_disabled_render_keeps_body() {
        let mut a = RigidBodyDesc::rect("a", Vec2::ZERO, Vec2::ONE);
        a.disable_render = true;
        a.material = Some(0);
        let out = assemble(&[a, RigidBodyDesc::rect("b", Vec2::ZERO, Vec2::ONE)], &params(), &mut MassCache::new()).unwrap();
        assert_eq!(out.bodies.len(), 2);
        let wire = out.bodies[0].to_wire();
        assert_eq!(wire.render_priority, -1);
        assert_eq!(wire.mat_index, -1);
        assert_eq!(out.bodies[1].vertices.start, 4);
    }

    #[test]
    fn test_motor_ignores_can_move() {
        let mut a = RigidBodyDesc::rect("motor", Vec2::ZERO, Vec2::ONE);
        a.can_move = false;
        a.motor = Some(LinearMotor {
            start: Vec2::new(5.0, 5.0),
            end: Vec2::new(15.0, 5.0),
            speed: 0.5,
            time_offset: 0.0,
            round_trip: false,
        });
        let out = assemble(&[a], &params(), &mut MassCache::new()).unwrap();
        assert!(matches!(out.bodies[0].motion, Motion::LinearMotor(_)));
        assert_eq!(out.bodies[0].pos, Vec2::new(5.0, 5.0));
        assert_eq!(out.bodies[0].to_wire().mass, -1.0);
    }

    #[test]
    fn test_errors() {
        let empty = RigidBodyDesc { name: "e".into(), ..Default::default() };
        assert_eq!(
            assemble(&[empty], &params(), &mut MassCache::new()).unwrap_err(),
            SceneError::EmptyPolygon { name: "e".into() }
        );
        let mut bad = RigidBodyDesc::rect("m", Vec2::ZERO, Vec2::ONE);
        bad.material = Some(7);
        assert!(matches!(
            assemble(&[bad], &params(), &mut MassCache::new()),
            Err(SceneError::MaterialOutOfRange { index: 7, count: 2, .. })
        ));
    }

    #[test]
    fn test_wire_vertices_flag_second_path() {
        let mut desc = RigidBodyDesc::rect("a", Vec2::ZERO, Vec2::splat(6.0));
        desc.paths.push(vec![Vec2::new(-1.0, -1.0), Vec2::new(1.0, -1.0), Vec2::new(1.0, 1.0), Vec2::new(-1.0, 1.0)]);
        let out = assemble(&[desc], &params(), &mut MassCache::new()).unwrap();
        let wire = out.wire_vertices();
        assert_eq!(wire.len(), 8);
        assert!(is_path_start(wire[4].pos.x));
        let decoded = decode_paths(&wire.iter().map(|v| v.pos).collect::<Vec<_>>());
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1][0], out.vertices[4].local);
    }

    #[test]
    fn test_mass_cache_reused_on_reassembly() {
        let mut cache = MassCache::new();
        let descs = [RigidBodyDesc::rect("a", Vec2::ZERO, Vec2::ONE)];
        assemble(&descs, &params(), &mut cache).unwrap();
        assemble(&descs, &params(), &mut cache).unwrap();
        assert_eq!(cache.hits(), 1);

        // A scene without that shape leaves nothing behind.
        assemble(&[RigidBodyDesc::rect("b", Vec2::ZERO, Vec2::splat(2.0))], &params(), &mut cache).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.misses(), 2);
    }
}
