//! Headless demo: simulates a dam break around a few bodies and writes the
//! last frame to a PNG.
//!
//! ```text
//! whirl [config.json] [frames] [out.png]
//! ```

use std::path::PathBuf;

use whirl::prelude::*;

fn demo_scene(config: &SimConfig) -> Scene {
    let bounds = config.bounds_f32();
    // Ice, water and steam at 0..3, slime at 3.
    let water = ParticleType { material: Some(0), ..Default::default() };
    let ice = ParticleType { viscosity: 2.0, ..ParticleType::elastic(1) };
    let steam = ParticleType { gravity: -2.0, pressure: 10.0, target_density: 0.5, ..water.clone() };
    let states = ParticleType::phase_states(0, ZERO_CELSIUS, ZERO_CELSIUS + 100.0, [
        ParticleType { material: Some(0), ..ice },
        water,
        steam,
    ]);
    let slime = ParticleType { material: Some(1), ..ParticleType::elastic(0) };

    let mut particles = Vec::new();
    let spacing = 0.5;
    let cols = (bounds.x * 0.3 / spacing) as usize;
    for i in 0..(config.max_starting_particles as usize) {
        let x = 2.0 + (i % cols) as f32 * spacing;
        let y = 2.0 + (i / cols) as f32 * spacing;
        if y > bounds.y - 2.0 {
            break;
        }
        let ptype = if i % 7 == 0 { 3 } else { 1 };
        // The bottom rows start near boiling.
        let temperature = if y < 4.0 { ZERO_CELSIUS + 99.0 } else { ROOM_TEMPERATURE };
        particles.push(ParticleSpawn { temperature, ..ParticleSpawn::at(Vec2::new(x, y), ptype) });
    }

    let floor = RigidBodyDesc {
        can_move: false,
        material: Some(2),
        ..RigidBodyDesc::rect("shelf", Vec2::new(bounds.x * 0.6, bounds.y * 0.35), Vec2::new(bounds.x * 0.25, 2.0))
    };
    let crate_body = RigidBodyDesc {
        material: Some(3),
        ..RigidBodyDesc::rect("crate", Vec2::new(bounds.x * 0.62, bounds.y * 0.6), Vec2::splat(6.0))
    };
    let lamp = RigidBodyDesc {
        material: Some(3),
        spring_material: Some(2),
        link: LinkDesc::Spring {
            target: Some("shelf".to_string()),
            rest_length: RestLength::Auto,
            stiffness: 60.0,
            damping: 2.0,
            anchors: LinkAnchors::default(),
        },
        ..RigidBodyDesc::rect("lamp", Vec2::new(bounds.x * 0.8, bounds.y * 0.75), Vec2::new(3.0, 3.0))
    };
    let piston = RigidBodyDesc {
        motor: Some(LinearMotor {
            start: Vec2::new(bounds.x * 0.9, bounds.y * 0.15),
            end: Vec2::new(bounds.x * 0.9, bounds.y * 0.3),
            speed: 0.25,
            time_offset: 0.0,
            round_trip: true,
        }),
        material: Some(2),
        ..RigidBodyDesc::rect("piston", Vec2::ZERO, Vec2::new(4.0, 2.0))
    };

    Scene {
        particle_types: states.into_iter().chain([slime]).collect(),
        particles,
        bodies: vec![floor, crate_body, lamp, piston],
        materials: vec![
            Material::flat("water", Vec3::new(0.2, 0.45, 0.85)),
            Material::flat("slime", Vec3::new(0.4, 0.8, 0.3)),
            Material { edge_color: Some(Vec3::splat(0.1)), ..Material::flat("steel", Vec3::new(0.55, 0.57, 0.6)) },
            Material { edge_color: Some(Vec3::new(0.3, 0.2, 0.1)), ..Material::flat("wood", Vec3::new(0.7, 0.5, 0.3)) },
        ],
        sensors: vec![SensorArea {
            min: Vec2::new(bounds.x * 0.85, 0.0),
            max: bounds,
            tint: Vec4::new(1.0, 0.8, 0.2, 1.0),
            stripes: Some(2.0),
        }],
    }
}

fn run() -> Result<(), SimulationError> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) if path != "-" => SimConfig::from_json_file(&path)?,
        _ => SimConfig { max_particles: 4000, max_starting_particles: 3000, ..Default::default() },
    };
    let frames: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(180);
    let out = PathBuf::from(args.next().unwrap_or_else(|| "whirl.png".to_string()));

    let scene = demo_scene(&config);
    let mut scheduler = SimulationScheduler::new(config, scene, &[])?;
    let poses = scheduler.request_pose_snapshot();

    let mut clock = FrameClock::new();
    for frame in 0..frames {
        scheduler.run_frame(clock.tick());
        if frame % 60 == 0 {
            log::info!("frame {} at {:.1} fps", frame, clock.fps());
        }
    }

    if let Ok(snapshot) = poses.try_recv() {
        for (body, pose) in scheduler.state().bodies.iter().zip(&snapshot.poses) {
            log::debug!("{} after first frame: {:?}", body.name, pose);
        }
    }

    let stats = scheduler.stats();
    log::info!(
        "{} frames, {} sub-steps, {} sorts, {} rigid updates, {} spawns dropped",
        stats.frames,
        stats.sub_steps,
        stats.grid_rebuilds,
        stats.rigid_updates,
        stats.dropped_spawns
    );

    scheduler.to_image().save(&out)?;
    log::info!("Wrote {}", out.display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
