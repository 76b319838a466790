//! Full-frame benchmark: sort, fluid and rigid kernels, render and shadows.
//!
//! Run with: `cargo bench --bench frame`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use whirl::prelude::*;

fn scene(count: usize) -> Scene {
    Scene {
        particles: (0..count)
            .map(|i| ParticleSpawn::at(Vec2::new(4.0 + (i % 100) as f32 * 0.5, 4.0 + (i / 100) as f32 * 0.5), 0))
            .collect(),
        bodies: vec![
            RigidBodyDesc::rect("a", Vec2::new(80.0, 60.0), Vec2::splat(8.0)),
            RigidBodyDesc::rect("b", Vec2::new(110.0, 40.0), Vec2::new(12.0, 4.0)),
        ],
        ..Default::default()
    }
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_frame");
    group.sample_size(10);

    for count in [1_000usize, 5_000] {
        for shadow in [ShadowType::None, ShadowType::DirectionalBlurred] {
            let config = SimConfig {
                max_particles: count as u32,
                max_starting_particles: count as u32,
                shadow_type: shadow,
                ..Default::default()
            };
            let Ok(mut scheduler) = SimulationScheduler::new(config, scene(count), &[]) else {
                continue;
            };
            let id = BenchmarkId::new(format!("{:?}", shadow), count);
            group.bench_function(id, |b| b.iter(|| scheduler.run_frame(1.0 / 60.0)));
        }
    }

    group.finish();
}

criterion_group!(benches, bench_frame);
criterion_main!(benches);
