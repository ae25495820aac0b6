use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use std::time::Duration;
use substrate_core::{
    Entity, EntityId, Int, Momentum, Position, Universe, UniverseConfig, neighborhood,
};

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(fallback)
}

fn populated(side: i64, workers: usize) -> Universe {
    let mut universe = Universe::unseeded(UniverseConfig {
        worker_threads: Some(workers),
        history_capacity: 1,
        ..UniverseConfig::default()
    })
    .expect("universe");
    let headings = neighborhood(2);
    let mut ordinal = 0_u64;
    // Spaced two cells apart so most ticks move rather than collide.
    for x in 0..side {
        for y in 0..side {
            let entity = Entity::new(
                EntityId::primordial(ordinal),
                Int::one(),
                Int::zero(),
                Position::from_i64s(&[x * 2, y * 2]),
                Momentum::new(
                    Int::from(1 + (x + y) % 5),
                    headings[(ordinal as usize) % headings.len()].clone(),
                )
                .expect("momentum"),
            )
            .expect("entity");
            universe.spawn(entity).expect("spawn");
            ordinal += 1;
        }
    }
    universe
}

fn bench_universe_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("universe_step");
    group.sample_size(env_or("SUBSTRATE_BENCH_SAMPLES", 20_usize).max(10));
    group.warm_up_time(Duration::from_secs(env_or("SUBSTRATE_BENCH_WARMUP_SECS", 2)));
    group.measurement_time(Duration::from_secs(env_or("SUBSTRATE_BENCH_MEASURE_SECS", 8)));
    let ticks: u64 = env_or("SUBSTRATE_BENCH_TICKS", 32);
    let workers: usize = env_or("SUBSTRATE_BENCH_WORKERS", 4);

    for side in [16_i64, 48, 96] {
        group.bench_function(format!("ticks{ticks}_entities{}", side * side), |b| {
            b.iter_batched(
                || populated(side, workers),
                |mut universe| universe.run_ticks(ticks).expect("run"),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_universe_steps);
criterion_main!(benches);
