use std::sync::Arc;

use substrate_core::{
    Entity, EntityId, Int, Momentum, Position, SubstrateError, TickSummary, Universe,
    UniverseConfig, Vector, neighborhood,
};

/// A dense 7x7 block of entities with mixed costs and headings. Every fifth
/// entity is long overdue, so the first tick divides it and the children
/// immediately crowd into their neighbours.
fn crowded(workers: usize) -> Universe {
    let mut universe = Universe::unseeded(UniverseConfig {
        worker_threads: Some(workers),
        ..UniverseConfig::default()
    })
    .expect("universe");
    let headings = neighborhood(2);
    let mut ordinal = 0_u64;
    for x in -3_i64..=3 {
        for y in -3_i64..=3 {
            let cost = 1 + (x * 3 + y * 5).rem_euclid(7);
            let birth = if ordinal % 5 == 0 { -400 } else { 1 };
            let heading = headings[(ordinal as usize) % headings.len()].clone();
            let entity = Entity::new(
                EntityId::primordial(ordinal),
                Int::from(birth),
                Int::zero(),
                Position::from_i64s(&[x, y]),
                Momentum::new(Int::from(cost), heading).expect("momentum"),
            )
            .expect("entity");
            universe.spawn(entity).expect("spawn");
            ordinal += 1;
        }
    }
    universe
}

fn run(workers: usize, ticks: u64) -> (Vec<TickSummary>, Vec<Arc<Entity>>) {
    let mut universe = crowded(workers);
    universe.run_ticks(ticks).expect("run");
    (universe.history().cloned().collect(), universe.snapshot())
}

#[test]
fn parallel_runs_match_sequential_runs() {
    let (history_a, residents_a) = run(1, 60);
    let (history_b, residents_b) = run(4, 60);
    let (history_c, residents_c) = run(4, 60);

    assert_eq!(history_a, history_b);
    assert_eq!(residents_a, residents_b);
    assert_eq!(history_b, history_c);
    assert_eq!(residents_b, residents_c);

    assert!(history_a.iter().any(|summary| summary.divisions > 0));
    assert!(history_a.iter().any(|summary| summary.collisions > 0));
}

#[test]
fn committed_entities_respect_the_speed_limit() {
    let mut universe = crowded(3);
    for _ in 0..40 {
        let summary = universe.step().expect("tick");
        let residents = universe.snapshot();
        assert_eq!(residents.len(), summary.population);
        for entity in &residents {
            assert!(entity.momentum().cost() >= &Int::one());
            assert!(entity.momentum().vector().max_magnitude() <= Int::one());
            assert!(entity.energy_at(&summary.tick).expect("energy") >= Int::zero());
        }
        let mut positions: Vec<_> = residents.iter().map(|e| e.position().clone()).collect();
        positions.dedup();
        assert_eq!(positions.len(), residents.len(), "positions are exclusive");
    }
}

#[test]
fn seed_walks_one_cell_per_tick_without_dividing() {
    let mut universe = Universe::new(UniverseConfig {
        worker_threads: Some(2),
        ..UniverseConfig::default()
    })
    .expect("universe");
    universe.run_ticks(200).expect("run");
    assert_eq!(universe.tick(), Int::from(201));
    let residents = universe.snapshot();
    assert_eq!(residents.len(), 1);
    assert_eq!(residents[0].position(), &Position::from_i64s(&[199, 0]));
    assert_eq!(residents[0].id(), &EntityId::primordial(0));
    assert!(universe.history().all(|summary| summary.divisions == 0));
}

#[test]
fn overdue_spatial_entity_divides_into_full_neighbourhood() {
    let mut universe = Universe::unseeded(UniverseConfig {
        dimensions: 3,
        worker_threads: Some(2),
        history_capacity: 1,
        ..UniverseConfig::default()
    })
    .expect("universe");
    let parent = Entity::new(
        EntityId::primordial(0),
        Int::from(-10_000),
        Int::zero(),
        Position::origin(3),
        Momentum::new(Int::from(200), Vector::unit(3, 0)).expect("momentum"),
    )
    .expect("entity");
    // 26 children at 201 plus directional penalties summing to 78
    assert_eq!(
        universe.rules().threshold(&parent).expect("threshold"),
        Int::from(26 * 201 + 78)
    );
    universe.spawn(parent).expect("spawn");
    universe.run_until(&Int::one()).expect("run");
    let summary = universe.history().last().cloned().expect("summary");
    assert_eq!(summary.tick, Int::one());
    assert_eq!(summary.divisions, 1);
    assert_eq!(summary.births, 26);
    assert_eq!(universe.population(), 26);

    let leading = universe
        .registry()
        .get(&Position::from_i64s(&[1, 0, 0]))
        .expect("leading child");
    let trailing = universe
        .registry()
        .get(&Position::from_i64s(&[-1, 0, 0]))
        .expect("trailing child");
    assert_eq!(leading.momentum().cost(), &Int::from(201));
    assert!(trailing.momentum().cost() > leading.momentum().cost());
    assert_eq!(leading.momentum().vector(), &Vector::from_i64s(&[1, 0, 0]));
}

#[test]
fn snapshot_rows_serialise_as_json() {
    let mut universe = crowded(2);
    universe.run_ticks(3).expect("run");
    let records = universe.records().expect("records");
    assert_eq!(records.len(), universe.population());
    let json = serde_json::to_string(&records).expect("serialise");
    let back: Vec<substrate_core::EntityRecord> = serde_json::from_str(&json).expect("parse");
    assert_eq!(back, records);
}

#[test]
fn run_until_past_tick_is_a_no_op() {
    let mut universe = crowded(2);
    universe.run_ticks(4).expect("run");
    universe.run_until(&Int::from(2)).expect("no-op");
    assert_eq!(universe.tick(), Int::from(5));
    assert!(!matches!(
        universe.step(),
        Err(SubstrateError::Halted { .. })
    ));
}
