use substrate_core::{Int, SnapshotSink, Universe, UniverseConfig, UniverseSnapshot};
use substrate_storage::{SnapshotPipeline, SnapshotRow, read_records, read_rows};

#[test]
fn pipeline_exports_every_interval() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("universe.jsonl");
    let pipeline = SnapshotPipeline::with_threshold(&path, 1).expect("pipeline");
    let store = pipeline.store();

    let config = UniverseConfig {
        worker_threads: Some(2),
        snapshot_interval: 4,
        ..UniverseConfig::default()
    };
    {
        let mut universe = Universe::with_sink(config, Box::new(pipeline)).expect("universe");
        universe.run_ticks(12).expect("run");
    }
    // Dropping the universe shuts the worker down after a final flush.
    assert_eq!(store.lock().expect("store lock").pending(), 0);

    let rows = read_rows(&path).expect("rows");
    let summaries: Vec<_> = rows
        .iter()
        .filter_map(|row| match row {
            SnapshotRow::Tick(summary) => Some(summary.tick.clone()),
            SnapshotRow::Entity(_) => None,
        })
        .collect();
    assert_eq!(summaries, vec![Int::from(4), Int::from(8), Int::from(12)]);

    let records = read_records(&path).expect("records");
    assert_eq!(records.len(), 3);
    let last = records.last().expect("last record");
    assert_eq!(last.tick, Int::from(12));
    assert_eq!(last.energy, Int::zero());
    assert_eq!(last.cost, Int::one());
    assert_eq!(last.generation, Int::zero());
}

#[test]
fn flush_request_drains_the_buffer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flush.jsonl");
    let mut universe = Universe::new(UniverseConfig {
        worker_threads: Some(1),
        ..UniverseConfig::default()
    })
    .expect("universe");
    universe.run_ticks(2).expect("run");
    let snapshot = UniverseSnapshot {
        tick: Int::from(2),
        summary: universe.history().last().cloned().expect("summary"),
        records: universe.records().expect("records"),
    };

    let mut pipeline = SnapshotPipeline::new(&path).expect("pipeline");
    let store = pipeline.store();
    pipeline.on_snapshot(&snapshot);
    pipeline.flush();
    drop(pipeline);

    assert_eq!(store.lock().expect("store lock").pending(), 0);
    assert_eq!(read_records(&path).expect("records"), snapshot.records);
}
