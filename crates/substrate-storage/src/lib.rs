//! JSON-lines snapshot export for substrate universes.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};
use substrate_core::{EntityRecord, SnapshotSink, TickSummary, UniverseSnapshot};
use thiserror::Error;

const DEFAULT_ROW_BUFFER: usize = 4096;

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage worker error: {0}")]
    Worker(String),
}

/// One line of a snapshot file. Each exported tick writes its summary
/// followed by one entity row per resident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotRow {
    Tick(TickSummary),
    Entity(EntityRecord),
}

/// Append-only snapshot file with buffered writes.
pub struct SnapshotStore {
    path: PathBuf,
    writer: BufWriter<File>,
    buffer: Vec<String>,
    flush_threshold: usize,
}

impl SnapshotStore {
    /// Open or create a snapshot file at `path` with the default buffer size.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::with_threshold(path, DEFAULT_ROW_BUFFER)
    }

    /// Open with an explicit number of buffered rows per flush.
    pub fn with_threshold(
        path: impl AsRef<Path>,
        flush_threshold: usize,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), flush_threshold, "snapshot store opened");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            buffer: Vec::new(),
            flush_threshold: flush_threshold.max(1),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of rows waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer every row of `snapshot`, flushing once the threshold is reached.
    pub fn persist(&mut self, snapshot: &UniverseSnapshot) -> Result<(), StorageError> {
        self.buffer
            .push(serde_json::to_string(&SnapshotRow::Tick(snapshot.summary.clone()))?);
        for record in &snapshot.records {
            self.buffer
                .push(serde_json::to_string(&SnapshotRow::Entity(record.clone()))?);
        }
        if self.buffer.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Force buffered rows to disk.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        for line in &self.buffer {
            self.writer.write_all(line.as_bytes())?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        tracing::trace!(rows = self.buffer.len(), path = %self.path.display(), "snapshot rows flushed");
        self.buffer.clear();
        Ok(())
    }
}

impl Drop for SnapshotStore {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::error!(path = %self.path.display(), error = %err, "failed to flush snapshot buffer on drop");
        }
    }
}

impl SnapshotSink for SnapshotStore {
    fn on_snapshot(&mut self, snapshot: &UniverseSnapshot) {
        if let Err(err) = self.persist(snapshot) {
            tracing::warn!(tick = %snapshot.tick, error = %err, "failed to write snapshot");
        }
    }
}

/// Read every row of a snapshot file.
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<SnapshotRow>, StorageError> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

/// Read only the entity rows of a snapshot file.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<EntityRecord>, StorageError> {
    Ok(read_rows(path)?
        .into_iter()
        .filter_map(|row| match row {
            SnapshotRow::Entity(record) => Some(record),
            SnapshotRow::Tick(_) => None,
        })
        .collect())
}

#[derive(Debug)]
enum StorageCommand {
    Persist(UniverseSnapshot),
    Flush,
    Shutdown,
}

/// Moves snapshot encoding and file writes onto a dedicated worker thread.
pub struct SnapshotPipeline {
    tx: mpsc::Sender<StorageCommand>,
    store: Arc<Mutex<SnapshotStore>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SnapshotPipeline {
    /// Create an asynchronous pipeline using the default buffer size.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::from_store(SnapshotStore::open(path)?)
    }

    pub fn with_threshold(
        path: impl AsRef<Path>,
        flush_threshold: usize,
    ) -> Result<Self, StorageError> {
        Self::from_store(SnapshotStore::with_threshold(path, flush_threshold)?)
    }

    fn from_store(store: SnapshotStore) -> Result<Self, StorageError> {
        let shared = Arc::new(Mutex::new(store));
        let (tx, rx) = mpsc::channel::<StorageCommand>();
        let worker_store = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("substrate-snapshot-worker".into())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        StorageCommand::Persist(snapshot) => {
                            let mut store = match worker_store.lock() {
                                Ok(store) => store,
                                Err(poisoned) => {
                                    tracing::warn!(tick = %snapshot.tick, "snapshot store mutex poisoned");
                                    poisoned.into_inner()
                                }
                            };
                            if let Err(err) = store.persist(&snapshot) {
                                tracing::error!(tick = %snapshot.tick, error = %err, "failed to persist snapshot");
                            }
                        }
                        StorageCommand::Flush => {
                            if let Ok(mut store) = worker_store.lock()
                                && let Err(err) = store.flush()
                            {
                                tracing::error!(error = %err, "failed to flush snapshot store");
                            }
                        }
                        StorageCommand::Shutdown => {
                            if let Ok(mut store) = worker_store.lock()
                                && let Err(err) = store.flush()
                            {
                                tracing::error!(error = %err, "failed to flush snapshot store on shutdown");
                            }
                            break;
                        }
                    }
                }
            })
            .map_err(|err| {
                StorageError::Worker(format!("failed to spawn snapshot worker thread: {err}"))
            })?;

        Ok(Self {
            tx,
            store: shared,
            handle: Some(handle),
        })
    }

    /// Shared access to the underlying store.
    #[must_use]
    pub fn store(&self) -> Arc<Mutex<SnapshotStore>> {
        Arc::clone(&self.store)
    }

    /// Request an asynchronous flush of buffered rows.
    pub fn flush(&self) {
        if self.tx.send(StorageCommand::Flush).is_err() {
            tracing::warn!("snapshot worker channel closed; flush request dropped");
        }
    }
}

impl SnapshotSink for SnapshotPipeline {
    fn on_snapshot(&mut self, snapshot: &UniverseSnapshot) {
        if self
            .tx
            .send(StorageCommand::Persist(snapshot.clone()))
            .is_err()
        {
            tracing::warn!(tick = %snapshot.tick, "snapshot worker channel closed; snapshot dropped");
        }
    }
}

impl Drop for SnapshotPipeline {
    fn drop(&mut self) {
        let _ = self.tx.send(StorageCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.join()
        {
            tracing::error!("snapshot worker thread panicked: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use substrate_core::{EntityId, Int, Position, Vector};

    fn snapshot(tick: i64, residents: usize) -> UniverseSnapshot {
        let records = (0..residents)
            .map(|index| EntityRecord {
                tick: Int::from(tick),
                id: EntityId::primordial(index as u64),
                position: Position::from_i64s(&[index as i64, 0]),
                energy: Int::zero(),
                cost: Int::one(),
                vector: Vector::unit(2, 0),
                generation: Int::zero(),
            })
            .collect();
        UniverseSnapshot {
            tick: Int::from(tick),
            summary: TickSummary {
                tick: Int::from(tick),
                acted: residents,
                moves: residents,
                divisions: 0,
                births: 0,
                collisions: 0,
                annihilations: 0,
                population: residents,
            },
            records,
        }
    }

    #[test]
    fn rows_stay_buffered_below_threshold() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");
        let mut store = SnapshotStore::with_threshold(&path, 16).expect("store");
        store.persist(&snapshot(3, 2)).expect("persist");
        assert_eq!(store.pending(), 3);
        assert!(read_rows(&path).expect("read").is_empty());
        store.flush().expect("flush");
        assert_eq!(store.pending(), 0);
        let rows = read_rows(&path).expect("read");
        assert_eq!(rows.len(), 3);
        assert!(matches!(rows[0], SnapshotRow::Tick(_)));
    }

    #[test]
    fn drop_flushes_pending_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("drop.jsonl");
        {
            let mut store = SnapshotStore::open(&path).expect("store");
            store.persist(&snapshot(5, 4)).expect("persist");
        }
        let records = read_records(&path).expect("records");
        assert_eq!(records, snapshot(5, 4).records);
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("append.jsonl");
        for tick in [2, 4] {
            let mut store = SnapshotStore::with_threshold(&path, 1).expect("store");
            store.on_snapshot(&snapshot(tick, 1));
        }
        let ticks: Vec<_> = read_records(&path)
            .expect("records")
            .into_iter()
            .map(|record| record.tick)
            .collect();
        assert_eq!(ticks, vec![Int::from(2), Int::from(4)]);
    }
}
