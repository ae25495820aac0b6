//! Tick driver: configuration, the barrier-synchronised tick loop and snapshot export.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::entity::{Action, DivisionRules, Entity, EntityId};
use crate::error::{ConfigError, InvariantViolation, SubstrateError};
use crate::geometry::{Momentum, Position, Vector};
use crate::int::Int;
use crate::registry::{CommitOutcome, Registry};

/// Largest supported lattice dimensionality (`3^6 - 1 = 728` children per division).
pub const MAX_DIMENSIONS: usize = 6;

/// Static configuration for a universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    /// Lattice dimensionality N.
    pub dimensions: usize,
    /// Worker pool size; `None` uses the available hardware parallelism.
    pub worker_threads: Option<usize>,
    /// Surcharge every child pays on top of its parent's cost.
    pub base_child_cost: u64,
    /// Directional penalty per angular rank and generation.
    pub rigidity: u64,
    /// Momentum cost of the seed entity.
    pub seed_cost: u64,
    /// Export a snapshot every K ticks; 0 disables export.
    pub snapshot_interval: u64,
    /// Number of tick summaries retained in memory.
    pub history_capacity: usize,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            dimensions: 2,
            worker_threads: None,
            base_child_cost: 1,
            rigidity: 1,
            seed_cost: 1,
            snapshot_interval: 0,
            history_capacity: 256,
        }
    }
}

impl UniverseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_DIMENSIONS).contains(&self.dimensions) {
            return Err(ConfigError::InvalidConfig(
                "dimensions must be between 1 and 6",
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "worker_threads must be positive when set",
            ));
        }
        if self.base_child_cost == 0 {
            return Err(ConfigError::InvalidConfig(
                "base_child_cost must be at least 1",
            ));
        }
        if self.seed_cost == 0 {
            return Err(ConfigError::InvalidConfig("seed_cost must be at least 1"));
        }
        Ok(())
    }

    /// Resolved worker pool size.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        })
    }

    #[must_use]
    pub fn division_rules(&self) -> DivisionRules {
        DivisionRules::new(
            self.dimensions,
            Int::from(self.base_child_cost),
            Int::from(self.rigidity),
        )
    }
}

/// Per-tick aggregate, retained in the history ring and attached to snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: Int,
    /// Entities that moved or divided.
    pub acted: usize,
    pub moves: usize,
    pub divisions: usize,
    /// Children produced by divisions.
    pub births: usize,
    /// Positions where entities met.
    pub collisions: usize,
    pub annihilations: usize,
    /// Residents after the barrier.
    pub population: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct TickStats {
    acted: usize,
    moves: usize,
    divisions: usize,
    births: usize,
}

impl TickStats {
    fn merge(self, other: Self) -> Self {
        Self {
            acted: self.acted + other.acted,
            moves: self.moves + other.moves,
            divisions: self.divisions + other.divisions,
            births: self.births + other.births,
        }
    }
}

/// One exported row per resident entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub tick: Int,
    pub id: EntityId,
    pub position: Position,
    /// Derived energy at `tick`.
    pub energy: Int,
    pub cost: Int,
    pub vector: Vector,
    pub generation: Int,
}

impl EntityRecord {
    pub fn capture(entity: &Entity, tick: &Int) -> Result<Self, InvariantViolation> {
        Ok(Self {
            tick: tick.clone(),
            id: entity.id().clone(),
            position: entity.position().clone(),
            energy: entity.energy_at(tick)?,
            cost: entity.momentum().cost().clone(),
            vector: entity.momentum().vector().clone(),
            generation: entity.generation().clone(),
        })
    }
}

/// Registry contents captured at a tick barrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseSnapshot {
    pub tick: Int,
    pub summary: TickSummary,
    pub records: Vec<EntityRecord>,
}

/// Snapshot sink invoked every `snapshot_interval` ticks.
pub trait SnapshotSink: Send {
    fn on_snapshot(&mut self, snapshot: &UniverseSnapshot);
}

/// No-op snapshot sink.
#[derive(Debug, Default)]
pub struct NullSink;

impl SnapshotSink for NullSink {
    fn on_snapshot(&mut self, _snapshot: &UniverseSnapshot) {}
}

/// Driver lifecycle. `Running` is never observable from outside a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    Idle { next_tick: Int },
    /// A fatal error stopped the run during `tick`.
    Halted { tick: Int },
}

/// A universe: registry, division rules and the worker pool that drives them.
pub struct Universe {
    config: UniverseConfig,
    rules: DivisionRules,
    registry: Registry,
    pool: rayon::ThreadPool,
    state: DriverState,
    sink: Box<dyn SnapshotSink>,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for Universe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Universe")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("population", &self.registry.len())
            .finish()
    }
}

impl Universe {
    /// Build a universe holding the canonical seed: one entity at the origin,
    /// born on tick 1, moving along the first axis.
    pub fn new(config: UniverseConfig) -> Result<Self, ConfigError> {
        Self::with_sink(config, Box::new(NullSink))
    }

    pub fn with_sink(
        config: UniverseConfig,
        sink: Box<dyn SnapshotSink>,
    ) -> Result<Self, ConfigError> {
        let mut universe = Self::unseeded_with_sink(config, sink)?;
        let dimensions = universe.config.dimensions;
        let seed = Entity::new(
            EntityId::primordial(0),
            Int::one(),
            Int::zero(),
            Position::origin(dimensions),
            Momentum::new(
                Int::from(universe.config.seed_cost),
                Vector::unit(dimensions, 0),
            )
            .map_err(SubstrateError::from)?,
        )
        .map_err(SubstrateError::from)?;
        universe.spawn(seed)?;
        Ok(universe)
    }

    /// Build an empty universe; populate it with [`Universe::spawn`].
    pub fn unseeded(config: UniverseConfig) -> Result<Self, ConfigError> {
        Self::unseeded_with_sink(config, Box::new(NullSink))
    }

    fn unseeded_with_sink(
        config: UniverseConfig,
        sink: Box<dyn SnapshotSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let workers = config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("substrate-worker-{index}"))
            .build()
            .map_err(|err| ConfigError::ThreadPool(err.to_string()))?;
        tracing::info!(
            dimensions = config.dimensions,
            workers,
            directions = config.division_rules().directions().len(),
            "universe created"
        );
        Ok(Self {
            rules: config.division_rules(),
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            registry: Registry::new(),
            pool,
            state: DriverState::Idle {
                next_tick: Int::one(),
            },
            sink,
        })
    }

    /// Replace the snapshot sink.
    pub fn set_sink(&mut self, sink: Box<dyn SnapshotSink>) {
        self.sink = sink;
    }

    /// Insert an entity before the next tick runs.
    ///
    /// Spawns never collide: an identity that is already resident or an
    /// occupied position is refused.
    pub fn spawn(&mut self, entity: Entity) -> Result<CommitOutcome, SubstrateError> {
        let tick = self.next_tick()?;
        if entity.position().dimensions() != self.config.dimensions {
            return Err(InvariantViolation::DimensionMismatch {
                expected: self.config.dimensions,
                found: entity.position().dimensions(),
            }
            .into());
        }
        entity.energy_at(&tick)?;
        if self.registry.get(entity.position()).is_some() {
            return Err(SubstrateError::Occupied {
                position: entity.position().clone(),
            });
        }
        if self.registry.contains_id(entity.id()) {
            return Err(SubstrateError::DuplicateIdentity {
                id: entity.id().clone(),
            });
        }
        self.registry.spawn(&tick, entity)
    }

    /// Execute one tick and return its summary.
    ///
    /// A fatal error halts the driver: the error is returned once and every
    /// later call fails with [`SubstrateError::Halted`].
    pub fn step(&mut self) -> Result<TickSummary, SubstrateError> {
        let tick = self.next_tick()?;
        let outcome = self.run_tick(&tick).and_then(|summary| {
            self.export(&summary)?;
            Ok(summary)
        });
        match outcome {
            Ok(summary) => {
                self.state = DriverState::Idle {
                    next_tick: &tick + &Int::one(),
                };
                tracing::debug!(
                    tick = %summary.tick,
                    acted = summary.acted,
                    births = summary.births,
                    collisions = summary.collisions,
                    population = summary.population,
                    "tick complete"
                );
                self.record(summary.clone());
                Ok(summary)
            }
            Err(err) => {
                tracing::error!(%tick, error = %err, "fatal error; universe halted");
                self.state = DriverState::Halted { tick };
                Err(err)
            }
        }
    }

    /// Run `ticks` more ticks.
    pub fn run_ticks(&mut self, ticks: u64) -> Result<(), SubstrateError> {
        for _ in 0..ticks {
            self.step()?;
        }
        self.log_progress();
        Ok(())
    }

    /// Run every tick up to and including `last`.
    pub fn run_until(&mut self, last: &Int) -> Result<(), SubstrateError> {
        while &self.next_tick()? <= last {
            self.step()?;
        }
        self.log_progress();
        Ok(())
    }

    fn run_tick(&self, tick: &Int) -> Result<TickSummary, SubstrateError> {
        let due = self.registry.due_at(tick);
        let registry = &self.registry;
        let rules = &self.rules;

        let stats = self.pool.install(|| {
            // Every due occupant leaves its slot before anything arrives.
            let acting: Vec<Arc<Entity>> = due
                .par_iter()
                .filter_map(|position| registry.take_due(position, tick))
                .collect();
            acting
                .par_iter()
                .map(|entity| act(registry, rules, tick, entity))
                .try_reduce(TickStats::default, |a, b| Ok(a.merge(b)))
        })?;
        let sealed = self.registry.seal(tick);

        Ok(TickSummary {
            tick: tick.clone(),
            acted: stats.acted,
            moves: stats.moves,
            divisions: stats.divisions,
            births: stats.births,
            collisions: sealed.collisions,
            annihilations: sealed.annihilations,
            population: self.registry.len(),
        })
    }

    fn export(&mut self, summary: &TickSummary) -> Result<(), SubstrateError> {
        let interval = self.config.snapshot_interval;
        if interval == 0 || !summary.tick.rem(&Int::from(interval))?.is_zero() {
            return Ok(());
        }
        let snapshot = UniverseSnapshot {
            tick: summary.tick.clone(),
            summary: summary.clone(),
            records: self.records_at(&summary.tick)?,
        };
        self.sink.on_snapshot(&snapshot);
        Ok(())
    }

    fn record(&mut self, summary: TickSummary) {
        if self.config.history_capacity == 0 {
            return;
        }
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    fn log_progress(&self) {
        tracing::info!(
            state = ?self.state,
            population = self.registry.len(),
            pending_ticks = self.registry.pending_ticks(),
            "run complete"
        );
    }

    fn next_tick(&self) -> Result<Int, SubstrateError> {
        match &self.state {
            DriverState::Idle { next_tick } => Ok(next_tick.clone()),
            DriverState::Halted { tick } => Err(SubstrateError::Halted { tick: tick.clone() }),
        }
    }

    fn records_at(&self, tick: &Int) -> Result<Vec<EntityRecord>, InvariantViolation> {
        self.registry
            .snapshot()
            .iter()
            .map(|entity| EntityRecord::capture(entity, tick))
            .collect()
    }

    /// Records for every resident at the last completed tick. Entities born
    /// later (the seed before tick 1, or anything spawned since) are captured
    /// at their birth tick.
    pub fn records(&self) -> Result<Vec<EntityRecord>, SubstrateError> {
        let completed = &self.next_tick()? - &Int::one();
        self.registry
            .snapshot()
            .iter()
            .map(|entity| {
                let tick = entity.birth_tick().max(&completed);
                EntityRecord::capture(entity, tick).map_err(SubstrateError::from)
            })
            .collect()
    }

    /// The next tick to run, or the tick on which the driver halted.
    #[must_use]
    pub fn tick(&self) -> Int {
        match &self.state {
            DriverState::Idle { next_tick } => next_tick.clone(),
            DriverState::Halted { tick } => tick.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &DriverState {
        &self.state
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        matches!(self.state, DriverState::Halted { .. })
    }

    #[must_use]
    pub fn config(&self) -> &UniverseConfig {
        &self.config
    }

    #[must_use]
    pub fn rules(&self) -> &DivisionRules {
        &self.rules
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn population(&self) -> usize {
        self.registry.len()
    }

    /// Resident entities ordered by position.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Entity>> {
        self.registry.snapshot()
    }

    /// Iterate over retained tick summaries.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }
}

fn act(
    registry: &Registry,
    rules: &DivisionRules,
    tick: &Int,
    entity: &Entity,
) -> Result<TickStats, SubstrateError> {
    match entity.on_tick(tick, rules)? {
        Action::Wait => {
            registry.commit(tick, entity.clone())?;
            Ok(TickStats::default())
        }
        Action::Move(next) => {
            registry.commit(tick, next)?;
            Ok(TickStats {
                acted: 1,
                moves: 1,
                ..TickStats::default()
            })
        }
        Action::Divide(children) => {
            let births = children.len();
            for child in children {
                registry.commit(tick, child)?;
            }
            Ok(TickStats {
                acted: 1,
                divisions: 1,
                births,
                ..TickStats::default()
            })
        }
    }
}
