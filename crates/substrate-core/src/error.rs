//! Error taxonomy for the simulation core.

use thiserror::Error;

use crate::entity::EntityId;
use crate::geometry::Position;
use crate::int::{ArithmeticError, Int};

/// A broken substrate rule. Always fatal: it signals a bug in the rules
/// themselves, never a recoverable runtime condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("negative derived energy: tick {tick} precedes birth tick {birth_tick}")]
    NegativeEnergy { tick: Int, birth_tick: Int },
    #[error("momentum cost {cost} is below the floor of 1")]
    CostBelowFloor { cost: Int },
    #[error("momentum component {component} exceeds the per-tick speed limit")]
    SpeedLimitExceeded { component: Int },
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("collision inputs do not share a single position")]
    ScatteredCollision,
    #[error("collision requires at least one input")]
    EmptyCollision,
}

/// Errors surfaced by the tick driver and the operations it runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubstrateError {
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
    #[error("arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),
    #[error("entity {id} is already resident")]
    DuplicateIdentity { id: EntityId },
    #[error("position {position} is already occupied")]
    Occupied { position: Position },
    /// The driver already failed on `tick` and refuses further work.
    #[error("universe halted after a fatal error at tick {tick}")]
    Halted { tick: Int },
}

/// Errors that can occur when constructing a universe.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
    #[error("failed to seed universe: {0}")]
    Seed(#[from] SubstrateError),
}
