//! Core types for the substrate: a deterministic, tick-synchronised lattice
//! of entities that move, divide and collide under exact integer rules.

pub mod collision;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod int;
pub mod registry;
pub mod universe;

pub use collision::{Collision, MergedMomentum, merge_momenta, resolve_collision};
pub use entity::{Action, DivisionRules, Entity, EntityId, Origin};
pub use error::{ConfigError, InvariantViolation, SubstrateError};
pub use geometry::{Momentum, Position, Vector, neighborhood};
pub use int::{ArithmeticError, Int, ParseIntError};
pub use registry::{CommitOutcome, Registry, SealReport};
pub use universe::{
    DriverState, EntityRecord, MAX_DIMENSIONS, NullSink, SnapshotSink, TickSummary, Universe,
    UniverseConfig, UniverseSnapshot,
};
