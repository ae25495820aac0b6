//! Spatial registry: position-keyed occupancy plus the sparse next-action schedule.

use dashmap::{DashMap, DashSet};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::collision::{Collision, resolve_collision};
use crate::entity::{Entity, EntityId};
use crate::error::SubstrateError;
use crate::geometry::Position;
use crate::int::Int;

/// Result of a single [`Registry::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The candidate now occupies its position.
    Installed(Arc<Entity>),
    /// The candidate collided; the merge product occupies the position.
    Merged(Arc<Entity>),
    /// The candidate collided and every participant was annihilated.
    Annihilated,
    /// The candidate already took part in this tick's collision here.
    Unchanged,
}

impl CommitOutcome {
    #[must_use]
    pub fn resident(&self) -> Option<&Arc<Entity>> {
        match self {
            Self::Installed(entity) | Self::Merged(entity) => Some(entity),
            Self::Annihilated | Self::Unchanged => None,
        }
    }
}

/// Collision counts gathered when a tick is sealed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SealReport {
    /// Positions where two or more entities met during the tick.
    pub collisions: usize,
    /// Subset of `collisions` that left no survivor.
    pub annihilations: usize,
}

/// Every entity that met at one position during `tick`.
#[derive(Debug)]
struct CollisionLedger {
    tick: Int,
    inputs: Vec<Arc<Entity>>,
}

#[derive(Debug, Default)]
struct Slot {
    occupant: Option<Arc<Entity>>,
    ledger: Option<CollisionLedger>,
}

impl Slot {
    fn is_vacant(&self) -> bool {
        self.occupant.is_none() && self.ledger.is_none()
    }

    fn admit(&mut self, tick: &Int, candidate: Arc<Entity>) -> Result<CommitOutcome, SubstrateError> {
        if let Some(ledger) = self.ledger.as_mut()
            && &ledger.tick == tick
        {
            if ledger.inputs.iter().any(|input| input.id() == candidate.id()) {
                return Ok(CommitOutcome::Unchanged);
            }
            ledger.inputs.push(candidate);
            let collision = resolve_collision(tick, &ledger.inputs)?;
            return Ok(self.settle(collision));
        }

        match &self.occupant {
            Some(resident) if resident.id() != candidate.id() => {
                let inputs = vec![Arc::clone(resident), candidate];
                let collision = resolve_collision(tick, &inputs)?;
                self.ledger = Some(CollisionLedger {
                    tick: tick.clone(),
                    inputs,
                });
                Ok(self.settle(collision))
            }
            _ => {
                self.occupant = Some(Arc::clone(&candidate));
                Ok(CommitOutcome::Installed(candidate))
            }
        }
    }

    fn settle(&mut self, collision: Collision) -> CommitOutcome {
        match collision {
            Collision::Merged(entity) => {
                let entity = Arc::new(entity);
                self.occupant = Some(Arc::clone(&entity));
                CommitOutcome::Merged(entity)
            }
            Collision::Annihilated => {
                self.occupant = None;
                CommitOutcome::Annihilated
            }
        }
    }
}

/// Concurrent position store. Every operation locks only the shard owning
/// the touched key, so workers committing to different positions never
/// contend and commits to the same position are serialised.
#[derive(Debug, Default)]
pub struct Registry {
    slots: DashMap<Position, Slot>,
    schedule: DashMap<Int, BTreeSet<Position>>,
    touched: DashSet<Position>,
    population: AtomicUsize,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resident entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.population.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the positions scheduled for `tick`, in position order.
    /// Each tick's schedule can be consumed only once.
    pub fn due_at(&self, tick: &Int) -> Vec<Position> {
        self.schedule
            .remove(tick)
            .map(|(_, positions)| positions.into_iter().collect())
            .unwrap_or_default()
    }

    /// Number of distinct future ticks with scheduled positions.
    #[must_use]
    pub fn pending_ticks(&self) -> usize {
        self.schedule.len()
    }

    /// Detach the occupant of `position` if it is due at `tick`.
    ///
    /// Stale schedule entries (vacated or not-yet-due occupants) yield `None`
    /// and leave the slot untouched.
    pub fn take_due(&self, position: &Position, tick: &Int) -> Option<Arc<Entity>> {
        let taken = {
            let mut slot = self.slots.get_mut(position)?;
            if !slot
                .occupant
                .as_ref()
                .is_some_and(|occupant| occupant.is_due(tick))
            {
                return None;
            }
            slot.ledger = None;
            slot.occupant.take()
        };
        self.slots.remove_if(position, |_, slot| slot.is_vacant());
        self.population.fetch_sub(1, Ordering::AcqRel);
        taken
    }

    /// Commit `candidate` at its own position during `tick`.
    ///
    /// An empty slot or a slot holding the same identity receives the
    /// candidate. A different identity triggers collision resolution over
    /// every entity that reached the position during `tick`, so the resident
    /// result never depends on arrival order. The installed entity is
    /// scheduled no earlier than `tick + 1`.
    ///
    /// A candidate breaking the cost floor, the speed limit or the lattice
    /// arity is refused with [`SubstrateError::Invariant`] and nothing changes.
    pub fn commit(&self, tick: &Int, candidate: Entity) -> Result<CommitOutcome, SubstrateError> {
        self.install(tick, candidate, tick + &Int::one())
    }

    /// Insert an entity between ticks. `tick` is the next tick the driver
    /// will run; the entity may act on it if already due.
    pub fn spawn(&self, tick: &Int, entity: Entity) -> Result<CommitOutcome, SubstrateError> {
        self.install(tick, entity, tick.clone())
    }

    fn install(
        &self,
        tick: &Int,
        candidate: Entity,
        earliest: Int,
    ) -> Result<CommitOutcome, SubstrateError> {
        candidate.validate()?;
        let position = candidate.position().clone();
        let outcome = {
            let mut slot = self.slots.entry(position.clone()).or_default();
            let occupied_before = slot.occupant.is_some();
            let outcome = slot.admit(tick, Arc::new(candidate))?;
            match (occupied_before, slot.occupant.is_some()) {
                (false, true) => {
                    self.population.fetch_add(1, Ordering::AcqRel);
                }
                (true, false) => {
                    self.population.fetch_sub(1, Ordering::AcqRel);
                }
                _ => {}
            }
            outcome
        };
        self.touched.insert(position.clone());

        if let Some(resident) = outcome.resident() {
            let due = resident.next_action_tick().max(earliest);
            self.schedule.entry(due).or_default().insert(position);
        }
        Ok(outcome)
    }

    /// Whether an entity with identity `id` is resident anywhere.
    #[must_use]
    pub fn contains_id(&self, id: &EntityId) -> bool {
        self.slots.iter().any(|slot| {
            slot.occupant
                .as_ref()
                .is_some_and(|occupant| occupant.id() == id)
        })
    }

    /// Place `entity` and schedule it without any checks.
    #[cfg(test)]
    pub(crate) fn plant(&self, entity: Entity) {
        let position = entity.position().clone();
        let due = entity.next_action_tick();
        self.slots.entry(position.clone()).or_default().occupant = Some(Arc::new(entity));
        self.population.fetch_add(1, Ordering::AcqRel);
        self.schedule.entry(due).or_default().insert(position);
    }

    /// Drop whatever occupies `position`.
    pub fn remove(&self, position: &Position) -> Option<Arc<Entity>> {
        let (_, slot) = self.slots.remove(position)?;
        let occupant = slot.occupant?;
        self.population.fetch_sub(1, Ordering::AcqRel);
        Some(occupant)
    }

    #[must_use]
    pub fn get(&self, position: &Position) -> Option<Arc<Entity>> {
        self.slots
            .get(position)
            .and_then(|slot| slot.occupant.clone())
    }

    /// Every resident entity, ordered by position. Entities are shared, not
    /// copied: residents are never mutated in place.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Entity>> {
        let mut residents: Vec<Arc<Entity>> = self
            .slots
            .iter()
            .filter_map(|slot| slot.occupant.clone())
            .collect();
        residents.sort_unstable_by(|a, b| a.position().cmp(b.position()));
        residents
    }

    /// Close `tick`: discard its collision ledgers, drop emptied slots and
    /// report what collided.
    pub fn seal(&self, tick: &Int) -> SealReport {
        let touched: Vec<Position> = self.touched.iter().map(|key| key.key().clone()).collect();
        self.touched.clear();

        let mut report = SealReport::default();
        for position in &touched {
            if let Some(mut slot) = self.slots.get_mut(position)
                && let Some(ledger) = slot.ledger.take()
                && &ledger.tick == tick
            {
                report.collisions += 1;
                if slot.occupant.is_none() {
                    report.annihilations += 1;
                }
            }
            self.slots.remove_if(position, |_, slot| slot.is_vacant());
        }
        report
    }
}
