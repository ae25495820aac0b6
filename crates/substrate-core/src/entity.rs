//! Entity records and the pure per-tick action function.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::{InvariantViolation, SubstrateError};
use crate::geometry::{Momentum, Position, Vector, neighborhood};
use crate::int::Int;

/// Where an entity came from. Every variant is derived from simulation
/// coordinates only, so parallel runs hand out identical identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Origin {
    /// Inserted by seeding; `ordinal` distinguishes multiple seeds.
    Primordial { ordinal: u64 },
    /// Child produced by the division of the entity acting from `parent` at `tick`.
    Offspring {
        tick: Int,
        parent: Position,
        direction: Vector,
    },
    /// Product of the collision resolved at `position` during `tick`.
    Merger { tick: Int, position: Position },
}

/// Globally unique, immutable entity identity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Arc<Origin>);

impl EntityId {
    #[must_use]
    pub fn new(origin: Origin) -> Self {
        Self(Arc::new(origin))
    }

    #[must_use]
    pub fn primordial(ordinal: u64) -> Self {
        Self::new(Origin::Primordial { ordinal })
    }

    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin() {
            Origin::Primordial { ordinal } => write!(f, "primordial#{ordinal}"),
            Origin::Offspring {
                tick,
                parent,
                direction,
            } => write!(f, "offspring@{tick}:{parent}+{direction}"),
            Origin::Merger { tick, position } => write!(f, "merger@{tick}:{position}"),
        }
    }
}

/// Outcome of visiting an entity on a tick. Closed set of three cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Not yet due; the registry copy stays untouched.
    Wait,
    /// Replacement entity one step further along its momentum vector.
    Move(Entity),
    /// One child per neighbourhood direction; the parent ceases to exist.
    Divide(Vec<Entity>),
}

/// Per-entity record. Never mutated in place: every update is a fresh value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EntityFields")]
pub struct Entity {
    id: EntityId,
    birth_tick: Int,
    generation: Int,
    position: Position,
    momentum: Momentum,
}

#[derive(Deserialize)]
struct EntityFields {
    id: EntityId,
    birth_tick: Int,
    generation: Int,
    position: Position,
    momentum: Momentum,
}

impl TryFrom<EntityFields> for Entity {
    type Error = InvariantViolation;

    fn try_from(fields: EntityFields) -> Result<Self, Self::Error> {
        Self::new(
            fields.id,
            fields.birth_tick,
            fields.generation,
            fields.position,
            fields.momentum,
        )
    }
}

impl Entity {
    pub fn new(
        id: EntityId,
        birth_tick: Int,
        generation: Int,
        position: Position,
        momentum: Momentum,
    ) -> Result<Self, InvariantViolation> {
        let entity = Self {
            id,
            birth_tick,
            generation,
            position,
            momentum,
        };
        entity.validate()?;
        Ok(entity)
    }

    /// Build an entity without checking it. Lets tests stand in for a broken
    /// rule that produced an invalid value.
    #[cfg(test)]
    pub(crate) fn unchecked(
        id: EntityId,
        birth_tick: Int,
        position: Position,
        momentum: Momentum,
    ) -> Self {
        Self {
            id,
            birth_tick,
            generation: Int::zero(),
            position,
            momentum,
        }
    }

    /// Check the arity and momentum invariants of an entity about to be installed.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if self.position.dimensions() != self.momentum.dimensions() {
            return Err(InvariantViolation::DimensionMismatch {
                expected: self.position.dimensions(),
                found: self.momentum.dimensions(),
            });
        }
        self.momentum.validate()
    }

    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    #[must_use]
    pub fn birth_tick(&self) -> &Int {
        &self.birth_tick
    }

    #[must_use]
    pub fn generation(&self) -> &Int {
        &self.generation
    }

    #[must_use]
    pub fn position(&self) -> &Position {
        &self.position
    }

    #[must_use]
    pub fn momentum(&self) -> &Momentum {
        &self.momentum
    }

    /// Derived energy: ticks elapsed since birth.
    pub fn energy_at(&self, tick: &Int) -> Result<Int, InvariantViolation> {
        let energy = tick - &self.birth_tick;
        if energy.is_negative() {
            return Err(InvariantViolation::NegativeEnergy {
                tick: tick.clone(),
                birth_tick: self.birth_tick.clone(),
            });
        }
        Ok(energy)
    }

    /// The single tick at which this entity must be revisited.
    #[must_use]
    pub fn next_action_tick(&self) -> Int {
        &self.birth_tick + self.momentum.cost()
    }

    #[must_use]
    pub fn is_due(&self, tick: &Int) -> bool {
        *tick >= self.next_action_tick()
    }

    /// Decide what this entity does on `tick`.
    pub fn on_tick(&self, tick: &Int, rules: &DivisionRules) -> Result<Action, SubstrateError> {
        let energy = self.energy_at(tick)?;
        if !self.is_due(tick) {
            return Ok(Action::Wait);
        }
        if energy >= rules.threshold(self)? {
            Ok(Action::Divide(self.divide(tick, rules)?))
        } else {
            Ok(Action::Move(self.step(tick)?))
        }
    }

    fn step(&self, tick: &Int) -> Result<Self, InvariantViolation> {
        Ok(Self {
            id: self.id.clone(),
            birth_tick: tick.clone(),
            generation: self.generation.clone(),
            position: self.position.offset(self.momentum.vector())?,
            momentum: self.momentum.clone(),
        })
    }

    fn divide(&self, tick: &Int, rules: &DivisionRules) -> Result<Vec<Self>, InvariantViolation> {
        let costs = rules.child_costs(&self.momentum, &self.generation)?;
        let generation = &self.generation + &Int::one();
        rules
            .directions()
            .iter()
            .zip(costs)
            .map(|(direction, cost)| {
                Entity::new(
                    EntityId::new(Origin::Offspring {
                        tick: tick.clone(),
                        parent: self.position.clone(),
                        direction: direction.clone(),
                    }),
                    tick.clone(),
                    generation.clone(),
                    self.position.offset(direction)?,
                    Momentum::new(cost, direction.clone())?,
                )
            })
            .collect()
    }
}

/// Constants governing division: the child cost schedule and the threshold.
#[derive(Debug, Clone)]
pub struct DivisionRules {
    base_child_cost: Int,
    rigidity: Int,
    directions: Vec<Vector>,
}

impl DivisionRules {
    #[must_use]
    pub fn new(dimensions: usize, base_child_cost: Int, rigidity: Int) -> Self {
        Self {
            base_child_cost,
            rigidity,
            directions: neighborhood(dimensions),
        }
    }

    /// Neighbourhood directions, in the order children are produced.
    #[must_use]
    pub fn directions(&self) -> &[Vector] {
        &self.directions
    }

    #[must_use]
    pub fn base_child_cost(&self) -> &Int {
        &self.base_child_cost
    }

    #[must_use]
    pub fn rigidity(&self) -> &Int {
        &self.rigidity
    }

    /// Directional penalty per direction for a parent moving along `vector`.
    ///
    /// The penalty is `rigidity * (generation + 1) * rank`, where `rank` counts
    /// the distinct angular classes strictly more aligned with `vector`. The
    /// leading direction therefore pays nothing and the reversed direction pays
    /// the most.
    pub fn penalties(
        &self,
        vector: &Vector,
        generation: &Int,
    ) -> Result<Vec<Int>, InvariantViolation> {
        let scale = &self.rigidity * &(generation + &Int::one());
        Ok(angular_ranks(&self.directions, vector)?
            .into_iter()
            .map(|rank| &scale * &Int::from(rank))
            .collect())
    }

    pub fn child_costs(
        &self,
        momentum: &Momentum,
        generation: &Int,
    ) -> Result<Vec<Int>, InvariantViolation> {
        let base = momentum.cost() + &self.base_child_cost;
        Ok(self
            .penalties(momentum.vector(), generation)?
            .iter()
            .map(|penalty| &base + penalty)
            .collect())
    }

    /// Energy at which `entity` divides instead of moving: the summed cost of
    /// every child it would produce.
    ///
    /// Every child costs at least one more than its parent, so the threshold
    /// always exceeds the parent cost. An entity visited on its due tick holds
    /// exactly its cost in energy and therefore moves; only overdue entities
    /// divide.
    pub fn threshold(&self, entity: &Entity) -> Result<Int, InvariantViolation> {
        Ok(self
            .child_costs(entity.momentum(), entity.generation())?
            .into_iter()
            .sum())
    }
}

/// Signed squared cosine `sign(d·v)(d·v)² / (|d|²|v|²)` kept as an exact fraction.
struct Alignment {
    numerator: Int,
    denominator: Int,
}

impl Alignment {
    fn between(direction: &Vector, vector: &Vector) -> Result<Self, InvariantViolation> {
        let dot = direction.dot(vector)?;
        Ok(Self {
            numerator: &dot * &dot.abs(),
            denominator: &direction.norm_squared() * &vector.norm_squared(),
        })
    }

    fn compare(&self, other: &Self) -> Ordering {
        (&self.numerator * &other.denominator).cmp(&(&other.numerator * &self.denominator))
    }
}

fn angular_ranks(directions: &[Vector], vector: &Vector) -> Result<Vec<usize>, InvariantViolation> {
    if vector.is_zero() {
        return Ok(vec![0; directions.len()]);
    }
    let alignments = directions
        .iter()
        .map(|direction| Alignment::between(direction, vector))
        .collect::<Result<Vec<_>, _>>()?;

    let mut classes: Vec<&Alignment> = alignments.iter().collect();
    classes.sort_by(|a, b| b.compare(a));
    classes.dedup_by(|a, b| a.compare(b) == Ordering::Equal);

    Ok(alignments
        .iter()
        .map(|alignment| classes.partition_point(|class| class.compare(alignment) == Ordering::Greater))
        .collect())
}
