//! Collision resolution: energy-weighted momentum merge and the entity factory.

use std::borrow::Borrow;

use crate::entity::{Entity, EntityId, Origin};
use crate::error::{InvariantViolation, SubstrateError};
use crate::geometry::{Momentum, Vector};
use crate::int::Int;

/// Result of the low-level momentum merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergedMomentum {
    /// Weighted vectors cancelled exactly; no successor exists.
    Annihilated,
    Moving(Momentum),
}

impl MergedMomentum {
    /// Flatten into `(cost, vector)`; annihilation reads as cost 0 and the zero vector.
    #[must_use]
    pub fn into_parts(self, dimensions: usize) -> (Int, Vector) {
        match self {
            Self::Annihilated => (Int::zero(), Vector::zero(dimensions)),
            Self::Moving(momentum) => (momentum.cost().clone(), momentum.vector().clone()),
        }
    }
}

/// Merge `(energy, momentum)` pairs into one momentum.
///
/// The merged vector is the energy-weighted sum of the input vectors,
/// normalised back under the speed limit. The merged cost spreads the
/// energy-weighted cost mass over the surviving displacement, so cancelled
/// motion makes the product slower. All sums are commutative, so the result
/// depends only on the multiset of inputs.
pub fn merge_momenta(inputs: &[(Int, &Momentum)]) -> Result<MergedMomentum, SubstrateError> {
    let (_, first) = inputs.first().ok_or(InvariantViolation::EmptyCollision)?;
    let dimensions = first.dimensions();

    let total: Int = inputs.iter().map(|(energy, _)| energy.clone()).sum();
    if total.is_zero() {
        return Ok(MergedMomentum::Moving(Momentum::at_rest(dimensions)));
    }

    let mut weighted = Vector::zero(dimensions);
    for (energy, momentum) in inputs {
        weighted = weighted.checked_add(&momentum.vector().scaled(energy))?;
    }
    let cost_mass: Int = inputs
        .iter()
        .map(|(energy, momentum)| energy * momentum.cost())
        .sum();

    let Some(vector) = weighted.normalized() else {
        let cancelled = inputs
            .iter()
            .any(|(energy, momentum)| energy.is_positive() && !momentum.is_at_rest());
        if cancelled {
            return Ok(MergedMomentum::Annihilated);
        }
        let cost = cost_mass.div_ceil(&total)?.max(Int::one());
        return Ok(MergedMomentum::Moving(Momentum::new(
            cost,
            Vector::zero(dimensions),
        )?));
    };

    let cost = cost_mass
        .div_ceil(&weighted.max_magnitude())?
        .max(Int::one());
    Ok(MergedMomentum::Moving(Momentum::new(cost, vector)?))
}

/// Outcome of resolving every entity that met at one position during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collision {
    Annihilated,
    Merged(Entity),
}

/// Build the successor of a collision between `inputs` at `tick`.
///
/// Inputs must share a position. The result is a symmetric function of the
/// input set: permuting `inputs` never changes it. Its cost is never below
/// any input cost, and its energy is `ceil(K / 2)` where `K` is the largest
/// component of the weighted vector sum (or the combined energy when the
/// product is at rest), which keeps the collision lossy.
pub fn resolve_collision<E>(tick: &Int, inputs: &[E]) -> Result<Collision, SubstrateError>
where
    E: Borrow<Entity>,
{
    let entities: Vec<&Entity> = inputs.iter().map(|entity| entity.borrow()).collect();
    let first = entities
        .first()
        .copied()
        .ok_or(InvariantViolation::EmptyCollision)?;
    let position = first.position();
    if entities.iter().any(|entity| entity.position() != position) {
        return Err(InvariantViolation::ScatteredCollision.into());
    }

    let weighted = entities
        .iter()
        .map(|entity| Ok((entity.energy_at(tick)?, entity.momentum())))
        .collect::<Result<Vec<_>, InvariantViolation>>()?;

    let momentum = match merge_momenta(&weighted)? {
        MergedMomentum::Annihilated => {
            tracing::trace!(%tick, %position, inputs = inputs.len(), "collision annihilated");
            return Ok(Collision::Annihilated);
        }
        MergedMomentum::Moving(momentum) => momentum,
    };

    let floor = entities
        .iter()
        .map(|entity| entity.momentum().cost())
        .max()
        .cloned()
        .unwrap_or_else(Int::one);
    let cost = momentum.cost().clone().max(floor);

    let kept = if momentum.is_at_rest() {
        weighted.iter().map(|(energy, _)| energy.clone()).sum()
    } else {
        let mut sum = Vector::zero(first.momentum().dimensions());
        for (energy, momentum) in &weighted {
            sum = sum.checked_add(&momentum.vector().scaled(energy))?;
        }
        sum.max_magnitude()
    };
    let energy = kept.div_ceil(&Int::from(2))?;

    let generation = entities
        .iter()
        .map(|entity| entity.generation())
        .max()
        .cloned()
        .unwrap_or_else(Int::zero)
        + Int::one();

    let merged = Entity::new(
        EntityId::new(Origin::Merger {
            tick: tick.clone(),
            position: position.clone(),
        }),
        tick - &energy,
        generation,
        position.clone(),
        Momentum::new(cost, momentum.vector().clone())?,
    )?;
    tracing::trace!(
        %tick,
        %position,
        inputs = inputs.len(),
        cost = %merged.momentum().cost(),
        energy = %energy,
        "collision merged"
    );
    Ok(Collision::Merged(merged))
}
