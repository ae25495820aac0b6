//! Integer lattice value types: vectors, positions and momenta.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::error::InvariantViolation;
use crate::int::Int;

/// Inline component storage; universes up to three dimensions never allocate.
pub type Components = SmallVec<[Int; 3]>;

/// N-dimensional integer displacement.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vector(Components);

impl Vector {
    #[must_use]
    pub fn new(components: impl IntoIterator<Item = Int>) -> Self {
        Self(components.into_iter().collect())
    }

    /// Convenience constructor for small literal vectors.
    #[must_use]
    pub fn from_i64s(components: &[i64]) -> Self {
        Self::new(components.iter().copied().map(Int::from))
    }

    #[must_use]
    pub fn zero(dimensions: usize) -> Self {
        Self(SmallVec::from_elem(Int::zero(), dimensions))
    }

    /// Unit vector pointing along the positive `axis`.
    #[must_use]
    pub fn unit(dimensions: usize, axis: usize) -> Self {
        let mut vector = Self::zero(dimensions);
        if let Some(component) = vector.0.get_mut(axis) {
            *component = Int::one();
        }
        vector
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn components(&self) -> &[Int] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(Int::is_zero)
    }

    /// Largest absolute component (the Chebyshev norm).
    #[must_use]
    pub fn max_magnitude(&self) -> Int {
        self.0
            .iter()
            .map(Int::abs)
            .max()
            .unwrap_or_else(Int::zero)
    }

    #[must_use]
    pub fn negated(&self) -> Self {
        Self(self.0.iter().map(Int::neg).collect())
    }

    #[must_use]
    pub fn scaled(&self, factor: &Int) -> Self {
        Self(self.0.iter().map(|component| component * factor).collect())
    }

    pub fn checked_add(&self, other: &Self) -> Result<Self, InvariantViolation> {
        ensure_dimensions(self.dimensions(), other.dimensions())?;
        Ok(Self(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| a + b)
                .collect(),
        ))
    }

    pub fn dot(&self, other: &Self) -> Result<Int, InvariantViolation> {
        ensure_dimensions(self.dimensions(), other.dimensions())?;
        Ok(self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum())
    }

    #[must_use]
    pub fn norm_squared(&self) -> Int {
        self.0.iter().map(|component| component * component).sum()
    }

    /// Rescale so the largest component is exactly ±1; `None` for the zero vector.
    ///
    /// Each component rounds half away from zero: it becomes its sign when it is
    /// at least half the largest magnitude and zero otherwise.
    #[must_use]
    pub fn normalized(&self) -> Option<Self> {
        let max = self.max_magnitude();
        if max.is_zero() {
            return None;
        }
        Some(Self(
            self.0
                .iter()
                .map(|component| {
                    if component.abs().shl(1) >= max {
                        Int::from(component.signum())
                    } else {
                        Int::zero()
                    }
                })
                .collect(),
        ))
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_tuple(f, &self.0)
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_tuple(f, &self.0)
    }
}

/// Lattice coordinate. Structural equality is the registry's only notion of place.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(Components);

impl Position {
    #[must_use]
    pub fn new(components: impl IntoIterator<Item = Int>) -> Self {
        Self(components.into_iter().collect())
    }

    #[must_use]
    pub fn from_i64s(components: &[i64]) -> Self {
        Self::new(components.iter().copied().map(Int::from))
    }

    #[must_use]
    pub fn origin(dimensions: usize) -> Self {
        Self(SmallVec::from_elem(Int::zero(), dimensions))
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn components(&self) -> &[Int] {
        &self.0
    }

    /// New position displaced by `vector`.
    pub fn offset(&self, vector: &Vector) -> Result<Self, InvariantViolation> {
        ensure_dimensions(self.dimensions(), vector.dimensions())?;
        Ok(Self(
            self.0
                .iter()
                .zip(vector.components())
                .map(|(a, b)| a + b)
                .collect(),
        ))
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_tuple(f, &self.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_tuple(f, &self.0)
    }
}

/// Movement state: ticks per step plus a speed-limited direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MomentumFields")]
pub struct Momentum {
    cost: Int,
    vector: Vector,
}

/// Wire form of [`Momentum`]; deserialised values pass through [`Momentum::new`].
#[derive(Deserialize)]
struct MomentumFields {
    cost: Int,
    vector: Vector,
}

impl TryFrom<MomentumFields> for Momentum {
    type Error = InvariantViolation;

    fn try_from(fields: MomentumFields) -> Result<Self, Self::Error> {
        Self::new(fields.cost, fields.vector)
    }
}

impl Momentum {
    /// Validates the cost floor and the per-tick speed limit.
    pub fn new(cost: Int, vector: Vector) -> Result<Self, InvariantViolation> {
        let momentum = Self { cost, vector };
        momentum.validate()?;
        Ok(momentum)
    }

    /// Re-check the cost floor and the per-tick speed limit.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if self.cost < Int::one() {
            return Err(InvariantViolation::CostBelowFloor {
                cost: self.cost.clone(),
            });
        }
        if let Some(component) = self
            .vector
            .components()
            .iter()
            .find(|component| component.abs() > Int::one())
        {
            return Err(InvariantViolation::SpeedLimitExceeded {
                component: component.clone(),
            });
        }
        Ok(())
    }

    /// Build a momentum without checking it. Lets tests stand in for a
    /// broken rule that produced an invalid value.
    #[cfg(test)]
    pub(crate) fn unchecked(cost: Int, vector: Vector) -> Self {
        Self { cost, vector }
    }

    /// Default momentum of a stationary entity: cost 1, zero vector.
    #[must_use]
    pub fn at_rest(dimensions: usize) -> Self {
        Self {
            cost: Int::one(),
            vector: Vector::zero(dimensions),
        }
    }

    #[must_use]
    pub fn cost(&self) -> &Int {
        &self.cost
    }

    #[must_use]
    pub fn vector(&self) -> &Vector {
        &self.vector
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.vector.dimensions()
    }

    #[must_use]
    pub fn is_at_rest(&self) -> bool {
        self.vector.is_zero()
    }
}

/// Every non-zero direction of the N-dimensional Moore neighbourhood, in
/// lexicographic order. Yields `3^N - 1` vectors.
#[must_use]
pub fn neighborhood(dimensions: usize) -> Vec<Vector> {
    let mut directions: Vec<Vec<i64>> = vec![Vec::with_capacity(dimensions)];
    for _ in 0..dimensions {
        directions = directions
            .into_iter()
            .flat_map(|prefix| {
                [-1, 0, 1].into_iter().map(move |step| {
                    let mut next = prefix.clone();
                    next.push(step);
                    next
                })
            })
            .collect();
    }
    directions
        .into_iter()
        .filter(|direction| direction.iter().any(|&step| step != 0))
        .map(|direction| Vector::from_i64s(&direction))
        .collect()
}

fn ensure_dimensions(expected: usize, found: usize) -> Result<(), InvariantViolation> {
    if expected == found {
        Ok(())
    } else {
        Err(InvariantViolation::DimensionMismatch { expected, found })
    }
}

fn write_tuple(f: &mut fmt::Formatter<'_>, components: &[Int]) -> fmt::Result {
    f.write_str("(")?;
    for (index, component) in components.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{component}")?;
    }
    f.write_str(")")
}
