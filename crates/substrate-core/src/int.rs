//! Unbounded integer with a fixed-width fast path.
//!
//! [`Int`] stores every value that fits in an `i64` inline and only boxes a
//! [`BigInt`] when a result leaves that range. Results are re-canonicalised
//! after every operation, so two equal values always share a representation
//! and the derived `PartialEq`/`Hash` agree regardless of how a value was
//! produced.

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Neg, Shl, Shr, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by fallible integer operations.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("remainder by zero")]
    RemainderByZero,
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum Repr {
    Small(i64),
    /// Invariant: never holds a value representable as `i64`.
    Big(Box<BigInt>),
}

/// Arbitrary-magnitude signed integer. Immutable; every operation returns a new value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Int(Repr);

impl Int {
    /// The value zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(Repr::Small(0))
    }

    /// The value one.
    #[must_use]
    pub const fn one() -> Self {
        Self(Repr::Small(1))
    }

    #[must_use]
    pub const fn from_i64(value: i64) -> Self {
        Self(Repr::Small(value))
    }

    /// Canonicalising constructor from an arbitrary-precision value.
    #[must_use]
    pub fn from_big(value: BigInt) -> Self {
        match value.to_i64() {
            Some(small) => Self(Repr::Small(small)),
            None => Self(Repr::Big(Box::new(value))),
        }
    }

    /// Whether the value currently lives on the fixed-width path.
    #[must_use]
    pub const fn is_small(&self) -> bool {
        matches!(self.0, Repr::Small(_))
    }

    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        match &self.0 {
            Repr::Small(value) => Some(*value),
            Repr::Big(_) => None,
        }
    }

    /// Widened copy of the value.
    #[must_use]
    pub fn to_bigint(&self) -> BigInt {
        self.as_big().into_owned()
    }

    fn as_big(&self) -> Cow<'_, BigInt> {
        match &self.0 {
            Repr::Small(value) => Cow::Owned(BigInt::from(*value)),
            Repr::Big(value) => Cow::Borrowed(value),
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        matches!(self.0, Repr::Small(0))
    }

    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.signum() > 0
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.signum() < 0
    }

    /// -1, 0 or 1 depending on the sign of the value.
    #[must_use]
    pub fn signum(&self) -> i32 {
        match &self.0 {
            Repr::Small(value) => value.signum() as i32,
            Repr::Big(value) => match value.sign() {
                Sign::Minus => -1,
                Sign::NoSign => 0,
                Sign::Plus => 1,
            },
        }
    }

    #[must_use]
    pub fn add(&self, rhs: &Self) -> Self {
        if let (Repr::Small(a), Repr::Small(b)) = (&self.0, &rhs.0)
            && let Some(sum) = a.checked_add(*b)
        {
            return Self::from_i64(sum);
        }
        Self::from_big(&*self.as_big() + &*rhs.as_big())
    }

    #[must_use]
    pub fn sub(&self, rhs: &Self) -> Self {
        if let (Repr::Small(a), Repr::Small(b)) = (&self.0, &rhs.0)
            && let Some(difference) = a.checked_sub(*b)
        {
            return Self::from_i64(difference);
        }
        Self::from_big(&*self.as_big() - &*rhs.as_big())
    }

    #[must_use]
    pub fn mul(&self, rhs: &Self) -> Self {
        if let (Repr::Small(a), Repr::Small(b)) = (&self.0, &rhs.0)
            && let Some(product) = a.checked_mul(*b)
        {
            return Self::from_i64(product);
        }
        Self::from_big(&*self.as_big() * &*rhs.as_big())
    }

    /// Truncating division (rounds toward zero).
    pub fn div(&self, rhs: &Self) -> Result<Self, ArithmeticError> {
        if rhs.is_zero() {
            return Err(ArithmeticError::DivisionByZero);
        }
        if let (Repr::Small(a), Repr::Small(b)) = (&self.0, &rhs.0)
            && let Some(quotient) = a.checked_div(*b)
        {
            return Ok(Self::from_i64(quotient));
        }
        Ok(Self::from_big(&*self.as_big() / &*rhs.as_big()))
    }

    /// Remainder of truncating division; takes the sign of the dividend.
    pub fn rem(&self, rhs: &Self) -> Result<Self, ArithmeticError> {
        if rhs.is_zero() {
            return Err(ArithmeticError::RemainderByZero);
        }
        if let (Repr::Small(a), Repr::Small(b)) = (&self.0, &rhs.0)
            && let Some(remainder) = a.checked_rem(*b)
        {
            return Ok(Self::from_i64(remainder));
        }
        Ok(Self::from_big(&*self.as_big() % &*rhs.as_big()))
    }

    /// Division rounding toward positive infinity.
    pub fn div_ceil(&self, rhs: &Self) -> Result<Self, ArithmeticError> {
        let quotient = self.div(rhs)?;
        let remainder = self.rem(rhs)?;
        if !remainder.is_zero() && self.signum() == rhs.signum() {
            Ok(quotient.add(&Self::one()))
        } else {
            Ok(quotient)
        }
    }

    #[must_use]
    pub fn neg(&self) -> Self {
        match &self.0 {
            Repr::Small(value) => match value.checked_neg() {
                Some(negated) => Self::from_i64(negated),
                None => Self::from_big(-BigInt::from(*value)),
            },
            Repr::Big(value) => Self::from_big(-&**value),
        }
    }

    #[must_use]
    pub fn abs(&self) -> Self {
        if self.is_negative() {
            self.neg()
        } else {
            self.clone()
        }
    }

    #[must_use]
    pub fn pow(&self, exponent: u32) -> Self {
        let mut result = Self::one();
        for _ in 0..exponent {
            result = result.mul(self);
        }
        result
    }

    /// Length of the minimal two's-complement representation, excluding the sign bit.
    #[must_use]
    pub fn bit_length(&self) -> u64 {
        match &self.0 {
            Repr::Small(value) if *value >= 0 => u64::from(64 - value.leading_zeros()),
            Repr::Small(value) => u64::from(64 - (!*value).leading_zeros()),
            Repr::Big(value) if value.is_positive() => value.bits(),
            Repr::Big(value) => (-&**value - 1u32).bits(),
        }
    }

    #[must_use]
    pub fn shl(&self, bits: u32) -> Self {
        if let Repr::Small(value) = self.0 {
            if value == 0 {
                return Self::zero();
            }
            if bits < 64 {
                let shifted = value << bits;
                if shifted >> bits == value {
                    return Self::from_i64(shifted);
                }
            }
        }
        Self::from_big(&*self.as_big() << bits as usize)
    }

    /// Arithmetic shift right (rounds toward negative infinity).
    #[must_use]
    pub fn shr(&self, bits: u32) -> Self {
        match &self.0 {
            Repr::Small(value) if bits >= 64 => Self::from_i64(if *value < 0 { -1 } else { 0 }),
            Repr::Small(value) => Self::from_i64(value >> bits),
            Repr::Big(value) => Self::from_big(&**value >> bits as usize),
        }
    }
}

impl Default for Int {
    fn default() -> Self {
        Self::zero()
    }
}

impl Ord for Int {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Repr::Small(a), Repr::Small(b)) => a.cmp(b),
            (Repr::Big(a), Repr::Big(b)) => a.cmp(b),
            // A canonical big value lies outside the i64 range, so its sign decides.
            (Repr::Small(_), Repr::Big(b)) => {
                if b.is_positive() {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Repr::Big(a), Repr::Small(_)) => {
                if a.is_positive() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
        }
    }
}

impl PartialOrd for Int {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Int {
                fn from(value: $ty) -> Self {
                    Self::from_i64(i64::from(value))
                }
            }
        )*
    };
}

impl_from_primitive!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Int {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(small) => Self::from_i64(small),
            Err(_) => Self::from_big(BigInt::from(value)),
        }
    }
}

impl From<usize> for Int {
    fn from(value: usize) -> Self {
        Self::from(value as u64)
    }
}

impl From<BigInt> for Int {
    fn from(value: BigInt) -> Self {
        Self::from_big(value)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident) => {
        impl $trait<&Int> for &Int {
            type Output = Int;

            fn $method(self, rhs: &Int) -> Int {
                Int::$method(self, rhs)
            }
        }

        impl $trait<Int> for Int {
            type Output = Int;

            fn $method(self, rhs: Int) -> Int {
                Int::$method(&self, &rhs)
            }
        }

        impl $trait<&Int> for Int {
            type Output = Int;

            fn $method(self, rhs: &Int) -> Int {
                Int::$method(&self, rhs)
            }
        }
    };
}

impl_binary_op!(Add, add);
impl_binary_op!(Sub, sub);
impl_binary_op!(Mul, mul);

impl Neg for &Int {
    type Output = Int;

    fn neg(self) -> Int {
        Int::neg(self)
    }
}

impl Neg for Int {
    type Output = Int;

    fn neg(self) -> Int {
        Int::neg(&self)
    }
}

impl Shl<u32> for &Int {
    type Output = Int;

    fn shl(self, bits: u32) -> Int {
        Int::shl(self, bits)
    }
}

impl Shr<u32> for &Int {
    type Output = Int;

    fn shr(self, bits: u32) -> Int {
        Int::shr(self, bits)
    }
}

impl std::iter::Sum for Int {
    fn sum<I: Iterator<Item = Int>>(iter: I) -> Self {
        iter.fold(Int::zero(), |acc, value| acc.add(&value))
    }
}

impl fmt::Display for Int {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Small(value) => fmt::Display::fmt(value, f),
            Repr::Big(value) => fmt::Display::fmt(value, f),
        }
    }
}

impl fmt::Debug for Int {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error returned when parsing an [`Int`] from text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid integer literal: {0:?}")]
pub struct ParseIntError(String);

impl FromStr for Int {
    type Err = ParseIntError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if let Ok(small) = raw.parse::<i64>() {
            return Ok(Self::from_i64(small));
        }
        raw.parse::<BigInt>()
            .map(Self::from_big)
            .map_err(|_| ParseIntError(raw.to_string()))
    }
}

impl Serialize for Int {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Int {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IntInput {
            String(String),
            Number(i64),
        }

        match IntInput::deserialize(deserializer)? {
            IntInput::String(raw) => raw.parse::<Int>().map_err(D::Error::custom),
            IntInput::Number(value) => Ok(Int::from_i64(value)),
        }
    }
}
