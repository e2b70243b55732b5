//! Cart line quantities.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Error returned when a quantity falls outside [`Quantity::MIN`]..=[`Quantity::MAX`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error(
    "quantity must be between {min} and {max} (got {got})",
    min = Quantity::MIN,
    max = Quantity::MAX
)]
pub struct QuantityError {
    /// The rejected value.
    pub got: i64,
}

/// Number of units on a cart line, always within `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Quantity(u8);

impl Quantity {
    /// Smallest quantity a line can hold.
    pub const MIN: u8 = 1;
    /// Largest quantity a line can hold.
    pub const MAX: u8 = 100;
    /// A single unit.
    pub const ONE: Self = Self(1);

    /// Validate a raw quantity.
    ///
    /// # Errors
    ///
    /// Returns [`QuantityError`] if `n` is outside `1..=100`.
    pub fn new(n: i64) -> Result<Self, QuantityError> {
        u8::try_from(n)
            .ok()
            .filter(|q| (Self::MIN..=Self::MAX).contains(q))
            .map(Self)
            .ok_or(QuantityError { got: n })
    }

    /// Add two quantities, capping the result at [`Quantity::MAX`].
    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0).min(Self::MAX))
    }

    /// The quantity as a plain integer.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Quantity {
    type Error = QuantityError;

    fn try_from(n: i64) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<Quantity> for i32 {
    fn from(q: Quantity) -> Self {
        Self::from(q.0)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}
