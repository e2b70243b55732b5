//! Type-safe price representation using decimal arithmetic.
//!
//! Prices are carried in the currency's standard unit (dollars, not cents)
//! and converted to the payment provider's integer minor units only at the
//! provider boundary.

use core::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Errors converting between major and minor currency units.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The amount has more fractional digits than the currency allows.
    #[error("{amount} {currency} is not a whole number of minor units")]
    FractionalMinorUnits {
        /// Offending amount.
        amount: Decimal,
        /// Currency the amount was expressed in.
        currency: CurrencyCode,
    },
    /// The amount is negative.
    #[error("amount cannot be negative")]
    Negative,
    /// The amount does not fit in an `i64` of minor units.
    #[error("amount is too large")]
    Overflow,
}

/// A price with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in the currency's standard unit (e.g., dollars, not cents).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// Build a price from an integer count of minor units (e.g. cents).
    #[must_use]
    pub fn from_minor_units(minor: i64, currency_code: CurrencyCode) -> Self {
        Self {
            amount: Decimal::new(minor, currency_code.minor_unit_exponent()),
            currency_code,
        }
    }

    /// Convert to the integer minor-unit representation payment providers use.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::FractionalMinorUnits`] when the amount cannot be
    /// represented exactly (e.g. `$1.005`), [`PriceError::Negative`] for
    /// negative amounts and [`PriceError::Overflow`] when it exceeds `i64`.
    pub fn to_minor_units(&self) -> Result<i64, PriceError> {
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(PriceError::Negative);
        }
        let scale = Decimal::from(10_i64.pow(self.currency_code.minor_unit_exponent()));
        let minor = self
            .amount
            .checked_mul(scale)
            .ok_or(PriceError::Overflow)?
            .normalize();
        if !minor.fract().is_zero() {
            return Err(PriceError::FractionalMinorUnits {
                amount: self.amount,
                currency: self.currency_code,
            });
        }
        minor.to_i64().ok_or(PriceError::Overflow)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let places = usize::try_from(self.currency_code.minor_unit_exponent()).unwrap_or(2);
        write!(
            f,
            "{}{:.*}",
            self.currency_code.symbol(),
            places,
            self.amount
        )
    }
}

/// ISO 4217 currency codes the store can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
    RON,
    JPY,
}

impl CurrencyCode {
    /// Number of decimal places in the currency's minor unit.
    #[must_use]
    pub const fn minor_unit_exponent(self) -> u32 {
        match self {
            Self::JPY => 0,
            _ => 2,
        }
    }

    /// Lower-case code as payment providers expect it.
    #[must_use]
    pub const fn as_lower(self) -> &'static str {
        match self {
            Self::USD => "usd",
            Self::EUR => "eur",
            Self::GBP => "gbp",
            Self::CAD => "cad",
            Self::AUD => "aud",
            Self::RON => "ron",
            Self::JPY => "jpy",
        }
    }

    /// Display symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::USD | Self::CAD | Self::AUD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
            Self::RON => "lei ",
            Self::JPY => "¥",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_lower().to_ascii_uppercase())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "CAD" => Ok(Self::CAD),
            "AUD" => Ok(Self::AUD),
            "RON" => Ok(Self::RON),
            "JPY" => Ok(Self::JPY),
            other => Err(format!("unsupported currency: {other}")),
        }
    }
}
