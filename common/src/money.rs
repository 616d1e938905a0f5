//! Monetary types for the Cambio conversion pipeline.
//!
//! All amounts are held as integer minor units (centavos for BRL, micro-units
//! for USDT). Rate math goes through `rust_decimal::Decimal` and re-quantizes
//! to the target currency's scale under an explicit [`Rounding`] policy:
//! fees round up (in favor of the platform), customer payouts round down,
//! everything else uses banker's rounding.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};
use thiserror::Error;

/// Currencies handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Brazilian real, scale 10^-2 (centavos).
    Brl,
    /// Tether USD, scale 10^-6.
    Usdt,
}

impl Currency {
    /// Get the currency code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Brl => "BRL",
            Currency::Usdt => "USDT",
        }
    }

    /// Number of decimal places in the minor-unit representation.
    pub fn scale(&self) -> u32 {
        match self {
            Currency::Brl => 2,
            Currency::Usdt => 6,
        }
    }

    /// Minor units per whole unit.
    pub fn minor_per_major(&self) -> i64 {
        match self {
            Currency::Brl => 100,
            Currency::Usdt => 1_000_000,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A currency pair for rate lookups. The rate is expressed as units of
/// `quote` per unit of `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Base currency (being bought/sold).
    pub base: Currency,
    /// Quote currency (pricing currency).
    pub quote: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    /// The pair the whole pipeline trades: BRL per USDT.
    pub fn usdt_brl() -> Self {
        Self::new(Currency::Usdt, Currency::Brl)
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.quote,
            quote: self.base,
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Rounding policy for re-quantizing decimal values to minor units.
///
/// Amounts flowing through fee and payout computation are non-negative, so
/// `Up` means toward the platform and `Down` means toward zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Banker's rounding (midpoint to nearest even).
    Nearest,
    /// Round away from zero. Used for fees charged to the customer.
    Up,
    /// Round toward zero. Used for amounts paid out to the customer.
    Down,
}

impl Rounding {
    fn strategy(&self) -> RoundingStrategy {
        match self {
            Rounding::Nearest => RoundingStrategy::MidpointNearestEven,
            Rounding::Up => RoundingStrategy::AwayFromZero,
            Rounding::Down => RoundingStrategy::ToZero,
        }
    }
}

/// Errors from monetary arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// Arithmetic across two different currencies.
    #[error("currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    /// Minor-unit value does not fit in 64 bits.
    #[error("amount overflow")]
    AmountOverflow,

    /// Rate is unusable (negative, or zero where a divisor is required).
    #[error("invalid rate: {0}")]
    InvalidRate(Decimal),
}

/// A monetary amount: integer minor units plus a currency tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's minor units.
    pub minor_units: i64,
    /// Currency of the amount.
    pub currency: Currency,
}

impl Money {
    /// Create a new amount from minor units.
    pub fn new(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    /// Create a zero amount in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    /// Quantize a decimal value in major units down to minor units.
    pub fn from_decimal(
        value: Decimal,
        currency: Currency,
        rounding: Rounding,
    ) -> Result<Self, MoneyError> {
        let quantized = value.round_dp_with_strategy(currency.scale(), rounding.strategy());
        let minor = (quantized * Decimal::from(currency.minor_per_major()))
            .trunc()
            .to_i64()
            .ok_or(MoneyError::AmountOverflow)?;
        Ok(Self::new(minor, currency))
    }

    /// The amount in major units, at the currency's full scale.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.minor_units, self.currency.scale())
    }

    /// Check if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    /// Check if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.minor_units < 0
    }

    /// Get the absolute value.
    pub fn abs(&self) -> Self {
        Self::new(self.minor_units.abs(), self.currency)
    }

    /// Get the negated amount.
    pub fn negated(&self) -> Self {
        Self::new(-self.minor_units, self.currency)
    }

    /// Checked addition within one currency.
    pub fn checked_add(&self, other: Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(&other)?;
        let minor = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(MoneyError::AmountOverflow)?;
        Ok(Self::new(minor, self.currency))
    }

    /// Checked subtraction within one currency.
    pub fn checked_sub(&self, other: Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(&other)?;
        let minor = self
            .minor_units
            .checked_sub(other.minor_units)
            .ok_or(MoneyError::AmountOverflow)?;
        Ok(Self::new(minor, self.currency))
    }

    /// Multiply by an exchange rate, producing an amount in `target`.
    ///
    /// A zero rate is allowed (a zero-percent fee is a valid configuration);
    /// a negative rate is not.
    pub fn multiply_by_rate(
        &self,
        rate: Decimal,
        target: Currency,
        rounding: Rounding,
    ) -> Result<Money, MoneyError> {
        if rate < Decimal::ZERO {
            return Err(MoneyError::InvalidRate(rate));
        }
        Money::from_decimal(self.to_decimal() * rate, target, rounding)
    }

    /// Divide by an exchange rate, producing an amount in `target`.
    pub fn divide_by_rate(
        &self,
        rate: Decimal,
        target: Currency,
        rounding: Rounding,
    ) -> Result<Money, MoneyError> {
        if rate <= Decimal::ZERO {
            return Err(MoneyError::InvalidRate(rate));
        }
        Money::from_decimal(self.to_decimal() / rate, target, rounding)
    }

    /// Take a percentage of this amount, staying in the same currency.
    pub fn percent_of(&self, percent: Decimal, rounding: Rounding) -> Result<Money, MoneyError> {
        self.multiply_by_rate(percent / Decimal::ONE_HUNDRED, self.currency, rounding)
    }

    /// Compare two amounts of the same currency.
    pub fn cmp_amount(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(self.minor_units.cmp(&other.minor_units))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                expected: self.currency,
                actual: other.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal(), self.currency)
    }
}

impl Add for Money {
    type Output = Result<Money, MoneyError>;

    fn add(self, other: Money) -> Self::Output {
        self.checked_add(other)
    }
}

impl Sub for Money {
    type Output = Result<Money, MoneyError>;

    fn sub(self, other: Money) -> Self::Output {
        self.checked_sub(other)
    }
}
