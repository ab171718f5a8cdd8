//! Conversion between decimal currency amounts and the gateway's integer minor units.
//!
//! Three converter families exist because the gateway treats currencies in three
//! different ways:
//!
//! * two-decimal currencies (USD, EUR, ...) are scaled by 100;
//! * zero-decimal currencies (JPY, KRW, ...) map 1:1;
//! * fractionless currencies (ISK, HUF, ...) are sent scaled by 100 like
//!   two-decimal ones, but the gateway only accepts whole units.
//!
//! [`CompositeConverter`] picks the first applicable converter in priority order.

use crate::error::{ReconcileError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "VND", "VUV", "XAF",
    "XOF", "XPF",
];

pub const FRACTIONLESS_CURRENCIES: &[&str] = &["HUF", "ISK", "TWD", "UGX"];

/// How amounts with more precision than the gateway accepts are rounded.
///
/// | Mode | Behaviour | `2.345 -> 2 dp` | `-2.345 -> 2 dp` |
/// |---|---|---|---|
/// | `HalfUp` | midpoint away from zero | 2.35 | -2.35 |
/// | `HalfDown` | midpoint toward zero | 2.34 | -2.34 |
/// | `HalfEven` | midpoint to even (banker's) | 2.34 | -2.34 |
/// | `Truncate` | toward zero | 2.34 | -2.34 |
/// | `Ceiling` | toward positive infinity | 2.35 | -2.34 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundingMode {
    #[default]
    HalfUp,
    HalfDown,
    HalfEven,
    Truncate,
    Ceiling,
}

impl RoundingMode {
    pub fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfDown => RoundingStrategy::MidpointTowardZero,
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingMode::Truncate => RoundingStrategy::ToZero,
            RoundingMode::Ceiling => RoundingStrategy::ToPositiveInfinity,
        }
    }

    pub fn round(self, amount: Decimal, dp: u32) -> Decimal {
        amount.round_dp_with_strategy(dp, self.strategy())
    }
}

impl FromStr for RoundingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "half-up" => Ok(RoundingMode::HalfUp),
            "half-down" => Ok(RoundingMode::HalfDown),
            "half-even" => Ok(RoundingMode::HalfEven),
            "truncate" => Ok(RoundingMode::Truncate),
            "ceiling" => Ok(RoundingMode::Ceiling),
            other => Err(format!("unknown rounding mode: {other}")),
        }
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundingMode::HalfUp => "half-up",
            RoundingMode::HalfDown => "half-down",
            RoundingMode::HalfEven => "half-even",
            RoundingMode::Truncate => "truncate",
            RoundingMode::Ceiling => "ceiling",
        };
        f.write_str(name)
    }
}

pub trait AmountConverter: Send + Sync {
    /// Pure predicate, evaluated in priority order by [`CompositeConverter`].
    fn is_applicable(&self, currency: &str) -> bool;

    fn to_minor_units(&self, amount: Decimal, currency: &str) -> Result<i64>;

    fn from_minor_units(&self, units: i64, currency: &str) -> Result<Decimal>;
}

fn normalize(currency: &str) -> String {
    currency.trim().to_ascii_uppercase()
}

fn is_iso_code(currency: &str) -> bool {
    let currency = currency.trim();
    currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic())
}

fn reject_negative(amount: Decimal, currency: &str) -> Result<()> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ReconcileError::InvalidAmount {
            amount,
            currency: normalize(currency),
            reason: "amount must not be negative",
        });
    }
    Ok(())
}

fn out_of_range(amount: Decimal, currency: &str) -> ReconcileError {
    ReconcileError::InvalidAmount {
        amount,
        currency: normalize(currency),
        reason: "amount is out of range",
    }
}

fn to_i64(value: Decimal, amount: Decimal, currency: &str) -> Result<i64> {
    value.to_i64().ok_or_else(|| out_of_range(amount, currency))
}

/// Scales a whole or two-decimal amount to hundredths, failing instead of overflowing.
fn scale_to_hundredths(value: Decimal, amount: Decimal, currency: &str) -> Result<i64> {
    let scaled = value
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(|| out_of_range(amount, currency))?;
    to_i64(scaled, amount, currency)
}

/// Scales by 100. Applies to any well-formed ISO code, so it belongs last in a composite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoDecimalConverter {
    rounding: RoundingMode,
}

impl TwoDecimalConverter {
    pub fn new(rounding: RoundingMode) -> Self {
        Self { rounding }
    }
}

impl AmountConverter for TwoDecimalConverter {
    fn is_applicable(&self, currency: &str) -> bool {
        is_iso_code(currency)
    }

    fn to_minor_units(&self, amount: Decimal, currency: &str) -> Result<i64> {
        reject_negative(amount, currency)?;
        scale_to_hundredths(self.rounding.round(amount, 2), amount, currency)
    }

    fn from_minor_units(&self, units: i64, _currency: &str) -> Result<Decimal> {
        Ok(Decimal::new(units, 2))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroDecimalConverter {
    rounding: RoundingMode,
}

impl ZeroDecimalConverter {
    pub fn new(rounding: RoundingMode) -> Self {
        Self { rounding }
    }
}

impl AmountConverter for ZeroDecimalConverter {
    fn is_applicable(&self, currency: &str) -> bool {
        ZERO_DECIMAL_CURRENCIES.contains(&normalize(currency).as_str())
    }

    fn to_minor_units(&self, amount: Decimal, currency: &str) -> Result<i64> {
        reject_negative(amount, currency)?;
        to_i64(self.rounding.round(amount, 0), amount, currency)
    }

    fn from_minor_units(&self, units: i64, _currency: &str) -> Result<Decimal> {
        Ok(Decimal::from(units))
    }
}

/// Two-decimal wire format, whole units only.
///
/// Fractional amounts are rejected unless the converter was built with
/// [`FractionlessConverter::allow_rounding`], in which case they are rounded to a
/// whole unit with the configured mode before scaling.
#[derive(Debug, Clone, Copy, Default)]
pub struct FractionlessConverter {
    rounding: RoundingMode,
    allow_rounding: bool,
}

impl FractionlessConverter {
    pub fn new(rounding: RoundingMode) -> Self {
        Self {
            rounding,
            allow_rounding: false,
        }
    }

    pub fn allow_rounding(mut self) -> Self {
        self.allow_rounding = true;
        self
    }
}

impl AmountConverter for FractionlessConverter {
    fn is_applicable(&self, currency: &str) -> bool {
        FRACTIONLESS_CURRENCIES.contains(&normalize(currency).as_str())
    }

    fn to_minor_units(&self, amount: Decimal, currency: &str) -> Result<i64> {
        reject_negative(amount, currency)?;
        if !self.allow_rounding && !amount.fract().is_zero() {
            return Err(ReconcileError::InvalidAmount {
                amount,
                currency: normalize(currency),
                reason: "currency does not accept fractional amounts",
            });
        }
        scale_to_hundredths(self.rounding.round(amount, 0), amount, currency)
    }

    fn from_minor_units(&self, units: i64, _currency: &str) -> Result<Decimal> {
        Ok(self.rounding.round(Decimal::new(units, 2), 0))
    }
}

/// Ordered list of converters; the first applicable one wins.
pub struct CompositeConverter {
    converters: Vec<Box<dyn AmountConverter>>,
}

impl CompositeConverter {
    pub fn new(converters: Vec<Box<dyn AmountConverter>>) -> Self {
        Self { converters }
    }

    /// Fractionless, then zero-decimal, then two-decimal as the catch-all.
    pub fn standard(rounding: RoundingMode) -> Self {
        Self::new(vec![
            Box::new(FractionlessConverter::new(rounding)),
            Box::new(ZeroDecimalConverter::new(rounding)),
            Box::new(TwoDecimalConverter::new(rounding)),
        ])
    }

    fn select(&self, currency: &str) -> Result<&dyn AmountConverter> {
        self.converters
            .iter()
            .find(|c| c.is_applicable(currency))
            .map(|c| c.as_ref())
            .ok_or_else(|| ReconcileError::NoConverter(currency.to_string()))
    }
}

impl AmountConverter for CompositeConverter {
    fn is_applicable(&self, currency: &str) -> bool {
        self.converters.iter().any(|c| c.is_applicable(currency))
    }

    fn to_minor_units(&self, amount: Decimal, currency: &str) -> Result<i64> {
        self.select(currency)?.to_minor_units(amount, currency)
    }

    fn from_minor_units(&self, units: i64, currency: &str) -> Result<Decimal> {
        self.select(currency)?.from_minor_units(units, currency)
    }
}
