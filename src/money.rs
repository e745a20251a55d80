//! Fixed-scale decimal arithmetic for monetary amounts and interest rates.
//!
//! Amounts are stored as `i64` minor units (scale 2, e.g. cents) and rates as
//! `i64` micro-units (scale 6) so that every quantity that ever touches the
//! ledger round-trips through a canonical decimal string instead of a float.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MONEY_SCALE: i64 = 100; // 10^2
const RATE_SCALE: i64 = 1_000_000; // 10^6

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecimalError {
    #[error("invalid decimal literal: {0}")]
    Parse(String),
}

/// A monetary amount, quantized to 2 fractional digits, half-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

/// An annual interest rate, quantized to 6 fractional digits, half-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor_units(units: i64) -> Money {
        Money(units)
    }

    pub fn minor_units(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn min(self, other: Money) -> Money {
        if self <= other { self } else { other }
    }
}

impl Rate {
    pub const ZERO: Rate = Rate(0);

    pub fn micro_units(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_fixed(f, self.0, MONEY_SCALE, 2)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_fixed(f, self.0, RATE_SCALE, 6)
    }
}

fn format_fixed(f: &mut fmt::Formatter<'_>, units: i64, scale: i64, digits: usize) -> fmt::Result {
    let sign = if units < 0 { "-" } else { "" };
    let magnitude = units.unsigned_abs();
    let whole = magnitude / scale as u64;
    let frac = magnitude % scale as u64;
    write!(f, "{sign}{whole}.{frac:0width$}", width = digits)
}

impl FromStr for Money {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s, MONEY_SCALE).map(Money)
    }
}

impl FromStr for Rate {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s, RATE_SCALE).map(Rate)
    }
}

/// Parses a decimal literal into fixed-point units at the given scale,
/// rounding half-up if the literal carries more fractional digits than the
/// scale supports.
fn parse_fixed(s: &str, scale: i64) -> Result<i64, DecimalError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DecimalError::Parse(s.to_string()));
    }
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, s.strip_prefix('+').unwrap_or(s)),
    };

    let mut parts = rest.splitn(2, '.');
    let whole_part = parts.next().unwrap_or("0");
    let frac_part = parts.next().unwrap_or("");
    if parts.next().is_some() || whole_part.is_empty() && frac_part.is_empty() {
        return Err(DecimalError::Parse(s.to_string()));
    }
    if !whole_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(DecimalError::Parse(s.to_string()));
    }

    let whole: i64 = if whole_part.is_empty() {
        0
    } else {
        whole_part
            .parse()
            .map_err(|_| DecimalError::Parse(s.to_string()))?
    };

    // scale digits kept verbatim, remainder rounded half-up into the last
    // kept digit.
    let scale_digits = scale.to_string().len() as usize - 1;
    let (keep, rounding): (&str, &str) = if frac_part.len() <= scale_digits {
        (frac_part, "")
    } else {
        frac_part.split_at(scale_digits)
    };
    let mut frac: i64 = if keep.is_empty() {
        0
    } else {
        format!("{:0<width$}", keep, width = scale_digits)
            .parse()
            .map_err(|_| DecimalError::Parse(s.to_string()))?
    };

    if let Some(next_digit) = rounding.chars().next() {
        if next_digit >= '5' {
            frac += 1;
        }
    }

    let mut units = whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| DecimalError::Parse(s.to_string()))?;
    if frac == scale {
        units = whole
            .checked_add(1)
            .and_then(|w| w.checked_mul(scale))
            .ok_or_else(|| DecimalError::Parse(s.to_string()))?;
    }

    Ok(sign * units)
}

impl Serialize for Money {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Money::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Rate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Rate::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Quantizes a raw decimal literal to money scale (2 digits), half-up.
pub fn q(raw: &str) -> Result<Money, DecimalError> {
    raw.parse()
}

/// Quantizes a raw decimal literal to rate scale (6 digits), half-up.
pub fn q_rate(raw: &str) -> Result<Rate, DecimalError> {
    raw.parse()
}

/// Computes `q(balance * rate * days / basis)`, dividing before quantizing
/// so rounding only happens once per accrual, per the day-count formula in
/// the ledger's interest accrual rule.
pub fn accrual_interest(balance: Money, rate: Rate, days: i64, basis: i64) -> Money {
    // balance (scale 2) * rate (scale 6) * days / basis, then rescale back
    // to scale 2. Intermediate product uses i128 to avoid overflow.
    let numerator = (balance.0 as i128) * (rate.0 as i128) * (days as i128);
    let denominator = (RATE_SCALE as i128) * (basis as i128);

    // numerator/denominator is already in money-scale units (scale 2)
    // because balance already carries MONEY_SCALE; round half-up.
    let mut quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.unsigned_abs() * 2 >= denominator.unsigned_abs() {
        quotient += numerator.signum();
    }

    Money(quotient as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_round_trip() {
        let m: Money = "1234.56".parse().unwrap();
        assert_eq!(m.to_string(), "1234.56");
        assert_eq!(m.minor_units(), 123_456);
    }

    #[test]
    fn rounds_half_up_on_parse() {
        let m: Money = "1.005".parse().unwrap();
        assert_eq!(m.to_string(), "1.01");
        let m: Money = "1.004".parse().unwrap();
        assert_eq!(m.to_string(), "1.00");
    }

    #[test]
    fn rate_has_six_digit_scale() {
        let r: Rate = "0.1".parse().unwrap();
        assert_eq!(r.to_string(), "0.100000");
    }

    #[test]
    fn negative_amounts_round_trip() {
        let m: Money = "-5.50".parse().unwrap();
        assert_eq!(m.to_string(), "-5.50");
    }

    #[test]
    fn accrual_matches_scenario_s1() {
        let balance: Money = "100.00".parse().unwrap();
        let rate: Rate = "0.100000".parse().unwrap();
        let interest = accrual_interest(balance, rate, 10, 365);
        assert_eq!(interest.to_string(), "0.27");
    }

    #[test]
    fn accrual_matches_scenario_s2() {
        let principal: Money = "1000.00".parse().unwrap();
        let rate: Rate = "0.120000".parse().unwrap();
        let interest = accrual_interest(principal, rate, 30, 365);
        assert_eq!(interest.to_string(), "9.86");
    }
}
