//! Exact decimal arithmetic for costs and usage
//!
//! Every money amount and every usage quantity in the rating core is a
//! [`Decimal`]. Floating point only appears at the API boundary, through
//! [`Decimal::from_f64`] and [`Decimal::to_f64`], both of which fail loudly
//! instead of truncating.

use crate::error::AppError;
use crate::AppResult;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Fixed precision decimal wrapping `rust_decimal::Decimal`
///
/// Equality and ordering compare numeric value, so `1.0 == 1.00`.
/// Serializes to JSON as a string and accepts strings or numbers on input.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Decimal(rust_decimal::Decimal);

impl Decimal {
    pub const ZERO: Decimal = Decimal(rust_decimal::Decimal::ZERO);
    pub const ONE: Decimal = Decimal(rust_decimal::Decimal::ONE);
    pub const NEGATIVE_ONE: Decimal = Decimal(rust_decimal::Decimal::NEGATIVE_ONE);

    /// Build from an integer mantissa and a scale (`new(125, 2)` is 1.25)
    pub fn new(num: i64, scale: u32) -> Self {
        Decimal(rust_decimal::Decimal::new(num, scale))
    }

    /// Access the wrapped value
    pub fn inner(&self) -> rust_decimal::Decimal {
        self.0
    }

    pub fn compare(&self, other: &Decimal) -> Ordering {
        self.0.cmp(&other.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn ceil(&self) -> Decimal {
        Decimal(self.0.ceil())
    }

    pub fn checked_add(self, other: Decimal) -> AppResult<Decimal> {
        self.0
            .checked_add(other.0)
            .map(Decimal)
            .ok_or_else(|| AppError::Overflow(format!("{} + {}", self, other)))
    }

    pub fn checked_sub(self, other: Decimal) -> AppResult<Decimal> {
        self.0
            .checked_sub(other.0)
            .map(Decimal)
            .ok_or_else(|| AppError::Overflow(format!("{} - {}", self, other)))
    }

    pub fn checked_mul(self, other: Decimal) -> AppResult<Decimal> {
        self.0
            .checked_mul(other.0)
            .map(Decimal)
            .ok_or_else(|| AppError::Overflow(format!("{} * {}", self, other)))
    }

    /// Divide, failing on a zero divisor
    pub fn checked_div(self, other: Decimal) -> AppResult<Decimal> {
        if other.is_zero() {
            return Err(AppError::DivisionByZero);
        }
        self.0
            .checked_div(other.0)
            .map(Decimal)
            .ok_or_else(|| AppError::Overflow(format!("{} / {}", self, other)))
    }

    /// Sum two optional values where an absent side seeds the result
    pub fn sum_optional(a: Option<Decimal>, b: Option<Decimal>) -> AppResult<Option<Decimal>> {
        match (a, b) {
            (Some(a), Some(b)) => a.checked_add(b).map(Some),
            (Some(v), None) | (None, Some(v)) => Ok(Some(v)),
            (None, None) => Ok(None),
        }
    }

    /// Round to `decimals` places with the given method
    pub fn round(&self, decimals: u32, method: RoundingMethod) -> Decimal {
        Decimal(self.0.round_dp_with_strategy(decimals, method.strategy()))
    }

    /// Convert from a float through its shortest round-trip text form
    pub fn from_f64(value: f64) -> AppResult<Decimal> {
        if !value.is_finite() {
            return Err(AppError::DecimalConversion(value.to_string()));
        }
        let text = value.to_string();
        rust_decimal::Decimal::from_str(&text)
            .map(Decimal)
            .map_err(|_| AppError::DecimalConversion(text))
    }

    /// Downcast to a float for API output
    ///
    /// Fails when the float does not read back as the same value, so digits
    /// beyond float64 precision are never dropped silently.
    pub fn to_f64(&self) -> AppResult<f64> {
        let inexact = || AppError::FloatConversion(self.to_string());
        let value: f64 = self.0.to_string().parse().map_err(|_| inexact())?;
        if !value.is_finite() {
            return Err(inexact());
        }
        match Decimal::from_f64(value) {
            Ok(back) if back == *self => Ok(value),
            _ => Err(inexact()),
        }
    }

    /// Integer part, failing when it does not fit an `i64`
    pub fn to_i64(&self) -> AppResult<i64> {
        self.0
            .trunc()
            .to_i64()
            .ok_or_else(|| AppError::Overflow(format!("{} does not fit in i64", self)))
    }

    /// Usage quantity in nanoseconds of a duration
    pub fn from_duration(duration: chrono::Duration) -> AppResult<Decimal> {
        duration
            .num_nanoseconds()
            .map(|n| Decimal(rust_decimal::Decimal::from(n)))
            .ok_or_else(|| AppError::Overflow(format!("duration {} in nanoseconds", duration)))
    }

    /// Interpret the value as nanoseconds
    pub fn to_duration(&self) -> AppResult<chrono::Duration> {
        self.to_i64().map(chrono::Duration::nanoseconds)
    }

    /// Parse a usage string
    ///
    /// An empty string is zero, a value ending in a duration unit is parsed
    /// as a duration and returned in nanoseconds, anything else must be a
    /// plain decimal literal.
    pub fn from_usage(usage: &str) -> AppResult<Decimal> {
        if usage.is_empty() {
            return Ok(Decimal::ZERO);
        }
        if usage.ends_with(|c| matches!(c, 's' | 'm' | 'h')) {
            return parse_duration_nanos(usage).map(Decimal);
        }
        usage.parse()
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Decimal {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        rust_decimal::Decimal::from_str(s)
            .or_else(|_| rust_decimal::Decimal::from_scientific(s))
            .map(Decimal)
            .map_err(|_| AppError::DecimalConversion(s.to_string()))
    }
}

impl From<rust_decimal::Decimal> for Decimal {
    fn from(value: rust_decimal::Decimal) -> Self {
        Decimal(value)
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal(rust_decimal::Decimal::from(value))
    }
}

impl From<Decimal> for rust_decimal::Decimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

fn duration_unit_nanos(unit: &str) -> Option<i64> {
    match unit {
        "ns" => Some(1),
        "us" | "\u{00b5}s" | "\u{03bc}s" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60 * 1_000_000_000),
        "h" => Some(3_600 * 1_000_000_000),
        _ => None,
    }
}

/// Parse `[-+]?(number unit)+` into nanoseconds, e.g. `1h30m` or `1.5s`
fn parse_duration_nanos(input: &str) -> AppResult<rust_decimal::Decimal> {
    let invalid = || AppError::InvalidDuration(input.to_string());

    let (negative, mut rest) = match input.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    if rest == "0" {
        return Ok(rust_decimal::Decimal::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = rust_decimal::Decimal::ZERO;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..num_len];
        if !number.chars().any(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let value = rust_decimal::Decimal::from_str(number).map_err(|_| invalid())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        if unit.is_empty() {
            return Err(invalid());
        }
        let factor =
            duration_unit_nanos(unit).ok_or_else(|| AppError::UnknownDurationUnit {
                unit: unit.to_string(),
                input: input.to_string(),
            })?;
        total = value
            .checked_mul(rust_decimal::Decimal::from(factor))
            .and_then(|v| total.checked_add(v))
            .ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }

    let total = total.trunc();
    Ok(if negative { -total } else { total })
}

/// Rounding method applied by cost correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundingMethod {
    /// Half to even (banker's rounding)
    ToNearestEven,
    /// Half away from zero
    #[default]
    ToNearestAway,
    /// Half toward zero
    ToNearestTowardZero,
    /// Truncate
    ToZero,
    AwayFromZero,
    ToNegativeInf,
    ToPositiveInf,
}

impl RoundingMethod {
    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMethod::ToNearestEven => RoundingStrategy::MidpointNearestEven,
            RoundingMethod::ToNearestAway => RoundingStrategy::MidpointAwayFromZero,
            RoundingMethod::ToNearestTowardZero => RoundingStrategy::MidpointTowardZero,
            RoundingMethod::ToZero => RoundingStrategy::ToZero,
            RoundingMethod::AwayFromZero => RoundingStrategy::AwayFromZero,
            RoundingMethod::ToNegativeInf => RoundingStrategy::ToNegativeInfinity,
            RoundingMethod::ToPositiveInf => RoundingStrategy::ToPositiveInfinity,
        }
    }
}

impl fmt::Display for RoundingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundingMethod::ToNearestEven => write!(f, "*toNearestEven"),
            RoundingMethod::ToNearestAway => write!(f, "*toNearestAway"),
            RoundingMethod::ToNearestTowardZero => write!(f, "*toNearestTowardZero"),
            RoundingMethod::ToZero => write!(f, "*toZero"),
            RoundingMethod::AwayFromZero => write!(f, "*awayFromZero"),
            RoundingMethod::ToNegativeInf => write!(f, "*toNegativeInf"),
            RoundingMethod::ToPositiveInf => write!(f, "*toPositiveInf"),
        }
    }
}

impl FromStr for RoundingMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*toNearestEven" => Ok(RoundingMethod::ToNearestEven),
            "*toNearestAway" => Ok(RoundingMethod::ToNearestAway),
            "*toNearestTowardZero" => Ok(RoundingMethod::ToNearestTowardZero),
            "*toZero" => Ok(RoundingMethod::ToZero),
            "*awayFromZero" => Ok(RoundingMethod::AwayFromZero),
            "*toNegativeInf" => Ok(RoundingMethod::ToNegativeInf),
            "*toPositiveInf" => Ok(RoundingMethod::ToPositiveInf),
            _ => Err(AppError::UnsupportedRounding(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_usage() {
        assert_eq!(Decimal::from_usage("").unwrap(), Decimal::ZERO);
        assert_eq!(Decimal::from_usage("2").unwrap(), Decimal::from(2));
        assert_eq!(
            Decimal::from_usage("12.44").unwrap(),
            Decimal::from(dec!(12.44))
        );
        assert_eq!(
            Decimal::from_usage("12m").unwrap(),
            Decimal::from(720_000_000_000)
        );
        assert_eq!(
            Decimal::from_usage("1h30m").unwrap(),
            Decimal::from(5_400_000_000_000)
        );
        assert_eq!(
            Decimal::from_usage("1.5s").unwrap(),
            Decimal::from(1_500_000_000)
        );
    }

    #[test]
    fn test_from_usage_errors() {
        assert_eq!(
            Decimal::from_usage("not_a_number").unwrap_err().to_string(),
            "can't convert <not_a_number> to decimal"
        );
        assert_eq!(
            Decimal::from_usage("12tts").unwrap_err(),
            AppError::UnknownDurationUnit {
                unit: "tts".to_string(),
                input: "12tts".to_string()
            }
        );
        assert!(matches!(
            Decimal::from_usage("s").unwrap_err(),
            AppError::InvalidDuration(_)
        ));
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Decimal::from(dec!(0.0036));
        let b = Decimal::from(6);
        assert_eq!(a.checked_mul(b).unwrap(), Decimal::from(dec!(0.0216)));
        assert_eq!(
            Decimal::from(1).checked_div(Decimal::ZERO).unwrap_err(),
            AppError::DivisionByZero
        );
        assert_eq!(
            Decimal::from(dec!(1.5))
                .checked_sub(Decimal::from(2))
                .unwrap(),
            Decimal::from(dec!(-0.5))
        );
    }

    #[test]
    fn test_sum_optional_seeds_from_present_side() {
        let two = Decimal::from(2);
        assert_eq!(Decimal::sum_optional(None, Some(two)).unwrap(), Some(two));
        assert_eq!(Decimal::sum_optional(Some(two), None).unwrap(), Some(two));
        assert_eq!(
            Decimal::sum_optional(Some(two), Some(two)).unwrap(),
            Some(Decimal::from(4))
        );
        assert_eq!(Decimal::sum_optional(None, None).unwrap(), None);
    }

    #[test]
    fn test_float_conversions() {
        assert_eq!(
            Decimal::from_f64(0.1).unwrap(),
            Decimal::from(dec!(0.1))
        );
        assert_eq!(Decimal::from_f64(-3.25).unwrap().to_f64().unwrap(), -3.25);
        assert!(Decimal::from_f64(f64::NAN).is_err());
        assert!(Decimal::from_f64(f64::INFINITY).is_err());
        assert!(Decimal::from_f64(1e300).is_err());
    }

    #[test]
    fn test_to_f64_rejects_lost_digits() {
        let long: Decimal = "0.12345678901234567890123".parse().unwrap();
        assert_eq!(
            long.to_f64().unwrap_err(),
            AppError::FloatConversion("0.12345678901234567890123".to_string())
        );
        let third = Decimal::ONE.checked_div(Decimal::from(3)).unwrap();
        assert!(matches!(third.to_f64(), Err(AppError::FloatConversion(_))));

        assert_eq!(Decimal::from(dec!(0.30)).to_f64().unwrap(), 0.3);
        assert_eq!(Decimal::from(60_000_000_000).to_f64().unwrap(), 6e10);
        assert_eq!(Decimal::from(dec!(1.20216)).to_f64().unwrap(), 1.20216);
    }

    #[test]
    fn test_rounding_methods() {
        let v = Decimal::from(dec!(2.345));
        assert_eq!(
            v.round(2, RoundingMethod::ToNearestEven),
            Decimal::from(dec!(2.34))
        );
        assert_eq!(
            v.round(2, RoundingMethod::ToNearestAway),
            Decimal::from(dec!(2.35))
        );
        assert_eq!(
            v.round(2, RoundingMethod::ToNearestTowardZero),
            Decimal::from(dec!(2.34))
        );
        assert_eq!(v.round(1, RoundingMethod::ToZero), Decimal::from(dec!(2.3)));
        assert_eq!(
            v.round(1, RoundingMethod::ToPositiveInf),
            Decimal::from(dec!(2.4))
        );
        assert_eq!(
            Decimal::from(dec!(-2.31)).round(1, RoundingMethod::ToNegativeInf),
            Decimal::from(dec!(-2.4))
        );
    }

    #[test]
    fn test_rounding_method_names() {
        for name in [
            "*toNearestEven",
            "*toNearestAway",
            "*toNearestTowardZero",
            "*toZero",
            "*awayFromZero",
            "*toNegativeInf",
            "*toPositiveInf",
        ] {
            let method: RoundingMethod = name.parse().unwrap();
            assert_eq!(method.to_string(), name);
        }
        assert_eq!(
            "*up".parse::<RoundingMethod>().unwrap_err(),
            AppError::UnsupportedRounding("*up".to_string())
        );
    }

    #[test]
    fn test_json_is_textual() {
        let v = Decimal::from(dec!(0.00072));
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"0.00072\"");
        let back: Decimal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        let from_number: Decimal = serde_json::from_str("12").unwrap();
        assert_eq!(from_number, Decimal::from(12));
    }

    #[test]
    fn test_duration_conversion() {
        let d = chrono::Duration::seconds(90);
        let v = Decimal::from_duration(d).unwrap();
        assert_eq!(v, Decimal::from(90_000_000_000));
        assert_eq!(v.to_duration().unwrap(), d);
    }
}
