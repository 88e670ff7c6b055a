use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(Decimal);

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Invalid amount: '{0}'")]
pub struct MoneyParseError(pub String);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    /// Integer minor units. Saturates at the `i64` bounds.
    pub fn to_cents(self) -> i64 {
        let cents = (self.0 * Decimal::ONE_HUNDRED).round();
        cents.to_i64().unwrap_or(if cents.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
    }

    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.round_dp(2))
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    /// Plain `12.34` rendering without the currency sign.
    pub fn plain(self) -> String {
        format!("{:.2}", self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            write!(f, "-${:.2}", self.0.abs())
        } else {
            write!(f, "${:.2}", self.0)
        }
    }
}

impl FromStr for Money {
    type Err = MoneyParseError;

    /// Accepts `$`, thousands separators, surrounding spaces and accounting
    /// parentheses for negatives: `(1,234.50)` is `-1234.50`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, body) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
            (true, &trimmed[1..trimmed.len() - 1])
        } else {
            (false, trimmed)
        };
        let cleaned = body.replace([',', '$', ' '], "");
        let dec = Decimal::from_str(&cleaned).map_err(|_| MoneyParseError(s.to_string()))?;
        let money = Money::from_decimal(dec);
        Ok(if negative { -money } else { money })
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |a, b| a + b)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_round_trip_is_exact() {
        assert_eq!(Money::from_cents(4200).to_cents(), 4200);
        assert_eq!(Money::from_cents(-1).to_cents(), -1);
    }

    #[test]
    fn parse_plain_and_decorated() {
        assert_eq!("42".parse::<Money>().unwrap(), Money::from_cents(4200));
        assert_eq!("$1,234.56".parse::<Money>().unwrap(), Money::from_cents(123456));
        assert_eq!("-5.00".parse::<Money>().unwrap(), Money::from_cents(-500));
        assert_eq!("(75.25)".parse::<Money>().unwrap(), Money::from_cents(-7525));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("twelve".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
    }

    #[test]
    fn display_with_sign() {
        assert_eq!(Money::from_cents(7500).to_string(), "$75.00");
        assert_eq!(Money::from_cents(-1550).to_string(), "-$15.50");
        assert_eq!(Money::from_cents(7500).plain(), "75.00");
    }

    #[test]
    fn sum_and_negate() {
        let total: Money = [4000, 4000, 4000].iter().map(|c| Money::from_cents(*c)).sum();
        assert_eq!(total, Money::from_cents(12000));
        assert_eq!(-total, Money::from_cents(-12000));
        assert!((-total).is_negative());
        assert!(!Money::zero().is_negative());
    }
}
