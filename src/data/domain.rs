use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{error::ConfigError, float_newtype_ops, newtype_from};

// ================================================================================================
// Domain Strong Types (NewTypes)
// ================================================================================================

/// Represents a price level in the quote currency.
///
/// Used for: Open, High, Low, Close, box sizes and range thresholds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Price(pub f64);

/// Represents traded base-asset volume of one bar.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Volume(pub f64);

/// Spacing of the virtual timeline in milliseconds.
///
/// Bars outside of resident data are synthesized on this lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval(pub i64);

newtype_from!(Price => f64, Volume => f64, Interval => i64);
float_newtype_ops!(Price, Volume);

impl Interval {
    pub const fn millis(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl From<Period> for Interval {
    fn from(period: Period) -> Self {
        Self(period.millis())
    }
}

impl From<chrono::TimeDelta> for Interval {
    fn from(delta: chrono::TimeDelta) -> Self {
        Self(delta.num_milliseconds())
    }
}

// ================================================================================================
// Period
// ================================================================================================

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Chart resolution. Months and weeks are approximated as 30 and 7 days.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Deserialize, Serialize, PartialOrd, Ord)]
pub enum Period {
    Second(u8),
    Minute(u8),
    Hour(u8),
    Day(u8),
    Week(u8),
    Month(u8),
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Second(n) => write!(f, "{n}s"),
            Period::Minute(n) => write!(f, "{n}m"),
            Period::Hour(n) => write!(f, "{n}h"),
            Period::Day(n) => write!(f, "{n}d"),
            Period::Week(n) => write!(f, "{n}w"),
            Period::Month(n) => write!(f, "{n}mo"),
        }
    }
}

impl Period {
    pub fn millis(self) -> i64 {
        match self {
            Period::Second(n) => n as i64 * SECOND_MS,
            Period::Minute(n) => n as i64 * MINUTE_MS,
            Period::Hour(n) => n as i64 * HOUR_MS,
            Period::Day(n) => n as i64 * DAY_MS,
            Period::Week(n) => n as i64 * 7 * DAY_MS,
            Period::Month(n) => n as i64 * 30 * DAY_MS,
        }
    }
}

impl FromStr for Period {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ConfigError::InvalidPeriod(s.to_string()))?;
        let (digits, unit) = s.split_at(split);
        let n: u8 = digits
            .parse()
            .map_err(|_| ConfigError::InvalidPeriod(s.to_string()))?;
        if n == 0 {
            return Err(ConfigError::InvalidPeriod(s.to_string()));
        }
        match unit {
            "s" => Ok(Period::Second(n)),
            "m" => Ok(Period::Minute(n)),
            "h" => Ok(Period::Hour(n)),
            "d" => Ok(Period::Day(n)),
            "w" => Ok(Period::Week(n)),
            "mo" => Ok(Period::Month(n)),
            _ => Err(ConfigError::InvalidPeriod(s.to_string())),
        }
    }
}

// ================================================================================================
// Value Accessor
// ================================================================================================

/// Selects which value of a candle feeds an indicator.
///
/// Replaces a global accessor registry: the consumer receives the field at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SourceField {
    Open,
    High,
    Low,
    #[default]
    Close,
    /// `(high + low + close) / 3`
    Typical,
    /// A named extension field such as `"tr"`.
    Extension(String),
}

impl fmt::Display for SourceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceField::Open => f.write_str("open"),
            SourceField::High => f.write_str("high"),
            SourceField::Low => f.write_str("low"),
            SourceField::Close => f.write_str("close"),
            SourceField::Typical => f.write_str("typical"),
            SourceField::Extension(name) => write!(f, "ext:{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parses_and_displays() {
        let p: Period = "4h".parse().unwrap();
        assert_eq!(p, Period::Hour(4));
        assert_eq!(p.to_string(), "4h");
        assert_eq!("1mo".parse::<Period>().unwrap(), Period::Month(1));
        assert_eq!(Interval::from(Period::Day(1)).millis(), DAY_MS);
    }

    #[test]
    fn test_period_rejects_garbage() {
        assert!("".parse::<Period>().is_err());
        assert!("0m".parse::<Period>().is_err());
        assert!("15".parse::<Period>().is_err());
        assert!("3y".parse::<Period>().is_err());
    }

    #[test]
    fn test_price_arithmetic() {
        let p = Price(10.0) + Price(2.5) - 1.0;
        assert_eq!(p, Price(11.5));
        assert_eq!((-p).abs(), Price(11.5));
        assert_eq!(Price(1.0).max(Price(2.0)), Price(2.0));
    }
}
