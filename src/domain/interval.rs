//! Candle Intervals
//!
//! The fixed set of kline intervals clients may request. Anything outside
//! this set is rejected before any upstream traffic is produced.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Accepted candle interval for kline subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    /// One minute.
    OneMinute,
    /// Three minutes.
    ThreeMinutes,
    /// Five minutes.
    FiveMinutes,
    /// Fifteen minutes.
    FifteenMinutes,
    /// Thirty minutes.
    ThirtyMinutes,
    /// One hour.
    OneHour,
    /// One day.
    OneDay,
    /// One week.
    OneWeek,
    /// One month.
    OneMonth,
}

impl CandleInterval {
    /// All accepted intervals.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::OneMinute,
            Self::ThreeMinutes,
            Self::FiveMinutes,
            Self::FifteenMinutes,
            Self::ThirtyMinutes,
            Self::OneHour,
            Self::OneDay,
            Self::OneWeek,
            Self::OneMonth,
        ]
    }

    /// Wire form as used in kline stream names (`1m`, `1h`, `1M`, ...).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for interval strings outside the accepted set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported candle interval: {0}")]
pub struct ParseIntervalError(pub String);

impl FromStr for CandleInterval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Case sensitive on purpose: "1m" and "1M" are different intervals.
        match s.trim() {
            "1m" => Ok(Self::OneMinute),
            "3m" => Ok(Self::ThreeMinutes),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "30m" => Ok(Self::ThirtyMinutes),
            "1h" => Ok(Self::OneHour),
            "1d" => Ok(Self::OneDay),
            "1w" => Ok(Self::OneWeek),
            "1M" => Ok(Self::OneMonth),
            other => Err(ParseIntervalError(other.to_string())),
        }
    }
}
