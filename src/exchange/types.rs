//! Core data types for the candle acquisition pipeline.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle timeframe supported by the exchange endpoint.
///
/// Maps one-to-one onto the provider's accepted `granularity` values, so an
/// unknown timeframe is unrepresentable rather than a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Timeframe {
    #[value(name = "1m")]
    #[serde(rename = "1m")]
    OneMinute,
    #[value(name = "5m")]
    #[serde(rename = "5m")]
    FiveMinutes,
    #[value(name = "15m")]
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[value(name = "1h")]
    #[serde(rename = "1h")]
    OneHour,
    #[value(name = "4h")]
    #[serde(rename = "4h")]
    FourHours,
    #[value(name = "1d")]
    #[serde(rename = "1d")]
    OneDay,
}

impl Timeframe {
    /// Seconds represented by one candle of this timeframe.
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::OneMinute => 60,
            Timeframe::FiveMinutes => 300,
            Timeframe::FifteenMinutes => 900,
            Timeframe::OneHour => 3_600,
            Timeframe::FourHours => 14_400,
            Timeframe::OneDay => 86_400,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHours => "4h",
            Timeframe::OneDay => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One OHLCV aggregate over a fixed time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A bounded sub-range of a requested time span, sized so a single request
/// stays within the provider's maximum rows per call.
///
/// Invariant: `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// An unvalidated row as returned by the provider: a JSON array that should
/// contain exactly six finite numbers. Validation happens in the normalizer.
pub type RawRow = serde_json::Value;
