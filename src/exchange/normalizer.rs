//! Raw-row validation and canonical candle series construction.
//!
//! Rows arrive as JSON arrays across many chunks. Each row must hold exactly
//! six finite numbers in the provider's documented order
//! (timestamp, open, high, low, close, volume); anything else is dropped
//! individually and logged, never escalated. Rows sharing a timestamp are
//! deduplicated last-write-wins in chunk-processing order. The merged set is
//! sorted ascending by timestamp and then reversed, so the canonical series
//! runs most-recent-first. Downstream consumers index positionally and rely
//! on that exact direction.

use crate::exchange::error::FetchError;
use crate::exchange::types::{Candle, RawRow};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::warn;

/// Build the canonical candle series from all raw rows, in the order the
/// chunks were processed.
pub fn normalize(rows: &[RawRow]) -> Result<Vec<Candle>, FetchError> {
    let mut by_timestamp: HashMap<i64, Candle> = HashMap::new();

    for row in rows {
        match parse_row(row) {
            Some((ts, candle)) => {
                // Later chunks win on timestamp collisions.
                by_timestamp.insert(ts, candle);
            }
            None => {
                warn!(?row, "Dropping malformed candle row");
            }
        }
    }

    if by_timestamp.is_empty() {
        return Err(FetchError::NoData);
    }

    let mut candles: Vec<Candle> = by_timestamp.into_values().collect();
    candles.sort_by_key(|c| c.timestamp);
    candles.reverse();

    Ok(candles)
}

/// Parse one row into a candle. Returns `None` for any row that is not an
/// array of exactly six finite numbers with an integer-second timestamp.
fn parse_row(row: &RawRow) -> Option<(i64, Candle)> {
    let fields = row.as_array()?;
    if fields.len() != 6 {
        return None;
    }

    let mut values = [0f64; 6];
    for (i, field) in fields.iter().enumerate() {
        let v = field.as_f64()?;
        if !v.is_finite() {
            return None;
        }
        values[i] = v;
    }

    // A fractional timestamp must not truncate into a neighbor's dedup key.
    if values[0].fract() != 0.0 {
        return None;
    }
    let ts_secs = values[0] as i64;
    let timestamp: DateTime<Utc> = Utc.timestamp_opt(ts_secs, 0).single()?;

    Some((
        ts_secs,
        Candle {
            timestamp,
            open: Decimal::from_f64_retain(values[1])?,
            high: Decimal::from_f64_retain(values[2])?,
            low: Decimal::from_f64_retain(values[3])?,
            close: Decimal::from_f64_retain(values[4])?,
            volume: Decimal::from_f64_retain(values[5])?,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn row(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> RawRow {
        json!([ts, open, high, low, close, volume])
    }

    #[test]
    fn test_row_layout_maps_open_before_low() {
        // The provider row order is (timestamp, open, high, low, close,
        // volume). This test pins the mapping so a change to the alternative
        // (timestamp, low, high, open, ...) reading is deliberate, never an
        // accidental swap.
        let candles = normalize(&[row(1_000, 100.0, 120.0, 90.0, 110.0, 3.5)]).unwrap();
        assert_eq!(candles[0].open, dec!(100));
        assert_eq!(candles[0].high, dec!(120));
        assert_eq!(candles[0].low, dec!(90));
        assert_eq!(candles[0].close, dec!(110));
        assert_eq!(candles[0].volume, dec!(3.5));
    }

    #[test]
    fn test_output_is_most_recent_first() {
        // Input arrives unordered as {t2, t1, t3}; output must be exactly
        // [t3, t2, t1].
        let t1 = 1_000;
        let t2 = 2_000;
        let t3 = 3_000;
        let candles = normalize(&[
            row(t2, 2.0, 2.0, 2.0, 2.0, 1.0),
            row(t1, 1.0, 1.0, 1.0, 1.0, 1.0),
            row(t3, 3.0, 3.0, 3.0, 3.0, 1.0),
        ])
        .unwrap();

        let timestamps: Vec<i64> = candles.iter().map(|c| c.timestamp.timestamp()).collect();
        assert_eq!(timestamps, vec![t3, t2, t1]);
    }

    #[test]
    fn test_dedup_later_row_wins() {
        // Two chunks report the same timestamp with different closes; the
        // row processed later replaces the earlier one.
        let candles = normalize(&[
            row(1_000, 1.0, 1.0, 1.0, 100.0, 1.0),
            row(2_000, 1.0, 1.0, 1.0, 50.0, 1.0),
            row(1_000, 1.0, 1.0, 1.0, 200.0, 1.0),
        ])
        .unwrap();

        assert_eq!(candles.len(), 2);
        let dup = candles
            .iter()
            .find(|c| c.timestamp.timestamp() == 1_000)
            .unwrap();
        assert_eq!(dup.close, dec!(200));
    }

    #[test]
    fn test_malformed_rows_dropped_individually() {
        let candles = normalize(&[
            row(1_000, 1.0, 2.0, 0.5, 1.5, 10.0),
            json!([2_000, 1.0, 2.0]),                          // wrong arity
            json!([3_000, 1.0, "2.0", 0.5, 1.5, 10.0]),        // non-numeric
            json!([4_000, 1.0, f64::NAN, 0.5, 1.5, 10.0]),     // NaN serializes to null
            json!({"timestamp": 5_000}),                       // not an array
            row(6_000, 2.0, 3.0, 1.5, 2.5, 20.0),
        ])
        .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp.timestamp(), 6_000);
        assert_eq!(candles[1].timestamp.timestamp(), 1_000);
    }

    #[test]
    fn test_fractional_timestamps_dropped_not_truncated() {
        // 100.4 and 100.6 are distinct instants; truncating both to 100
        // would silently merge them under one dedup key.
        let err = normalize(&[
            json!([100.4, 1.0, 1.0, 1.0, 10.0, 1.0]),
            json!([100.6, 1.0, 1.0, 1.0, 20.0, 1.0]),
        ])
        .unwrap_err();
        assert!(matches!(err, FetchError::NoData));
    }

    #[test]
    fn test_all_rows_invalid_is_fatal() {
        let err = normalize(&[json!([1, 2]), json!("nope")]).unwrap_err();
        assert!(matches!(err, FetchError::NoData));
    }

    #[test]
    fn test_empty_input_is_fatal() {
        assert!(matches!(normalize(&[]), Err(FetchError::NoData)));
    }
}
