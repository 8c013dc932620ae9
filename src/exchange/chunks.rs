//! Time-range partitioning for chunked candle requests.
//!
//! The exchange caps the number of candles returned per request, so a long
//! range is split into contiguous sub-ranges, each short enough to fit. The
//! cursor advances one granularity step past each chunk end: the provider's
//! range is inclusive at both bounds, and without the gap the boundary candle
//! would be requested twice.

use crate::exchange::error::FetchError;
use crate::exchange::types::Chunk;
use chrono::{DateTime, Duration, Utc};

/// Partition `[start, end)` into chunks of at most `max_candles` candles.
///
/// Returned chunks are strictly ordered by start, non-overlapping, and
/// separated by exactly one granularity step.
pub fn plan_chunks(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity_secs: i64,
    max_candles: u32,
) -> Result<Vec<Chunk>, FetchError> {
    if start >= end {
        return Err(FetchError::InvalidRange {
            start: start.to_rfc3339(),
            end: end.to_rfc3339(),
        });
    }

    let max_span = Duration::seconds(granularity_secs * max_candles as i64);
    let step = Duration::seconds(granularity_secs);

    let mut chunks = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let chunk_end = (cursor + max_span).min(end);
        chunks.push(Chunk {
            start: cursor,
            end: chunk_end,
        });
        cursor = chunk_end + step;
    }

    Ok(chunks)
}
