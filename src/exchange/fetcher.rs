//! Retry-aware sequential chunk fetching.
//!
//! Chunks are fetched strictly in order: last-write-wins deduplication and
//! the consecutive-failure counter both depend on sequential processing.
//! Every wait (retry backoff, rate-limit compliance, inter-chunk pacing) is a
//! cooperative suspension that also listens for cancellation.

use crate::config::FetchConfig;
use crate::exchange::chunks::plan_chunks;
use crate::exchange::client::CandleSource;
use crate::exchange::error::FetchError;
use crate::exchange::normalizer::normalize;
use crate::exchange::types::{Candle, Chunk, RawRow, Timeframe};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Fetches a complete historical candle series through a [`CandleSource`].
pub struct HistoricalFetcher<C: CandleSource> {
    source: C,
    config: FetchConfig,
}

impl<C: CandleSource> HistoricalFetcher<C> {
    pub fn new(source: C, config: FetchConfig) -> Self {
        Self { source, config }
    }

    /// Fetch and normalize all candles in `[start, end)`.
    ///
    /// Returns the canonical most-recent-first series, or the first fatal
    /// error. Partial progress is never returned: five consecutive chunk
    /// failures abort the whole fetch and discard accumulated rows.
    pub async fn fetch(
        &self,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candle>, FetchError> {
        let granularity = timeframe.seconds();
        let chunks = plan_chunks(start, end, granularity, self.config.max_candles_per_request)?;

        info!(
            chunks = chunks.len(),
            timeframe = %timeframe,
            %start,
            %end,
            "Starting historical fetch"
        );

        let mut all_rows: Vec<RawRow> = Vec::new();
        let mut consecutive_failures: u32 = 0;

        for chunk in &chunks {
            match self.fetch_chunk(chunk, granularity, cancel).await {
                Ok(rows) => {
                    consecutive_failures = 0;
                    let pacing = self.pacing_delay(rows.len());
                    all_rows.extend(rows);
                    // Voluntary pacing between chunks, proportional to the
                    // amount the provider just served us.
                    self.wait(pacing, cancel).await?;
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(err) => {
                    consecutive_failures += 1;
                    error!(
                        %err,
                        chunk_start = %chunk.start,
                        chunk_end = %chunk.end,
                        consecutive_failures,
                        "Chunk failed"
                    );

                    if consecutive_failures >= self.config.max_consecutive_errors {
                        return Err(FetchError::ConsecutiveFailures);
                    }

                    self.wait(exponential(self.base_delay(), consecutive_failures), cancel)
                        .await?;
                }
            }
        }

        normalize(&all_rows)
    }

    /// Obtain raw rows for one chunk, retrying transient failures up to the
    /// attempt budget. Rate-limited attempts wait out the provider's
    /// suggestion (or the backoff, whichever is longer) without recording a
    /// failure. 404/400 are terminal for the chunk.
    async fn fetch_chunk(
        &self,
        chunk: &Chunk,
        granularity_secs: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawRow>, FetchError> {
        let mut last_error: Option<FetchError> = None;

        for attempt in 0..self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            match self.source.request_candles(chunk, granularity_secs).await {
                Ok(rows) => return Ok(rows),
                Err(FetchError::RateLimited { retry_after }) => {
                    let wait = rate_limit_wait(retry_after, self.base_delay(), attempt);
                    warn!(
                        wait_secs = wait.as_secs_f64(),
                        "Rate limited, waiting before retry"
                    );
                    self.wait(wait, cancel).await?;
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        %err,
                        "Chunk attempt failed"
                    );
                    if attempt + 1 == self.config.max_retries {
                        return Err(err);
                    }
                    let wait = jittered_backoff(self.base_delay(), attempt);
                    last_error = Some(err);
                    self.wait(wait, cancel).await?;
                }
                Err(err) => return Err(err),
            }
        }

        // Reachable only when the budget was consumed entirely by rate
        // limiting; surface the last real error if one was recorded.
        Err(last_error.unwrap_or(FetchError::Http(429)))
    }

    fn base_delay(&self) -> Duration {
        Duration::from_millis(self.config.base_delay_ms)
    }

    /// Inter-chunk pacing: floor of the base delay, growing with row count.
    fn pacing_delay(&self, rows: usize) -> Duration {
        let row_cost = rows as u64 * self.config.pacing_per_row_ms;
        Duration::from_millis(self.config.base_delay_ms.max(row_cost))
    }

    /// Sleep that aborts with `Cancelled` when the token fires.
    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), FetchError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// `base × 2^exponent`, saturating well before overflow.
fn exponential(base: Duration, exponent: u32) -> Duration {
    base * 2u32.saturating_pow(exponent.min(16))
}

/// Wait after a 429: the provider's suggestion or the exponential backoff,
/// whichever is longer.
fn rate_limit_wait(suggested: Option<Duration>, base: Duration, attempt: u32) -> Duration {
    let backoff = exponential(base, attempt);
    match suggested {
        Some(s) => s.max(backoff),
        None => backoff,
    }
}

/// Exponential backoff scaled by a jitter factor in [0.5, 1.5) so parallel
/// callers hitting the same provider do not retry in lockstep.
fn jittered_backoff(base: Duration, attempt: u32) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(exponential(base, attempt).as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed script of responses, one per request.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Vec<RawRow>, FetchError>>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<RawRow>, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CandleSource for &ScriptedSource {
        async fn request_candles(
            &self,
            _chunk: &Chunk,
            _granularity_secs: i64,
        ) -> Result<Vec<RawRow>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(FetchError::Http(0)))
        }
    }

    fn fast_config(max_retries: u32) -> FetchConfig {
        FetchConfig {
            max_candles_per_request: 250,
            max_retries,
            base_delay_ms: 1,
            max_consecutive_errors: 5,
            pacing_per_row_ms: 0,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rows(ts: i64) -> Vec<RawRow> {
        vec![json!([ts, 1.0, 2.0, 0.5, 1.5, 10.0])]
    }

    // -------------------------------------------------------------------
    // Pure wait computations
    // -------------------------------------------------------------------

    #[test]
    fn test_rate_limit_wait_honors_retry_after() {
        // Scenario from the contract: Retry-After: 5 must produce a wait of
        // at least 5000ms, regardless of where the backoff curve sits.
        let base = Duration::from_secs(2);
        assert_eq!(
            rate_limit_wait(Some(Duration::from_secs(5)), base, 0),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_rate_limit_wait_takes_backoff_when_longer() {
        let base = Duration::from_secs(2);
        // attempt 2 -> 2s * 4 = 8s > suggested 5s
        assert_eq!(
            rate_limit_wait(Some(Duration::from_secs(5)), base, 2),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn test_rate_limit_wait_without_header_uses_backoff() {
        let base = Duration::from_secs(2);
        assert_eq!(rate_limit_wait(None, base, 1), Duration::from_secs(4));
    }

    #[test]
    fn test_jittered_backoff_stays_in_range() {
        let base = Duration::from_millis(1_000);
        for attempt in 0..4 {
            let nominal = exponential(base, attempt).as_secs_f64();
            for _ in 0..32 {
                let d = jittered_backoff(base, attempt).as_secs_f64();
                assert!(d >= nominal * 0.5 && d < nominal * 1.5);
            }
        }
    }

    #[test]
    fn test_exponential_saturates() {
        let d = exponential(Duration::from_millis(1), 1_000);
        assert!(d <= Duration::from_millis(1) * 2u32.pow(16));
    }

    // -------------------------------------------------------------------
    // Per-chunk retry loop
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let source = ScriptedSource::new(vec![Err(FetchError::Http(500)), Ok(rows(1_000))]);
        let fetcher = HistoricalFetcher::new(&source, fast_config(3));

        let candles = fetcher
            .fetch(
                Timeframe::OneMinute,
                at(1_000),
                at(1_060),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(candles.len(), 1);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_surfaces_last_error() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::Http(500)),
            Err(FetchError::Http(502)),
            Err(FetchError::Http(503)),
        ]);
        let fetcher = HistoricalFetcher::new(&source, fast_config(3));

        let err = fetcher
            .fetch_chunk(
                &Chunk {
                    start: at(0),
                    end: at(60),
                },
                60,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Http(503)));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_does_not_retry() {
        let source = ScriptedSource::new(vec![Err(FetchError::BadRequest("bad".into()))]);
        let fetcher = HistoricalFetcher::new(&source, fast_config(8));

        let err = fetcher
            .fetch_chunk(
                &Chunk {
                    start: at(0),
                    end: at(60),
                },
                60,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::BadRequest(_)));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_waits_before_next_attempt() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_millis(80)),
            }),
            Ok(rows(1_000)),
        ]);
        let fetcher = HistoricalFetcher::new(&source, fast_config(3));

        let started = tokio::time::Instant::now();
        let candles = fetcher
            .fetch(
                Timeframe::OneMinute,
                at(1_000),
                at(1_060),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(candles.len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(source.calls(), 2);
    }

    // -------------------------------------------------------------------
    // Cross-chunk failure tracking
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_abort_after_consecutive_chunk_failures() {
        // With a 1-candle cap the cursor skips one candle past each chunk
        // end, so 11 minutes plan 6 chunks. Every request 404s: the fetch
        // must abort at the fifth consecutive failure without touching the
        // sixth chunk, returning no partial data.
        let source = ScriptedSource::new((0..6).map(|_| Err(FetchError::NotFound)).collect());
        let mut config = fast_config(3);
        config.max_candles_per_request = 1;
        let fetcher = HistoricalFetcher::new(&source, config);

        let err = fetcher
            .fetch(
                Timeframe::OneMinute,
                at(0),
                at(11 * 60),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::ConsecutiveFailures));
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        // 9 minutes with a 1-candle cap plan 5 chunks. fail, ok, fail, ok,
        // fail with an abort threshold of 2: each failure is followed by a
        // success, so the counter never exceeds 1 and the fetch completes.
        let mut config = fast_config(1);
        config.max_candles_per_request = 1;
        config.max_consecutive_errors = 2;

        let source = ScriptedSource::new(vec![
            Err(FetchError::NotFound),
            Ok(rows(120)),
            Err(FetchError::NotFound),
            Ok(rows(480)),
            Err(FetchError::NotFound),
        ]);
        let fetcher = HistoricalFetcher::new(&source, config);

        let candles = fetcher
            .fetch(
                Timeframe::OneMinute,
                at(0),
                at(9 * 60),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // Both successful chunks made it into the series.
        assert_eq!(candles.len(), 2);
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test]
    async fn test_all_chunks_empty_is_no_data() {
        let source = ScriptedSource::new(vec![Ok(vec![]), Ok(vec![])]);
        let mut config = fast_config(1);
        config.max_candles_per_request = 1;
        let fetcher = HistoricalFetcher::new(&source, config);

        let err = fetcher
            .fetch(
                Timeframe::OneMinute,
                at(0),
                at(3 * 60),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::NoData));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_dedup_across_chunks_later_chunk_wins() {
        // 3 minutes with a 1-candle cap plan 2 chunks; both report the same
        // timestamp with different closes and the later chunk must win.
        let mut config = fast_config(1);
        config.max_candles_per_request = 1;

        let source = ScriptedSource::new(vec![
            Ok(vec![json!([60, 1.0, 1.0, 1.0, 100.0, 1.0])]),
            Ok(vec![json!([60, 1.0, 1.0, 1.0, 200.0, 1.0])]),
        ]);
        let fetcher = HistoricalFetcher::new(&source, config);

        let candles = fetcher
            .fetch(
                Timeframe::OneMinute,
                at(0),
                at(3 * 60),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(source.calls(), 2);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, dec!(200));
    }

    // -------------------------------------------------------------------
    // Preconditions and cancellation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_invalid_range_fails_before_any_request() {
        let source = ScriptedSource::new(vec![]);
        let fetcher = HistoricalFetcher::new(&source, fast_config(3));

        let err = fetcher
            .fetch(
                Timeframe::OneHour,
                at(1_000),
                at(1_000),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::InvalidRange { .. }));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_fetch() {
        let source = ScriptedSource::new(vec![Ok(rows(1_000))]);
        let fetcher = HistoricalFetcher::new(&source, fast_config(3));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher
            .fetch(Timeframe::OneMinute, at(1_000), at(1_060), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff_wait() {
        let mut config = fast_config(8);
        config.base_delay_ms = 60_000;

        let source = ScriptedSource::new(vec![Err(FetchError::Http(500)), Ok(rows(1_000))]);
        let fetcher = HistoricalFetcher::new(&source, config);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = fetcher
            .fetch(Timeframe::OneMinute, at(1_000), at(1_060), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        // The 60s backoff wait was interrupted, not served.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    // -------------------------------------------------------------------
    // Pacing
    // -------------------------------------------------------------------

    #[test]
    fn test_pacing_has_base_delay_floor() {
        let source = ScriptedSource::new(vec![]);
        let fetcher = HistoricalFetcher::new(
            &source,
            FetchConfig {
                base_delay_ms: 2_000,
                pacing_per_row_ms: 10,
                ..fast_config(1)
            },
        );

        // Few rows: floor applies. Many rows: proportional cost wins.
        assert_eq!(fetcher.pacing_delay(5), Duration::from_millis(2_000));
        assert_eq!(fetcher.pacing_delay(250), Duration::from_millis(2_500));
    }
}
