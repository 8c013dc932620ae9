//! Historical candle acquisition pipeline.
//!
//! Data flow: `plan_chunks` partitions the requested range into chunks that
//! respect the provider's per-request candle cap; [`HistoricalFetcher`]
//! fetches them strictly in order through a [`CandleSource`] (retry, backoff,
//! rate-limit cooperation, consecutive-failure tracking); `normalize` merges
//! the raw rows into the canonical candle series.

pub mod chunks;
mod client;
mod error;
mod fetcher;
mod normalizer;
mod types;

pub use chunks::plan_chunks;
pub use client::{CandleSource, CoinbaseClient};
pub use error::FetchError;
pub use fetcher::HistoricalFetcher;
pub use normalizer::normalize;
pub use types::{Candle, Chunk, RawRow, Timeframe};
