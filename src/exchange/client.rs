//! Exchange REST client for historical candles.

use crate::config::ExchangeConfig;
use crate::exchange::error::FetchError;
use crate::exchange::types::{Chunk, RawRow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

const API_VERSION: &str = "2021-06-17";
const USER_AGENT: &str = "candle-backtester";

/// A source of raw candle rows for one chunk at a time.
///
/// The fetcher is generic over this seam so retry and failure-tracking logic
/// can be exercised against scripted responses without a network.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Issue exactly one request for the given chunk. No retries here; the
    /// caller owns retry policy.
    async fn request_candles(
        &self,
        chunk: &Chunk,
        granularity_secs: i64,
    ) -> Result<Vec<RawRow>, FetchError>;
}

/// Client for the exchange's public candles endpoint.
#[derive(Debug, Clone)]
pub struct CoinbaseClient {
    http: Client,
    base_url: String,
    product: String,
}

impl CoinbaseClient {
    /// Create a client from configuration.
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            product: config.product.clone(),
        })
    }

    /// Create a client against a custom base URL (used by tests).
    pub fn with_base_url(base_url: &str, product: &str) -> Result<Self> {
        let config = ExchangeConfig {
            base_url: base_url.to_string(),
            product: product.to_string(),
            ..ExchangeConfig::default()
        };
        Self::new(&config)
    }

    fn candles_url(&self, chunk: &Chunk, granularity_secs: i64) -> String {
        format!(
            "{}/products/{}/candles?start={}&end={}&granularity={}",
            self.base_url,
            self.product,
            chunk.start.to_rfc3339(),
            chunk.end.to_rfc3339(),
            granularity_secs,
        )
    }
}

#[async_trait]
impl CandleSource for CoinbaseClient {
    #[instrument(skip(self), fields(product = %self.product))]
    async fn request_candles(
        &self,
        chunk: &Chunk,
        granularity_secs: i64,
    ) -> Result<Vec<RawRow>, FetchError> {
        let url = self.candles_url(chunk, granularity_secs);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .header("CB-VERSION", API_VERSION)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited { retry_after });
        }

        if status.as_u16() == 404 {
            return Err(FetchError::NotFound);
        }

        if status.as_u16() == 400 {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body.get("message")?.as_str().map(str::to_string))
                .unwrap_or_else(|| "Invalid parameters".to_string());
            return Err(FetchError::BadRequest(message));
        }

        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.contains("application/json") {
            return Err(FetchError::InvalidContentType);
        }

        let body: serde_json::Value = response.json().await?;
        let rows = body.as_array().cloned().ok_or(FetchError::InvalidBody)?;

        debug!(
            rows = rows.len(),
            start = %chunk.start,
            end = %chunk.end,
            "Fetched chunk"
        );

        Ok(rows)
    }
}
