//! Candle Backtester - Main Entry Point

use anyhow::{Context, Result};
use candle_backtester::backtest::{BacktestEngine, BacktestMetrics};
use candle_backtester::config::Config;
use candle_backtester::exchange::{Candle, CoinbaseClient, HistoricalFetcher, Timeframe};
use candle_backtester::strategy::DslStrategy;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Hours of history fetched when no explicit range is given.
const DEFAULT_HOURS: i64 = 10;

/// Candle Backtester CLI
#[derive(Parser)]
#[command(name = "candle-backtester")]
#[command(version, about = "Historical candle fetching and strategy backtesting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch historical candles and print or export them
    Fetch {
        /// Candle timeframe
        #[arg(short, long, value_enum, default_value = "1h")]
        timeframe: Timeframe,

        /// Start of the range (RFC 3339 or YYYY-MM-DD); default: 10 hours ago
        #[arg(short, long)]
        start: Option<String>,

        /// End of the range (RFC 3339 or YYYY-MM-DD); default: now
        #[arg(short, long)]
        end: Option<String>,

        /// Write candles to a CSV file
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Fetch candles and run a strategy backtest over them
    Backtest {
        /// Candle timeframe
        #[arg(short, long, value_enum, default_value = "1h")]
        timeframe: Timeframe,

        /// Start of the range (RFC 3339 or YYYY-MM-DD); default: 10 hours ago
        #[arg(short, long)]
        start: Option<String>,

        /// End of the range (RFC 3339 or YYYY-MM-DD); default: now
        #[arg(short, long)]
        end: Option<String>,

        /// Strategy expression, e.g. "price > sma(20)"
        #[arg(short = 'S', long)]
        strategy: String,

        /// Initial capital for the simulation
        #[arg(short = 'b', long)]
        initial_capital: Option<Decimal>,

        /// Write the equity curve to a CSV file
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    // Ctrl-C aborts in-flight fetches cleanly instead of killing waits.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            signal_token.cancel();
        }
    });

    match cli.command {
        Commands::Fetch {
            timeframe,
            start,
            end,
            output,
        } => {
            let (start, end) = resolve_range(start.as_deref(), end.as_deref())?;
            let candles = fetch_candles(&config, timeframe, start, end, &cancel).await?;

            println!(
                "Fetched {} candles ({} {} .. {})",
                candles.len(),
                timeframe,
                start.format("%Y-%m-%d %H:%M"),
                end.format("%Y-%m-%d %H:%M"),
            );

            if let Some(path) = output {
                candles_to_csv(&candles, &path)?;
                println!("Candles written to {path}");
            }
        }

        Commands::Backtest {
            timeframe,
            start,
            end,
            strategy,
            initial_capital,
            output,
        } => {
            let (start, end) = resolve_range(start.as_deref(), end.as_deref())?;

            let mut strategy = DslStrategy::compile(&strategy)
                .with_context(|| format!("Failed to compile strategy: {strategy}"))?;

            let candles = fetch_candles(&config, timeframe, start, end, &cancel).await?;
            info!(candles = candles.len(), "Running backtest");

            let mut backtest_config = config.backtest.clone();
            if let Some(capital) = initial_capital {
                backtest_config.initial_capital = capital;
            }

            let engine = BacktestEngine::new(backtest_config);
            let result = engine.run(&candles, &mut strategy);
            let metrics = BacktestMetrics::calculate(&result);

            println!("{}", metrics.summary());

            if let Some(path) = output {
                result.equity_to_csv(&path)?;
                println!("Equity curve written to {path}");
            }
        }
    }

    Ok(())
}

async fn fetch_candles(
    config: &Config,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Vec<Candle>> {
    let client = CoinbaseClient::new(&config.exchange)?;
    let fetcher = HistoricalFetcher::new(client, config.fetch.clone());

    let candles = fetcher
        .fetch(timeframe, start, end, cancel)
        .await
        .with_context(|| {
            format!(
                "Failed to fetch {} data for {}",
                config.exchange.product, timeframe
            )
        })?;

    Ok(candles)
}

/// Resolve an optional start/end pair; defaults to the last 10 hours.
fn resolve_range(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = match end {
        Some(s) => parse_instant(s)?,
        None => Utc::now(),
    };
    let start = match start {
        Some(s) => parse_instant(s)?,
        None => end - Duration::hours(DEFAULT_HOURS),
    };
    Ok((start, end))
}

/// Parse an RFC 3339 instant or a bare date (midnight UTC).
fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {s} (expected RFC 3339 or YYYY-MM-DD)"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .context("Invalid time of day")
}

fn candles_to_csv(candles: &[Candle], path: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "timestamp,open,high,low,close,volume")?;
    for c in candles {
        writeln!(
            file,
            "{},{},{},{},{},{}",
            c.timestamp.to_rfc3339(),
            c.open,
            c.high,
            c.low,
            c.close,
            c.volume,
        )?;
    }
    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "candle-backtester.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the appender guard alive for the program duration.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr.and(file_writer))
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instant_accepts_rfc3339() {
        let dt = parse_instant("2024-05-01T12:30:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }

    #[test]
    fn test_parse_instant_accepts_bare_date() {
        let dt = parse_instant("2024-05-01").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-05-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_instant_rejects_garbage() {
        assert!(parse_instant("yesterday").is_err());
    }

    #[test]
    fn test_default_range_is_ten_hours() {
        let (start, end) = resolve_range(None, None).unwrap();
        assert_eq!(end - start, Duration::hours(10));
    }

    #[test]
    fn test_explicit_range_passes_through() {
        let (start, end) =
            resolve_range(Some("2024-01-01"), Some("2024-01-02T06:00:00Z")).unwrap();
        assert!(start < end);
        assert_eq!(end - start, Duration::hours(30));
    }
}
