use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use binance_client::base_classes::orderbook_trait::OrderBookOps;
use binance_client::config::load_client_config;
use binance_client::utils::logging::init_logging;
use binance_client::{ChartCache, ChartCaches, ClientConfig, DepthCache, DepthCaches, MarketDataEngine};

#[derive(Parser, Debug)]
#[command(name = "depth_monitor", about = "Keeps local Binance order books in sync and prints the top of book")]
struct Args {
    /// Symbols to follow, e.g. BTCUSDT ETHUSDT
    #[arg(required = true)]
    symbols: Vec<String>,

    /// Also follow klines at this interval (1m, 5m, 1h, ...)
    #[arg(long)]
    interval: Option<String>,

    /// Levels per side to print
    #[arg(long, default_value_t = 3)]
    levels: usize,

    /// YAML client configuration
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    testnet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_client_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if args.testnet {
        config.testnet = true;
    }
    let config = config.with_env_credentials();

    let engine = MarketDataEngine::binance(config)
        .await
        .context("failed to create market data engine")?;

    let depth_caches = DepthCaches::new();
    let levels = args.levels;
    let mut handles = engine
        .open_depth_cache(&args.symbols, &depth_caches, move |symbol, book| {
            log_book_state(symbol, book, levels)
        })
        .context("failed to open depth caches")?;

    let charts = ChartCaches::new();
    if let Some(interval) = &args.interval {
        handles.extend(
            engine
                .open_chart(&args.symbols, interval, &charts, log_chart_state)
                .context("failed to open charts")?,
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!(closed = engine.close_all(), "shutting down");

    for handle in handles {
        let topic = handle.topic().to_string();
        if let Err(e) = handle.join().await {
            error!(%topic, error = %e, "subscription ended with error");
        }
    }
    Ok(())
}

fn log_book_state(symbol: &str, book: &DepthCache, levels: usize) {
    let view = book.sorted_view(levels);
    if view.is_empty() {
        println!("[depth] {symbol} id={} (empty book)", book.last_update_id());
        return;
    }
    match (book.best_bid_level(), book.best_ask_level()) {
        (Some(bid), Some(ask)) => {
            println!(
                "[depth] {symbol} id={} mid={} bid={}@{} ask={}@{} spread={}",
                book.last_update_id(),
                book.mid_price().unwrap_or_default(),
                bid.0,
                bid.1,
                ask.0,
                ask.1,
                book.spread().unwrap_or_default()
            );
            for (bid, ask) in view.bids.iter().zip(&view.asks).skip(1) {
                println!("        {}@{} | {}@{}", bid.0, bid.1, ask.0, ask.1);
            }
        }
        _ => println!(
            "[depth] {symbol} id={} (one-sided book)",
            book.last_update_id()
        ),
    }
}

fn log_chart_state(symbol: &str, chart: &ChartCache) {
    if let Some(candle) = chart.latest() {
        println!(
            "[kline {}] {symbol} open_time={} o={} h={} l={} c={} v={} final={}",
            chart.interval(),
            candle.open_time,
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
            candle.is_final
        );
    }
}
