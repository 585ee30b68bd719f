//! Trackfolio CLI: sync, covariance, series and valuation commands.
//!
//! Commands:
//! - `sync`: bring stored series up to date (configured universe by default)
//! - `covariance`: covariance of two symbols' daily log returns
//! - `matrix`: covariance matrix for a list of symbols
//! - `series`: trailing-year bars for one symbol
//! - `value`: trailing-year valuation of a portfolio file
//! - `latest`: most recent stored close
//! - `status`: watermark and stored range per symbol
//! - `cache flush` / `cache invalidate`: covariance cache maintenance
//!
//! Results are printed to stdout as `{"success": true, "data": ...}`; logs go
//! to stderr.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trackfolio_core::data::MockProvider;
use trackfolio_core::domain::Holding;
use trackfolio_core::engine::open_cache_backend;
use trackfolio_core::sync::SystemClock;
use trackfolio_core::{EngineConfig, RiskEngine};

#[derive(Parser)]
#[command(
    name = "trackfolio",
    about = "Trackfolio CLI: portfolio risk from locally synced daily bars"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to a TOML engine config. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config and TRACKFOLIO_DATA_DIR).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Offline mode: no network access, serve stored data only.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync symbols with the upstream provider.
    Sync {
        /// Symbols to sync. Defaults to the configured universe.
        symbols: Vec<String>,
    },
    /// Covariance of two symbols' daily log returns.
    Covariance { symbol1: String, symbol2: String },
    /// Covariance matrix for the given symbols, in the given order.
    Matrix {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Bars for one symbol over the trailing year.
    Series {
        symbol: String,

        /// Write bars to this CSV file instead of stdout.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Daily value, cost and unrealized profit of a portfolio over the trailing year.
    Value {
        /// JSON file: `[{"symbol": "AAPL", "shares": 10, "buyPrice": 120}, ...]`.
        /// The first holding's trading days form the timeline.
        #[arg(long)]
        portfolio: PathBuf,

        /// Write the series to this CSV file instead of stdout.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Most recent stored close for a symbol.
    Latest { symbol: String },
    /// Watermark and stored range per symbol.
    Status {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Covariance cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete every cached covariance.
    Flush,
    /// Delete cached covariances involving a symbol.
    Invalidate { symbol: String },
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { symbols } => run_sync(&cli.global, symbols),
        Commands::Covariance { symbol1, symbol2 } => {
            let engine = open_engine(&cli.global)?;
            print_json(&engine.covariance(&symbol1, &symbol2)?)
        }
        Commands::Matrix { symbols } => {
            let engine = open_engine(&cli.global)?;
            print_json(&engine.covariance_matrix(&symbols)?)
        }
        Commands::Series { symbol, csv } => run_series(&cli.global, &symbol, csv.as_deref()),
        Commands::Value { portfolio, csv } => run_value(&cli.global, &portfolio, csv.as_deref()),
        Commands::Latest { symbol } => run_latest(&cli.global, &symbol),
        Commands::Status { symbols } => {
            let engine = open_local(&cli.global)?;
            print_json(&engine.status(&symbols))
        }
        Commands::Cache { action } => run_cache(&cli.global, action),
    }
}

fn load_config(global: &GlobalArgs) -> Result<EngineConfig> {
    let mut config = match &global.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_env();
    if let Some(dir) = &global.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

/// Open the engine. Offline engines get a provider that never has new data.
fn open_engine(global: &GlobalArgs) -> Result<RiskEngine> {
    let config = load_config(global)?;
    let engine = if global.offline {
        let backend = open_cache_backend(&config.cache)?;
        RiskEngine::open(
            config,
            Arc::new(MockProvider::new()),
            backend,
            Arc::new(SystemClock),
        )?
    } else {
        RiskEngine::connect(config)?
    };
    Ok(engine)
}

/// Open an offline engine that leaves the cache as it is, for commands that
/// only inspect or maintain local state.
fn open_local(global: &GlobalArgs) -> Result<RiskEngine> {
    let mut config = load_config(global)?;
    config.flush_cache_on_start = false;
    let backend = open_cache_backend(&config.cache)?;
    Ok(RiskEngine::open(
        config,
        Arc::new(MockProvider::new()),
        backend,
        Arc::new(SystemClock),
    )?)
}

fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let envelope = Envelope {
        success: true,
        data,
    };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

fn run_sync(global: &GlobalArgs, symbols: Vec<String>) -> Result<()> {
    let engine = open_engine(global)?;
    let report = if symbols.is_empty() {
        if engine.config().universe.is_empty() {
            bail!("no symbols given and no universe configured");
        }
        engine.sync_universe()
    } else {
        engine.ensure_fresh(&symbols)
    };

    print_json(&report)?;
    if !report.all_succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_series(global: &GlobalArgs, symbol: &str, csv_path: Option<&Path>) -> Result<()> {
    let engine = open_engine(global)?;
    let bars: Vec<_> = engine
        .past_year_series(symbol)
        .into_iter()
        .map(|(_, bar)| bar)
        .collect();

    match csv_path {
        Some(path) => {
            write_csv(path, &bars)?;
            info!(symbol, rows = bars.len(), path = %path.display(), "wrote series");
            print_json(&serde_json::json!({ "symbol": symbol, "rows": bars.len() }))
        }
        None => print_json(&bars),
    }
}

fn run_value(global: &GlobalArgs, portfolio: &Path, csv_path: Option<&Path>) -> Result<()> {
    let content = std::fs::read_to_string(portfolio)
        .with_context(|| format!("reading portfolio {}", portfolio.display()))?;
    let holdings: Vec<Holding> = serde_json::from_str(&content)
        .with_context(|| format!("parsing portfolio {}", portfolio.display()))?;

    let engine = open_engine(global)?;
    let points = engine.portfolio_value_series(&holdings)?;

    match csv_path {
        Some(path) => {
            write_csv(path, &points)?;
            info!(rows = points.len(), path = %path.display(), "wrote valuation");
            print_json(&serde_json::json!({ "rows": points.len() }))
        }
        None => print_json(&points),
    }
}

fn run_latest(global: &GlobalArgs, symbol: &str) -> Result<()> {
    let engine = open_local(global)?;
    match engine.latest_close(symbol) {
        Some((date, close)) => print_json(&serde_json::json!({
            "symbol": symbol,
            "date": date,
            "latestPrice": close,
        })),
        None => bail!("no stored price for {symbol}"),
    }
}

fn run_cache(global: &GlobalArgs, action: CacheAction) -> Result<()> {
    let engine = open_local(global)?;
    let removed = match action {
        CacheAction::Flush => engine.flush_cache()?,
        CacheAction::Invalidate { symbol } => engine.invalidate(&symbol)?,
    };
    print_json(&serde_json::json!({ "removed": removed }))
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
