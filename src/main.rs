mod config;
mod db;
mod detector;
mod error;
mod fetcher;
mod market_clock;
mod notifier;
mod run;
mod types;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use crate::fetcher::YahooQuoteFetcher;
use crate::market_clock::{MarketClock, UsEquityCalendar};
use crate::run::{FetchRun, RunOutcome};

#[derive(Debug, Parser)]
#[command(name = "nasdaq-tracker", version, about = "NASDAQ-100 price sampler and drop alerter")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one fetch/evaluate/persist cycle (default).
    Run {
        /// Ignore the market clock and evaluate even when the session is closed.
        #[arg(long)]
        force: bool,
    },
    /// Print recent fetch logs and alerts as JSON.
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Also print the stored price snapshots for this symbol.
        #[arg(long)]
        symbol: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    let result = match cli.command.unwrap_or(Command::Run { force: false }) {
        Command::Run { force } => run_once(cfg, force).await,
        Command::History { limit, symbol } => history(cfg, limit, symbol).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn open_store(cfg: &Config) -> Result<Store> {
    let store = Store::connect(&cfg.db_path).await?;
    store.migrate().await?;
    info!("Database ready at {}", cfg.db_path);
    Ok(store)
}

async fn run_once(cfg: Config, force: bool) -> Result<()> {
    let now = Utc::now();
    info!("==================================================");
    info!("NASDAQ tracker starting - {}", now.to_rfc3339());
    info!("==================================================");
    info!(
        symbols = cfg.symbols.len(),
        benchmark = %cfg.benchmark_symbol,
        daily = cfg.thresholds.daily_drop_pct,
        hourly = cfg.thresholds.hourly_drop_pct,
        relative = cfg.thresholds.relative_drop_pct,
        "Thresholds loaded"
    );

    let store = open_store(&cfg).await?;
    let clock = MarketClock::new(Box::new(UsEquityCalendar), cfg.include_extended_hours);
    let source = YahooQuoteFetcher::new(&cfg)?;
    let notifier = notifier::from_config(&cfg)?;
    info!(
        transport = notifier.transport(),
        recipient = notifier.recipient(),
        "Alert delivery configured"
    );

    let outcome = FetchRun::new(&cfg, &store, &clock, &source, notifier.as_ref())
        .force(force)
        .execute(now)
        .await?;

    match outcome {
        RunOutcome::Skipped(log) => {
            info!("Skipped: market {} at {}", log.market_state, log.fetch_timestamp.to_rfc3339());
        }
        RunOutcome::Completed(report) => {
            if report.alerts.is_empty() {
                info!("No abnormal drops detected");
            } else {
                warn!("{} alert(s) raised this run", report.alerts.len());
            }
            if let Some(errs) = &report.log.errors {
                warn!("Run finished with errors: {errs}");
            }
        }
    }
    Ok(())
}

async fn history(cfg: Config, limit: i64, symbol: Option<String>) -> Result<()> {
    let store = open_store(&cfg).await?;

    let mut out = serde_json::json!({
        "fetch_logs": store.recent_fetch_logs(limit).await?,
        "alerts": store.recent_alerts(limit).await?,
    });
    if let Some(symbol) = symbol {
        let symbol = symbol.to_ascii_uppercase();
        out["prices"] = serde_json::to_value(store.price_history(&symbol).await?)?;
    }

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
