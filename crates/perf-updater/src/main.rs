//! perf-updater: scheduled jobs for the portfolio performance site.
//!
//! Usage:
//!   cargo run -p perf-updater -- prices                 # append yesterday's closes
//!   cargo run -p perf-updater -- prices --days-back 180 # first run, longer history
//!   cargo run -p perf-updater -- performance            # recompute every portfolio
//!   cargo run -p perf-updater -- performance --patch-days 5 --source polygon

mod cli;
mod performance;
mod prices;
mod report;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use perf_core::PriceSource;

use cli::{Cli, Command, SourceKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "perf_updater=info,csv_store=info,performance_engine=warn,market_data=warn".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.fetch_timeout_secs);

    match cli.command {
        Command::Prices(args) => {
            let source = polygon_source(&cli.polygon_api_key)?;
            let today = chrono::Local::now().date_naive();
            let outcome = prices::run(&args, source.as_ref(), today, timeout).await?;
            tracing::info!("{}", outcome);
        }
        Command::Performance(args) => {
            let engine = args.engine_config()?;
            let source: Arc<dyn PriceSource> = match args.source {
                SourceKind::Csv => Arc::new(csv_store::CsvPriceSource::new(&args.prices_csv)),
                SourceKind::Polygon => polygon_source(&cli.polygon_api_key)?,
            };
            let today = chrono::Local::now().date_naive();
            let report = performance::run(&args, engine, source.as_ref(), today, timeout).await?;
            report.log();
            if report.written.is_empty() {
                anyhow::bail!("no performance table written");
            }
        }
    }
    Ok(())
}

fn polygon_source(api_key: &Option<String>) -> anyhow::Result<Arc<dyn PriceSource>> {
    let key = api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .context("POLYGON_API_KEY must be set to fetch prices")?;
    Ok(Arc::new(market_data::PolygonClient::new(key)))
}
