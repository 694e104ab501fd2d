use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use csv_store::{
    load_composition, load_price_panel, load_registry, read_performance_table,
    write_performance_table, PortfolioEntry,
};
use perf_core::{
    EngineConfig, PerfError, PerformanceTable, PricePanel, PriceSource, SkipReason,
    UnavailableTicker, WeightRecord,
};
use performance_engine::{CompositionResolver, PerformanceEngine};
use rayon::prelude::*;

use crate::cli::{PerformanceArgs, SourceKind};
use crate::report::{RunReport, WrittenTable};

/// Every symbol named by the active composition rows, plus the benchmarks.
fn wanted_tickers(records: &[WeightRecord], config: &EngineConfig) -> Vec<String> {
    let mut tickers: BTreeSet<String> = records
        .iter()
        .flat_map(|r| CompositionResolver::split_tickers(&r.ticker))
        .collect();
    tickers.extend(config.benchmarks.symbols().iter().map(|s| s.to_string()));
    tickers.into_iter().collect()
}

async fn load_panel(
    args: &PerformanceArgs,
    config: &EngineConfig,
    records: &[WeightRecord],
    source: &dyn PriceSource,
    today: NaiveDate,
    timeout: Duration,
) -> anyhow::Result<(PricePanel, Vec<UnavailableTicker>)> {
    if args.source == SourceKind::Csv {
        return Ok((load_price_panel(&args.prices_csv)?, Vec::new()));
    }

    let tickers = wanted_tickers(records, config);
    let from = config.start_date.unwrap_or(today - chrono::Duration::days(3650));
    tracing::info!(
        "Fetching {} ticker(s) from {} since {}",
        tickers.len(),
        source.name(),
        from
    );
    let fetches = tokio::time::timeout(timeout, source.fetch_closes(&tickers, from, today))
        .await
        .with_context(|| format!("price fetch timed out after {:?}", timeout))??;
    Ok(PricePanel::from_fetches(fetches))
}

/// Registered portfolios paired with their computed table, or the reason
/// they were skipped.
fn compute_all(
    entries: &[PortfolioEntry],
    records: &[WeightRecord],
    panel: &PricePanel,
    engine: &PerformanceEngine,
) -> Vec<(PortfolioEntry, Result<PerformanceTable, SkipReason>)> {
    let window = engine.window(panel);
    let resolution = CompositionResolver::resolve(records, &window.available_tickers());

    entries
        .par_iter()
        .map(|entry| {
            let outcome = match resolution.get(&entry.name) {
                Some(portfolio) => engine
                    .compute(portfolio, panel)
                    .map_err(|e| SkipReason::ComputationFailed(e.to_string())),
                None => Err(resolution
                    .skip_reason(&entry.name)
                    .cloned()
                    .unwrap_or(SkipReason::NotInComposition)),
            };
            (entry.clone(), outcome)
        })
        .collect()
}

/// Write `table` to `path`, or patch the existing file when `patch_days` is
/// set. Returns the row count written and whether it was a patch.
fn persist_table(
    path: &Path,
    table: PerformanceTable,
    portfolio: &str,
    patch_days: Option<usize>,
) -> anyhow::Result<(usize, bool)> {
    let (table, patched) = match patch_days {
        Some(days) if path.exists() => {
            let existing = read_performance_table(path, portfolio)
                .with_context(|| format!("reading {} for patch", path.display()))?;
            (existing.patch_recent(&table, days), true)
        }
        _ => (table, false),
    };

    write_performance_table(path, &table)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok((table.len(), patched))
}

pub async fn run(
    args: &PerformanceArgs,
    config: EngineConfig,
    source: &dyn PriceSource,
    today: NaiveDate,
    timeout: Duration,
) -> anyhow::Result<RunReport> {
    let entries = load_registry(&args.registry)?;
    let composition = load_composition(&args.composition)?;
    let (panel, unavailable) =
        load_panel(args, &config, &composition.records, source, today, timeout).await?;

    let engine = PerformanceEngine::new(config);
    let window = engine.window(&panel);
    for symbol in engine.config().benchmarks.symbols() {
        if !window.has_prices(symbol) {
            return Err(PerfError::MissingBenchmark(symbol.to_string()).into());
        }
    }
    tracing::info!(
        "Price panel: {} days, {} tickers ({} to {})",
        panel.len(),
        panel.available_tickers().len(),
        panel.first_date().map(|d| d.to_string()).unwrap_or_default(),
        panel.last_date().map(|d| d.to_string()).unwrap_or_default()
    );

    let results = compute_all(&entries, &composition.records, &panel, &engine);

    let mut report = RunReport {
        unavailable_tickers: unavailable,
        ..RunReport::default()
    };
    for (entry, outcome) in results {
        let table = match outcome {
            Ok(table) => table,
            Err(reason) => {
                report.skip(&entry.name, reason);
                continue;
            }
        };

        let path = args.output_dir.join(entry.output_file());
        match persist_table(&path, table, &entry.name, args.patch_days) {
            Ok((rows, patched)) => report.written.push(WrittenTable {
                portfolio: entry.name.clone(),
                path,
                rows,
                patched,
            }),
            Err(e) => {
                tracing::error!("{}: {:#}", entry.name, e);
                report.skip(&entry.name, SkipReason::WriteFailed(format!("{:#}", e)));
            }
        }
    }

    Ok(report)
}
