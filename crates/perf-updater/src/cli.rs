use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use perf_core::{AnchorRule, BenchmarkPair, EngineConfig, GapPolicy};

#[derive(Parser, Debug)]
#[command(name = "perf-updater")]
#[command(about = "Daily price history and portfolio performance updater")]
#[command(version)]
pub struct Cli {
    /// Polygon.io API key (required when prices come from the provider)
    #[arg(long, env = "POLYGON_API_KEY", hide_env_values = true, global = true)]
    pub polygon_api_key: Option<String>,

    /// Upper bound on one provider fetch, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 300, global = true)]
    pub fetch_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Append the missing trading days to the price history file
    Prices(PricesArgs),
    /// Recompute the performance table of every registered portfolio
    Performance(PerformanceArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PricesArgs {
    #[arg(long, env = "PRICES_CSV", default_value = "prices_daily.csv")]
    pub prices_csv: PathBuf,

    /// Extra tickers to track (tab-separated file with a `ticker` column)
    #[arg(long, env = "TICKERS_FILE")]
    pub tickers: Option<PathBuf>,

    /// History fetched when the price file has no rows yet
    #[arg(long, default_value_t = 90)]
    pub days_back: i64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Csv,
    Polygon,
}

#[derive(Args, Debug, Clone)]
pub struct PerformanceArgs {
    #[arg(long, env = "COMPOSITION_CSV", default_value = "composition_portefeuilles.csv")]
    pub composition: PathBuf,

    #[arg(long, env = "PORTFOLIOS_JSON", default_value = "portfolios.json")]
    pub registry: PathBuf,

    #[arg(long, env = "PRICES_CSV", default_value = "prices_daily.csv")]
    pub prices_csv: PathBuf,

    /// Directory receiving the performance tables
    #[arg(long, env = "PERFORMANCE_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    #[arg(long, env = "PRICE_SOURCE", value_enum, default_value_t = SourceKind::Csv)]
    pub source: SourceKind,

    /// Only replace the last N rows of existing tables
    #[arg(long)]
    pub patch_days: Option<usize>,

    /// Annual risk-free rate in percent
    #[arg(long, env = "RISK_FREE_ANNUAL_PCT", default_value_t = 0.0)]
    pub risk_free: f64,

    #[arg(long, default_value = "2024-01-01")]
    pub start_date: NaiveDate,

    /// Use the whole price history instead of --start-date
    #[arg(long)]
    pub full_history: bool,

    /// base-date | first-return
    #[arg(long, default_value = "base-date")]
    pub anchor: AnchorRule,

    /// zero-fill | drop-day
    #[arg(long, default_value = "zero-fill")]
    pub gap_policy: GapPolicy,

    #[arg(long, default_value = "^GSPC")]
    pub sp500_symbol: String,

    #[arg(long, default_value = "^IXIC")]
    pub nasdaq_symbol: String,
}

impl PerformanceArgs {
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let config = EngineConfig {
            benchmarks: BenchmarkPair::new(&self.sp500_symbol, &self.nasdaq_symbol),
            risk_free_annual_pct: self.risk_free,
            start_date: (!self.full_history).then_some(self.start_date),
            anchor: self.anchor,
            gap_policy: self.gap_policy,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_performance_defaults() {
        let cli = Cli::try_parse_from(["perf-updater", "performance"]).unwrap();
        let Command::Performance(args) = cli.command else {
            panic!("expected performance command");
        };
        assert_eq!(args.source, SourceKind::Csv);
        assert_eq!(args.patch_days, None);

        let config = args.engine_config().unwrap();
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(config.anchor, AnchorRule::BaseDate);
        assert_eq!(config.gap_policy, GapPolicy::ZeroFill);
        assert_eq!(config.benchmarks, BenchmarkPair::default());
    }

    #[test]
    fn test_performance_flags() {
        let cli = Cli::try_parse_from([
            "perf-updater",
            "performance",
            "--anchor",
            "first-return",
            "--gap-policy",
            "drop-day",
            "--full-history",
            "--patch-days",
            "5",
            "--risk-free",
            "3.5",
        ])
        .unwrap();
        let Command::Performance(args) = cli.command else {
            panic!("expected performance command");
        };
        let config = args.engine_config().unwrap();
        assert_eq!(config.anchor, AnchorRule::FirstReturn);
        assert_eq!(config.gap_policy, GapPolicy::DropDay);
        assert_eq!(config.start_date, None);
        assert_eq!(config.risk_free_annual_pct, 3.5);
        assert_eq!(args.patch_days, Some(5));
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let parsed = Cli::try_parse_from(["perf-updater", "performance", "--anchor", "sideways"]);
        assert!(parsed.is_err());
    }
}
