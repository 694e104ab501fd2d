use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{normalize_ticker, PerfError};

/// Trading days per year; the annualization factor for every daily statistic.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Benchmark columns every performance table is compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkPair {
    pub sp500: String,
    pub nasdaq: String,
}

impl BenchmarkPair {
    pub fn new(sp500: &str, nasdaq: &str) -> Self {
        Self {
            sp500: normalize_ticker(sp500),
            nasdaq: normalize_ticker(nasdaq),
        }
    }

    pub fn symbols(&self) -> [&str; 2] {
        [&self.sp500, &self.nasdaq]
    }
}

impl Default for BenchmarkPair {
    fn default() -> Self {
        Self::new("^GSPC", "^IXIC")
    }
}

/// Which day of the output carries NAV = 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorRule {
    /// The trading day before the first computable return is row 0.
    #[default]
    BaseDate,
    /// The first day with a computable return is row 0.
    FirstReturn,
}

impl FromStr for AnchorRule {
    type Err = PerfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "base-date" | "base" => Ok(AnchorRule::BaseDate),
            "first-return" | "first" => Ok(AnchorRule::FirstReturn),
            other => Err(PerfError::Config(format!("unknown anchor rule: {}", other))),
        }
    }
}

/// How a day is treated when some constituents have no defined return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapPolicy {
    /// Missing constituents contribute 0; the day is kept if any constituent has a return.
    #[default]
    ZeroFill,
    /// The day is kept only when every constituent has a return.
    DropDay,
}

impl FromStr for GapPolicy {
    type Err = PerfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "zero-fill" | "zero" => Ok(GapPolicy::ZeroFill),
            "drop-day" | "drop" => Ok(GapPolicy::DropDay),
            other => Err(PerfError::Config(format!("unknown gap policy: {}", other))),
        }
    }
}

/// Everything the performance engine needs besides its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub benchmarks: BenchmarkPair,
    /// Annual risk-free rate in percent (2.5 means 2.5%)
    pub risk_free_annual_pct: f64,
    /// Panel dates before this day are ignored
    pub start_date: Option<NaiveDate>,
    pub anchor: AnchorRule,
    pub gap_policy: GapPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            benchmarks: BenchmarkPair::default(),
            risk_free_annual_pct: 0.0,
            start_date: None,
            anchor: AnchorRule::default(),
            gap_policy: GapPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn daily_risk_free(&self) -> f64 {
        self.risk_free_annual_pct / 100.0 / TRADING_DAYS_PER_YEAR
    }

    pub fn validate(&self) -> Result<(), PerfError> {
        if !self.risk_free_annual_pct.is_finite() {
            return Err(PerfError::Config("risk-free rate must be finite".to_string()));
        }
        if self.benchmarks.sp500.is_empty() || self.benchmarks.nasdaq.is_empty() {
            return Err(PerfError::Config("benchmark symbols must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("base-date".parse::<AnchorRule>().unwrap(), AnchorRule::BaseDate);
        assert_eq!("FIRST_RETURN".parse::<AnchorRule>().unwrap(), AnchorRule::FirstReturn);
        assert_eq!("drop".parse::<GapPolicy>().unwrap(), GapPolicy::DropDay);
        assert!("sideways".parse::<GapPolicy>().is_err());
    }

    #[test]
    fn test_daily_risk_free() {
        let config = EngineConfig {
            risk_free_annual_pct: 2.52,
            ..EngineConfig::default()
        };
        assert!((config.daily_risk_free() - 0.0001).abs() < 1e-15);
    }

    #[test]
    fn test_validate_rejects_empty_benchmark() {
        let config = EngineConfig {
            benchmarks: BenchmarkPair::new("^GSPC", " "),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(EngineConfig::default().validate().is_ok());
    }
}
