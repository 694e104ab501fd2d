//! Single-shot equity curve for an arbitrary set of share counts.
//!
//! Shares the return, drawdown and Sharpe kernels of the performance engine;
//! there are no rolling windows and no benchmark.

use chrono::NaiveDate;
use perf_core::{normalize_ticker, round_to, PricePanel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::shared_math;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityMetrics {
    pub total_return_pct: f64,
    /// Whole-window Sharpe (risk-free 0); `None` when undefined
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown_pct: f64,
    pub final_value: f64,
    pub initial_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquityCurve {
    pub dates: Vec<NaiveDate>,
    /// Position value per date, rounded to 2 decimals
    pub values: Vec<f64>,
    pub metrics: Option<EquityMetrics>,
    /// Requested tickers without any price
    pub skipped: Vec<String>,
}

pub struct EquityCalculator;

impl EquityCalculator {
    /// Value of `positions` (ticker → share count) on every panel day where
    /// each priced position has a close (forward-filled, never backfilled).
    pub fn compute(positions: &BTreeMap<String, f64>, panel: &PricePanel) -> EquityCurve {
        let mut shares: BTreeMap<String, f64> = BTreeMap::new();
        for (ticker, &count) in positions {
            if !count.is_finite() || count <= 0.0 {
                continue;
            }
            let ticker = normalize_ticker(ticker);
            if ticker.is_empty() {
                continue;
            }
            *shares.entry(ticker).or_insert(0.0) += count;
        }

        let mut skipped = Vec::new();
        let mut held: Vec<(f64, Vec<Option<f64>>)> = Vec::new();
        for (ticker, count) in &shares {
            match panel.forward_filled(ticker) {
                Some(filled) if filled.iter().any(|p| p.is_some()) => held.push((*count, filled)),
                _ => skipped.push(ticker.clone()),
            }
        }
        if !skipped.is_empty() {
            tracing::warn!("Equity curve: no prices for {:?}", skipped);
        }
        if held.is_empty() {
            return EquityCurve {
                skipped,
                ..EquityCurve::default()
            };
        }

        let mut dates = Vec::new();
        let mut values = Vec::new();
        for (i, date) in panel.dates().iter().enumerate() {
            let value: Option<f64> = held
                .iter()
                .map(|(count, prices)| prices[i].map(|p| p * count))
                .sum();
            if let Some(v) = value {
                dates.push(*date);
                values.push(v);
            }
        }

        let metrics = Self::metrics(&values);
        EquityCurve {
            dates,
            values: values.iter().map(|v| round_to(*v, 2)).collect(),
            metrics,
            skipped,
        }
    }

    fn metrics(values: &[f64]) -> Option<EquityMetrics> {
        let initial = *values.first()?;
        let last = *values.last()?;
        let closes: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
        let returns: Vec<f64> = shared_math::simple_returns(&closes)
            .into_iter()
            .flatten()
            .collect();
        let drawdown = shared_math::drawdown_series(values);
        let max_dd = drawdown.iter().copied().fold(0.0, f64::min);

        Some(EquityMetrics {
            total_return_pct: round_to(shared_math::total_return(values).unwrap_or(0.0) * 100.0, 2),
            sharpe_ratio: shared_math::sharpe_ratio(&returns, 0.0).map(|s| round_to(s, 2)),
            max_drawdown_pct: round_to(max_dd * 100.0, 2),
            final_value: round_to(last, 2),
            initial_value: round_to(initial, 2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use perf_core::PriceSeries;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn panel() -> PricePanel {
        PricePanel::from_series(&[
            PriceSeries::new("AAA", vec![(d(1), 10.0), (d(4), 11.0), (d(5), 9.0), (d(6), 12.0)]),
            PriceSeries::new("BBB", vec![(d(4), 20.0), (d(5), 20.0), (d(6), 21.0)]),
        ])
    }

    fn positions(items: &[(&str, f64)]) -> BTreeMap<String, f64> {
        items.iter().map(|(t, s)| (t.to_string(), *s)).collect()
    }

    #[test]
    fn test_equity_starts_when_all_positions_priced() {
        let curve = EquityCalculator::compute(&positions(&[("aaa", 10.0), ("BBB", 5.0)]), &panel());
        assert_eq!(curve.dates, vec![d(4), d(5), d(6)]);
        assert_eq!(curve.values, vec![210.0, 190.0, 225.0]);

        let metrics = curve.metrics.unwrap();
        assert_eq!(metrics.initial_value, 210.0);
        assert_eq!(metrics.final_value, 225.0);
        assert_relative_eq!(metrics.total_return_pct, 7.14, epsilon = 1e-9);
        assert_relative_eq!(metrics.max_drawdown_pct, -9.52, epsilon = 1e-9);
        assert!(metrics.sharpe_ratio.is_some());
    }

    #[test]
    fn test_equity_sharpe_uses_day_over_day_returns() {
        let curve = EquityCalculator::compute(&positions(&[("AAA", 10.0), ("BBB", 5.0)]), &panel());
        let returns = [190.0 / 210.0 - 1.0, 225.0 / 190.0 - 1.0];
        let expected = shared_math::sharpe_ratio(&returns, 0.0).unwrap();
        assert_relative_eq!(
            curve.metrics.unwrap().sharpe_ratio.unwrap(),
            round_to(expected, 2),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_unknown_ticker_is_skipped() {
        let curve = EquityCalculator::compute(&positions(&[("AAA", 1.0), ("NOPE", 3.0)]), &panel());
        assert_eq!(curve.skipped, vec!["NOPE".to_string()]);
        assert_eq!(curve.dates.len(), 4);
    }

    #[test]
    fn test_empty_positions_give_empty_curve() {
        let curve = EquityCalculator::compute(&BTreeMap::new(), &panel());
        assert!(curve.dates.is_empty());
        assert!(curve.metrics.is_none());
    }

    #[test]
    fn test_flat_equity_has_undefined_sharpe() {
        let flat = PricePanel::from_series(&[PriceSeries::new(
            "CASH",
            vec![(d(1), 1.0), (d(4), 1.0), (d(5), 1.0)],
        )]);
        let curve = EquityCalculator::compute(&positions(&[("CASH", 100.0)]), &flat);
        let metrics = curve.metrics.unwrap();
        assert_eq!(metrics.sharpe_ratio, None);
        assert_eq!(metrics.total_return_pct, 0.0);
        assert_eq!(metrics.max_drawdown_pct, 0.0);
    }
}
