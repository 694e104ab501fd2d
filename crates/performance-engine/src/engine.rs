use perf_core::{
    AnchorRule, EngineConfig, GapPolicy, PerfError, PerformanceRow, PerformanceTable, PricePanel,
    ResolvedPortfolio,
};

use crate::shared_math::{self, to_percent};

pub const WEEK_WINDOW: usize = 5;
pub const MONTH_WINDOW: usize = 21;
pub const YEAR_WINDOW: usize = 252;

/// Computes the daily performance table of one portfolio against the two
/// configured benchmarks.
///
/// Each call is independent and only reads its inputs, so callers may run
/// many portfolios in parallel over one shared panel.
#[derive(Debug, Clone, Default)]
pub struct PerformanceEngine {
    config: EngineConfig,
}

/// Return series sampled on the output date grid.
struct GridSeries {
    returns: Vec<Option<f64>>,
    nav: Vec<f64>,
}

impl PerformanceEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The part of `prices` the engine computes on. Ticker availability for
    /// the resolver must be taken from this window, not the full history.
    pub fn window(&self, prices: &PricePanel) -> PricePanel {
        match self.config.start_date {
            Some(start) => prices.since(start),
            None => prices.clone(),
        }
    }

    pub fn compute(
        &self,
        portfolio: &ResolvedPortfolio,
        prices: &PricePanel,
    ) -> Result<PerformanceTable, PerfError> {
        if portfolio.weights.is_empty() {
            return Err(PerfError::InsufficientData(format!(
                "{}: empty weight vector",
                portfolio.name
            )));
        }

        let benchmarks = &self.config.benchmarks;
        let needed = portfolio.tickers().chain(benchmarks.symbols());
        let panel = self.window(&prices.select(needed));

        for ticker in portfolio.tickers() {
            if panel.column(ticker).is_none() {
                return Err(PerfError::MissingTicker {
                    portfolio: portfolio.name.clone(),
                    ticker: ticker.to_string(),
                });
            }
        }
        for symbol in benchmarks.symbols() {
            if !panel.has_prices(symbol) {
                return Err(PerfError::MissingBenchmark(symbol.to_string()));
            }
        }

        let daily = self.portfolio_returns(portfolio, &panel)?;
        let return_days: Vec<usize> = daily
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.map(|_| i))
            .collect();
        let Some(&first) = return_days.first() else {
            return Err(PerfError::InsufficientData(format!(
                "{}: no day with a computable return",
                portfolio.name
            )));
        };

        // simple_returns never yields a return on day 0, so `first - 1` exists.
        let mut grid = Vec::with_capacity(return_days.len() + 1);
        grid.push(first - 1);
        grid.extend(return_days.iter().copied());
        let skip = match self.config.anchor {
            AnchorRule::BaseDate => 0,
            AnchorRule::FirstReturn => 1,
        };

        let port_returns: Vec<Option<f64>> = grid
            .iter()
            .enumerate()
            .map(|(k, &i)| if k == 0 { None } else { daily[i] })
            .collect();
        let port = Self::sample(&port_returns, skip);
        let sp = Self::sample(&Self::benchmark_returns(&panel, &benchmarks.sp500, &grid), skip);
        let nasdaq = Self::sample(&Self::benchmark_returns(&panel, &benchmarks.nasdaq, &grid), skip);
        let dates: Vec<_> = grid[skip..].iter().map(|&i| panel.dates()[i]).collect();

        let drawdown = shared_math::drawdown_series(&port.nav);
        let drawdown_max = shared_math::running_min(&drawdown);

        let vol_252 = shared_math::rolling_volatility(&port.returns, YEAR_WINDOW);
        let vol_5 = shared_math::rolling_volatility(&port.returns, WEEK_WINDOW);
        let vol_21 = shared_math::rolling_volatility(&port.returns, MONTH_WINDOW);
        let sharpe_21 =
            shared_math::rolling_sharpe(&port.returns, MONTH_WINDOW, self.config.daily_risk_free());

        let [port_week, port_month] = Self::period_returns(&port.returns);
        let [sp_week, sp_month] = Self::period_returns(&sp.returns);
        let [nasdaq_week, nasdaq_month] = Self::period_returns(&nasdaq.returns);

        let rows = (0..dates.len())
            .map(|k| PerformanceRow {
                date: dates[k],
                portfolio_nav: port.nav[k],
                sp500_nav: sp.nav[k],
                nasdaq_nav: nasdaq.nav[k],
                vol_252: to_percent(vol_252[k]),
                vol_5: to_percent(vol_5[k]),
                vol_21: to_percent(vol_21[k]),
                drawdown_current: drawdown[k] * 100.0,
                drawdown_max: drawdown_max[k] * 100.0,
                port_return_daily: to_percent(port.returns[k]),
                port_return_weekly: to_percent(port_week[k]),
                port_return_monthly: to_percent(port_month[k]),
                sp500_return_daily: to_percent(sp.returns[k]),
                sp500_return_weekly: to_percent(sp_week[k]),
                sp500_return_monthly: to_percent(sp_month[k]),
                nasdaq_return_daily: to_percent(nasdaq.returns[k]),
                nasdaq_return_weekly: to_percent(nasdaq_week[k]),
                nasdaq_return_monthly: to_percent(nasdaq_month[k]),
                sharpe_21: sharpe_21[k],
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            "{}: {} rows from {} to {}",
            portfolio.name,
            rows.len(),
            dates[0],
            dates[dates.len() - 1]
        );

        Ok(PerformanceTable::new(portfolio.name.clone(), rows))
    }

    /// Weighted daily portfolio return on every panel day, `None` where the
    /// gap policy leaves the day undefined.
    fn portfolio_returns(
        &self,
        portfolio: &ResolvedPortfolio,
        panel: &PricePanel,
    ) -> Result<Vec<Option<f64>>, PerfError> {
        let mut assets = Vec::with_capacity(portfolio.weights.len());
        for (ticker, &weight) in &portfolio.weights {
            let filled = panel
                .forward_filled(ticker)
                .ok_or_else(|| PerfError::MissingTicker {
                    portfolio: portfolio.name.clone(),
                    ticker: ticker.clone(),
                })?;
            assets.push((weight, shared_math::simple_returns(&filled)));
        }

        let daily: Vec<Option<f64>> = (0..panel.len())
            .map(|i| {
                let defined = assets.iter().filter(|(_, r)| r[i].is_some()).count();
                let keep = match self.config.gap_policy {
                    GapPolicy::ZeroFill => defined > 0,
                    GapPolicy::DropDay => defined == assets.len(),
                };
                keep.then(|| {
                    assets
                        .iter()
                        .map(|(w, r)| w * r[i].unwrap_or(0.0))
                        .sum::<f64>()
                })
            })
            .collect();
        Ok(daily)
    }

    /// Benchmark returns between consecutive grid days. The first grid day has
    /// no return; a step without a price on either side stays undefined.
    fn benchmark_returns(panel: &PricePanel, symbol: &str, grid: &[usize]) -> Vec<Option<f64>> {
        let filled = panel.forward_filled(symbol).unwrap_or_default();
        let at = |i: usize| filled.get(i).copied().flatten();
        grid.iter()
            .enumerate()
            .map(|(k, &i)| {
                if k == 0 {
                    return None;
                }
                match (at(grid[k - 1]), at(i)) {
                    (Some(prev), Some(curr)) => Some(curr / prev - 1.0),
                    _ => None,
                }
            })
            .collect()
    }

    /// Drop the first `skip` grid days and rebase the NAV to 100 on what remains.
    fn sample(grid_returns: &[Option<f64>], skip: usize) -> GridSeries {
        let returns = grid_returns[skip..].to_vec();
        let growth = shared_math::compound_index(&returns);
        let nav = shared_math::rebase(&growth, 0, 100.0);
        GridSeries { returns, nav }
    }

    fn period_returns(returns: &[Option<f64>]) -> [Vec<Option<f64>>; 2] {
        [
            shared_math::rolling_compound_return(returns, WEEK_WINDOW),
            shared_math::rolling_compound_return(returns, MONTH_WINDOW),
        ]
    }
}
