//! Pure mathematical utilities for performance analytics.
//! Stateless functions: no I/O, no async.
//!
//! Return series are `Option<f64>` slices aligned on a date index: `None`
//! marks a day without a defined return. Rolling statistics are `None` until
//! their window holds `window` defined observations.
use perf_core::TRADING_DAYS_PER_YEAR;
use statrs::statistics::Statistics;

/// Standard deviations at or below this are treated as zero.
const ZERO_STD: f64 = 1e-12;

/// Day-over-day simple returns of a (forward-filled) price column.
/// The first day, and any day whose previous close is missing, has no return.
pub fn simple_returns(prices: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(prices.len());
    for i in 0..prices.len() {
        let ret = if i == 0 {
            None
        } else {
            match (prices[i - 1], prices[i]) {
                (Some(prev), Some(curr)) if prev != 0.0 => Some(curr / prev - 1.0),
                _ => None,
            }
        };
        out.push(ret);
    }
    out
}

/// Cumulative growth factor: product of (1 + r) up to each day.
/// Days without a return leave the factor unchanged.
pub fn compound_index(returns: &[Option<f64>]) -> Vec<f64> {
    let mut level = 1.0;
    returns
        .iter()
        .map(|r| {
            if let Some(r) = r {
                level *= 1.0 + r;
            }
            level
        })
        .collect()
}

/// Scale `values` so that `values[anchor] == base`.
pub fn rebase(values: &[f64], anchor: usize, base: f64) -> Vec<f64> {
    match values.get(anchor) {
        Some(&a) if a != 0.0 => values.iter().map(|v| v / a * base).collect(),
        _ => values.to_vec(),
    }
}

/// Drawdown from the running peak, as a fraction (0 at a peak, negative below it).
pub fn drawdown_series(values: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    values
        .iter()
        .map(|&v| {
            if v > peak {
                peak = v;
            }
            if peak > 0.0 {
                v / peak - 1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Running minimum; applied to a drawdown series it yields the max-drawdown trace.
pub fn running_min(values: &[f64]) -> Vec<f64> {
    let mut low = f64::INFINITY;
    values
        .iter()
        .map(|&v| {
            low = low.min(v);
            low
        })
        .collect()
}

/// Sample standard deviation (n - 1).
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let std = values.std_dev();
    std.is_finite().then_some(std)
}

/// Trailing `window` returns ending at `end`, if all are defined.
fn trailing(returns: &[Option<f64>], end: usize, window: usize) -> Option<Vec<f64>> {
    if window == 0 || end + 1 < window {
        return None;
    }
    returns[end + 1 - window..=end].iter().copied().collect()
}

fn rolling<F>(returns: &[Option<f64>], window: usize, stat: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    (0..returns.len())
        .map(|end| trailing(returns, end, window).and_then(|w| stat(&w)))
        .collect()
}

/// Rolling annualized volatility (fraction) over trailing `window` returns.
/// Always annualized with the trading-day factor since inputs are daily.
pub fn rolling_volatility(returns: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(returns, window, |w| {
        sample_std(w).map(|s| s * TRADING_DAYS_PER_YEAR.sqrt())
    })
}

/// Rolling compounded return (fraction) over trailing `window` returns.
pub fn rolling_compound_return(returns: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(returns, window, |w| {
        Some(w.iter().map(|r| 1.0 + r).product::<f64>() - 1.0)
    })
}

/// Sharpe ratio: mean(r - rf_daily) / std(r) * sqrt(252).
/// `None` with fewer than two returns or a zero standard deviation.
pub fn sharpe_ratio(returns: &[f64], rf_daily: f64) -> Option<f64> {
    let std_dev = sample_std(returns)?;
    if std_dev <= ZERO_STD {
        return None;
    }
    let excess = returns.mean() - rf_daily;
    let sharpe = excess / std_dev * TRADING_DAYS_PER_YEAR.sqrt();
    sharpe.is_finite().then_some(sharpe)
}

/// Rolling Sharpe ratio over trailing `window` returns.
pub fn rolling_sharpe(returns: &[Option<f64>], window: usize, rf_daily: f64) -> Vec<Option<f64>> {
    rolling(returns, window, |w| sharpe_ratio(w, rf_daily))
}

/// Total return (fraction) between the first and last value.
pub fn total_return(values: &[f64]) -> Option<f64> {
    let first = *values.first()?;
    let last = *values.last()?;
    if first == 0.0 {
        return None;
    }
    Some(last / first - 1.0)
}

pub fn to_percent(value: Option<f64>) -> Option<f64> {
    value.map(|v| v * 100.0)
}
