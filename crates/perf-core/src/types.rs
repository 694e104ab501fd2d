use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Canonical form of a ticker symbol: trimmed and upper-cased.
pub fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// One declared holding as read from the composition store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRecord {
    pub portfolio_name: String,
    /// May hold several symbols separated by `;` or `,`
    pub ticker: String,
    /// Fraction of the portfolio (source percent already divided by 100)
    pub weight: f64,
    pub as_of_date: Option<NaiveDate>,
}

impl WeightRecord {
    pub fn new(
        portfolio_name: impl Into<String>,
        ticker: impl Into<String>,
        weight: f64,
        as_of_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            portfolio_name: portfolio_name.into(),
            ticker: ticker.into(),
            weight,
            as_of_date,
        }
    }
}

/// Final, renormalized weight vector of a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPortfolio {
    pub name: String,
    pub weights: BTreeMap<String, f64>,
    /// Declared tickers that had no prices and were renormalized away
    pub dropped: Vec<String>,
}

impl ResolvedPortfolio {
    pub fn total_weight(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(|t| t.as_str())
    }
}

/// Why a portfolio produced no output in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    NoDatedRecords,
    NoWeights,
    NoAvailableTickers { missing: Vec<String> },
    ZeroWeight,
    NotInComposition,
    ComputationFailed(String),
    WriteFailed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoDatedRecords => write!(f, "no composition row has a parseable date"),
            SkipReason::NoWeights => write!(f, "no ticker in the active composition"),
            SkipReason::NoAvailableTickers { missing } => {
                write!(f, "none of the tickers has prices (missing: {})", missing.join(", "))
            }
            SkipReason::ZeroWeight => write!(f, "available tickers carry zero total weight"),
            SkipReason::NotInComposition => write!(f, "portfolio absent from the composition file"),
            SkipReason::ComputationFailed(msg) => write!(f, "computation failed: {}", msg),
            SkipReason::WriteFailed(msg) => write!(f, "table not written: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPortfolio {
    pub portfolio: String,
    pub reason: SkipReason,
}

/// Dated closing prices of one ticker, ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub ticker: String,
    pub points: Vec<(NaiveDate, f64)>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<String>, mut points: Vec<(NaiveDate, f64)>) -> Self {
        points.sort_by_key(|(d, _)| *d);
        points.dedup_by_key(|(d, _)| *d);
        Self {
            ticker: normalize_ticker(&ticker.into()),
            points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableTicker {
    pub ticker: String,
    pub reason: String,
}

/// Outcome of fetching one ticker from a price source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TickerFetch {
    Fetched(PriceSeries),
    Unavailable(UnavailableTicker),
}

impl TickerFetch {
    pub fn unavailable(ticker: impl Into<String>, reason: impl Into<String>) -> Self {
        TickerFetch::Unavailable(UnavailableTicker {
            ticker: normalize_ticker(&ticker.into()),
            reason: reason.into(),
        })
    }

    pub fn ticker(&self) -> &str {
        match self {
            TickerFetch::Fetched(series) => &series.ticker,
            TickerFetch::Unavailable(u) => &u.ticker,
        }
    }
}

/// Date-indexed, ticker-keyed table of closing prices.
///
/// Every column has exactly one slot per date. Non-finite or non-positive
/// closes are stored as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricePanel {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

fn clean_price(price: f64) -> Option<f64> {
    if price.is_finite() && price > 0.0 {
        Some(price)
    } else {
        None
    }
}

impl PricePanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty panel over a fixed set of dates (sorted and de-duplicated).
    pub fn with_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        let dates: BTreeSet<NaiveDate> = dates.into_iter().collect();
        Self {
            dates: dates.into_iter().collect(),
            columns: BTreeMap::new(),
        }
    }

    pub fn from_series<'a>(series: impl IntoIterator<Item = &'a PriceSeries>) -> Self {
        let mut panel = Self::new();
        for s in series {
            panel.insert_series(s);
        }
        panel
    }

    /// Build a panel from fetch results, returning the tickers that could not be fetched.
    pub fn from_fetches(fetches: Vec<TickerFetch>) -> (Self, Vec<UnavailableTicker>) {
        let mut panel = Self::new();
        let mut unavailable = Vec::new();
        for fetch in fetches {
            match fetch {
                TickerFetch::Fetched(series) if !series.is_empty() => panel.insert_series(&series),
                TickerFetch::Fetched(series) => unavailable.push(UnavailableTicker {
                    ticker: series.ticker,
                    reason: "no prices in range".to_string(),
                }),
                TickerFetch::Unavailable(u) => unavailable.push(u),
            }
        }
        (panel, unavailable)
    }

    /// Merge a series into the panel, extending the date index when needed.
    /// Existing prices of the same ticker on the same dates are overwritten.
    pub fn insert_series(&mut self, series: &PriceSeries) {
        let missing_dates = series
            .points
            .iter()
            .any(|(d, _)| self.dates.binary_search(d).is_err());
        if missing_dates {
            let mut dates: BTreeSet<NaiveDate> = self.dates.iter().copied().collect();
            dates.extend(series.points.iter().map(|(d, _)| *d));
            self.reindex(dates.into_iter().collect());
        }

        let len = self.dates.len();
        let column = self
            .columns
            .entry(normalize_ticker(&series.ticker))
            .or_insert_with(|| vec![None; len]);
        for (date, price) in &series.points {
            if let Ok(idx) = self.dates.binary_search(date) {
                column[idx] = clean_price(*price);
            }
        }
    }

    fn reindex(&mut self, dates: Vec<NaiveDate>) {
        let old_index: HashMap<NaiveDate, usize> =
            self.dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();
        for column in self.columns.values_mut() {
            let reindexed = dates
                .iter()
                .map(|d| old_index.get(d).and_then(|&i| column[i]))
                .collect();
            *column = reindexed;
        }
        self.dates = dates;
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|t| t.as_str())
    }

    pub fn column(&self, ticker: &str) -> Option<&[Option<f64>]> {
        self.columns
            .get(&normalize_ticker(ticker))
            .map(|c| c.as_slice())
    }

    pub fn price(&self, ticker: &str, idx: usize) -> Option<f64> {
        self.column(ticker).and_then(|c| c.get(idx).copied().flatten())
    }

    /// True when the ticker has at least one price.
    pub fn has_prices(&self, ticker: &str) -> bool {
        self.column(ticker)
            .map(|c| c.iter().any(|p| p.is_some()))
            .unwrap_or(false)
    }

    pub fn available_tickers(&self) -> BTreeSet<String> {
        self.columns
            .iter()
            .filter(|(_, c)| c.iter().any(|p| p.is_some()))
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Column with gaps filled by the last known close. Leading gaps stay
    /// missing: prices are never backfilled.
    pub fn forward_filled(&self, ticker: &str) -> Option<Vec<Option<f64>>> {
        let column = self.column(ticker)?;
        let mut last = None;
        Some(
            column
                .iter()
                .map(|p| {
                    if p.is_some() {
                        last = *p;
                    }
                    last
                })
                .collect(),
        )
    }

    /// Sub-panel of the dates on or after `start`.
    pub fn since(&self, start: NaiveDate) -> PricePanel {
        let from = self.dates.partition_point(|d| *d < start);
        PricePanel {
            dates: self.dates[from..].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(t, c)| (t.clone(), c[from..].to_vec()))
                .collect(),
        }
    }

    /// Sub-panel restricted to the given tickers (unknown tickers are ignored).
    pub fn select<'a>(&self, tickers: impl IntoIterator<Item = &'a str>) -> PricePanel {
        let columns = tickers
            .into_iter()
            .filter_map(|t| {
                let key = normalize_ticker(t);
                self.columns.get(&key).map(|c| (key, c.clone()))
            })
            .collect();
        PricePanel {
            dates: self.dates.clone(),
            columns,
        }
    }
}

/// One trading day of a portfolio's performance table.
///
/// NAVs and drawdowns are always defined; every other statistic is `None`
/// while its window is not full or when it is mathematically undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRow {
    pub date: NaiveDate,
    pub portfolio_nav: f64,
    pub sp500_nav: f64,
    pub nasdaq_nav: f64,
    /// 252-observation window
    pub vol_252: Option<f64>,
    /// 5-observation window
    pub vol_5: Option<f64>,
    /// 21-observation window
    pub vol_21: Option<f64>,
    pub drawdown_current: f64,
    pub drawdown_max: f64,
    pub port_return_daily: Option<f64>,
    pub port_return_weekly: Option<f64>,
    pub port_return_monthly: Option<f64>,
    pub sp500_return_daily: Option<f64>,
    pub sp500_return_weekly: Option<f64>,
    pub sp500_return_monthly: Option<f64>,
    pub nasdaq_return_daily: Option<f64>,
    pub nasdaq_return_weekly: Option<f64>,
    pub nasdaq_return_monthly: Option<f64>,
    pub sharpe_21: Option<f64>,
}

impl PerformanceRow {
    /// Output precision: 2 decimals, Sharpe 3.
    pub fn rounded(&self) -> PerformanceRow {
        let r2 = |v: f64| round_to(v, 2);
        let o2 = |v: Option<f64>| v.map(r2);
        PerformanceRow {
            date: self.date,
            portfolio_nav: r2(self.portfolio_nav),
            sp500_nav: r2(self.sp500_nav),
            nasdaq_nav: r2(self.nasdaq_nav),
            vol_252: o2(self.vol_252),
            vol_5: o2(self.vol_5),
            vol_21: o2(self.vol_21),
            drawdown_current: r2(self.drawdown_current),
            drawdown_max: r2(self.drawdown_max),
            port_return_daily: o2(self.port_return_daily),
            port_return_weekly: o2(self.port_return_weekly),
            port_return_monthly: o2(self.port_return_monthly),
            sp500_return_daily: o2(self.sp500_return_daily),
            sp500_return_weekly: o2(self.sp500_return_weekly),
            sp500_return_monthly: o2(self.sp500_return_monthly),
            nasdaq_return_daily: o2(self.nasdaq_return_daily),
            nasdaq_return_weekly: o2(self.nasdaq_return_weekly),
            nasdaq_return_monthly: o2(self.nasdaq_return_monthly),
            sharpe_21: self.sharpe_21.map(|v| round_to(v, 3)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTable {
    pub portfolio: String,
    pub rows: Vec<PerformanceRow>,
}

impl PerformanceTable {
    pub fn new(portfolio: impl Into<String>, rows: Vec<PerformanceRow>) -> Self {
        Self {
            portfolio: portfolio.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&PerformanceRow> {
        self.rows.last()
    }

    /// Keep this table's history and replace everything from the first of the
    /// `days` most recent rows of `fresh` onward with the fresh rows.
    pub fn patch_recent(&self, fresh: &PerformanceTable, days: usize) -> PerformanceTable {
        if days == 0 || fresh.rows.is_empty() {
            return self.clone();
        }
        let tail_start = fresh.rows.len().saturating_sub(days);
        let tail = &fresh.rows[tail_start..];
        let cutoff = tail[0].date;

        let mut rows: Vec<PerformanceRow> = self
            .rows
            .iter()
            .filter(|r| r.date < cutoff)
            .cloned()
            .collect();
        rows.extend(tail.iter().cloned());
        PerformanceTable::new(self.portfolio.clone(), rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn row(day: u32, nav: f64) -> PerformanceRow {
        PerformanceRow {
            date: d(day),
            portfolio_nav: nav,
            sp500_nav: 100.0,
            nasdaq_nav: 100.0,
            vol_252: None,
            vol_5: None,
            vol_21: None,
            drawdown_current: 0.0,
            drawdown_max: 0.0,
            port_return_daily: None,
            port_return_weekly: None,
            port_return_monthly: None,
            sp500_return_daily: None,
            sp500_return_weekly: None,
            sp500_return_monthly: None,
            nasdaq_return_daily: None,
            nasdaq_return_weekly: None,
            nasdaq_return_monthly: None,
            sharpe_21: None,
        }
    }

    #[test]
    fn test_insert_series_merges_dates() {
        let mut panel = PricePanel::new();
        panel.insert_series(&PriceSeries::new("aaa", vec![(d(2), 10.0), (d(3), 11.0)]));
        panel.insert_series(&PriceSeries::new("BBB", vec![(d(1), 5.0), (d(3), 6.0)]));

        assert_eq!(panel.dates(), &[d(1), d(2), d(3)]);
        assert_eq!(panel.column("AAA").unwrap(), &[None, Some(10.0), Some(11.0)]);
        assert_eq!(panel.column("bbb").unwrap(), &[Some(5.0), None, Some(6.0)]);
    }

    #[test]
    fn test_invalid_prices_are_missing() {
        let panel = PricePanel::from_series(&[PriceSeries::new(
            "AAA",
            vec![(d(1), 0.0), (d(2), f64::NAN), (d(3), -1.0)],
        )]);
        assert!(!panel.has_prices("AAA"));
        assert!(panel.available_tickers().is_empty());
    }

    #[test]
    fn test_forward_fill_never_backfills() {
        let mut panel = PricePanel::with_dates([d(1), d(2), d(3), d(4)]);
        panel.insert_series(&PriceSeries::new("AAA", vec![(d(2), 10.0), (d(4), 12.0)]));

        let filled = panel.forward_filled("AAA").unwrap();
        assert_eq!(filled, vec![None, Some(10.0), Some(10.0), Some(12.0)]);
        assert!(panel.forward_filled("ZZZ").is_none());
    }

    #[test]
    fn test_since_and_select() {
        let panel = PricePanel::from_series(&[
            PriceSeries::new("AAA", vec![(d(1), 1.0), (d(2), 2.0), (d(3), 3.0)]),
            PriceSeries::new("BBB", vec![(d(1), 4.0)]),
        ]);
        let recent = panel.since(d(2));
        assert_eq!(recent.dates(), &[d(2), d(3)]);
        assert_eq!(recent.column("AAA").unwrap(), &[Some(2.0), Some(3.0)]);
        assert!(!recent.has_prices("BBB"));

        let only_a = panel.select(["aaa", "missing"]);
        assert_eq!(only_a.tickers().collect::<Vec<_>>(), vec!["AAA"]);
    }

    #[test]
    fn test_from_fetches_splits_unavailable() {
        let fetches = vec![
            TickerFetch::Fetched(PriceSeries::new("AAA", vec![(d(1), 1.0)])),
            TickerFetch::Fetched(PriceSeries::new("EMPTY", vec![])),
            TickerFetch::unavailable("bad", "HTTP 404"),
        ];
        let (panel, unavailable) = PricePanel::from_fetches(fetches);
        assert!(panel.has_prices("AAA"));
        let names: Vec<&str> = unavailable.iter().map(|u| u.ticker.as_str()).collect();
        assert_eq!(names, vec!["EMPTY", "BAD"]);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(101.454, 2), 101.45);
        assert_eq!(round_to(-0.0049, 2), -0.0);
        assert_eq!(round_to(1.23456, 3), 1.235);
    }

    #[test]
    fn test_patch_recent_replaces_tail() {
        let existing = PerformanceTable::new("P", vec![row(1, 100.0), row(2, 101.0), row(3, 99.0)]);
        let fresh = PerformanceTable::new(
            "P",
            vec![row(1, 100.0), row(2, 101.0), row(3, 98.0), row(4, 97.0)],
        );

        let patched = existing.patch_recent(&fresh, 2);
        let navs: Vec<f64> = patched.rows.iter().map(|r| r.portfolio_nav).collect();
        assert_eq!(navs, vec![100.0, 101.0, 98.0, 97.0]);

        let untouched = existing.patch_recent(&fresh, 0);
        assert_eq!(untouched, existing);
    }
}
