use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use chrono::{Datelike, NaiveDate, Weekday};
use csv_store::{append_price_rows, load_ticker_list, PriceFile, PriceRow};
use perf_core::{PriceSource, TickerFetch};

use crate::cli::PricesArgs;

#[derive(Debug, Clone, PartialEq)]
pub enum PricesOutcome {
    UpToDate(NaiveDate),
    Appended {
        from: NaiveDate,
        to: NaiveDate,
        days: usize,
        unavailable: usize,
    },
}

impl fmt::Display for PricesOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PricesOutcome::UpToDate(day) => write!(f, "{} already present, nothing to do", day),
            PricesOutcome::Appended {
                from,
                to,
                days,
                unavailable,
            } => write!(
                f,
                "Appended {} trading day(s) from {} to {} ({} ticker(s) without data)",
                days, from, to, unavailable
            ),
        }
    }
}

/// Dates to fetch: from the day after the last stored date (or `days_back`
/// days before yesterday on a first run) through yesterday.
pub fn fetch_window(
    last_stored: Option<NaiveDate>,
    today: NaiveDate,
    days_back: i64,
) -> Option<(NaiveDate, NaiveDate)> {
    let yesterday = today.pred_opt()?;
    let from = match last_stored {
        Some(last) => last.succ_opt()?,
        None => yesterday - chrono::Duration::days(days_back.max(0)),
    };
    (from <= yesterday).then_some((from, yesterday))
}

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// One row per weekday in `[from, to]` that received at least one close.
pub fn rows_from_fetches(fetches: &[TickerFetch], from: NaiveDate, to: NaiveDate) -> Vec<PriceRow> {
    let mut by_date: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
    for fetch in fetches {
        let TickerFetch::Fetched(series) = fetch else {
            continue;
        };
        for (date, close) in &series.points {
            if *date < from || *date > to || !is_weekday(*date) {
                continue;
            }
            by_date
                .entry(*date)
                .or_default()
                .insert(series.ticker.clone(), *close);
        }
    }
    by_date
        .into_iter()
        .map(|(date, closes)| PriceRow { date, closes })
        .collect()
}

pub async fn run(
    args: &PricesArgs,
    source: &dyn PriceSource,
    today: NaiveDate,
    timeout: Duration,
) -> anyhow::Result<PricesOutcome> {
    let file = PriceFile::read_or_default(&args.prices_csv)?;
    let mut tickers: Vec<String> = file.tickers().to_vec();
    if let Some(list) = &args.tickers {
        for ticker in load_ticker_list(list)? {
            if !tickers.contains(&ticker) {
                tickers.push(ticker);
            }
        }
    }
    if tickers.is_empty() {
        anyhow::bail!(
            "no tickers to update: {} has no columns and no ticker file was given",
            args.prices_csv.display()
        );
    }

    let Some((from, to)) = fetch_window(file.last_date(), today, args.days_back) else {
        return Ok(PricesOutcome::UpToDate(file.last_date().unwrap_or(today)));
    };
    tracing::info!(
        "Fetching {} ticker(s) from {} ({} to {})",
        tickers.len(),
        source.name(),
        from,
        to
    );

    let fetches = tokio::time::timeout(timeout, source.fetch_closes(&tickers, from, to))
        .await
        .with_context(|| format!("price fetch timed out after {:?}", timeout))??;

    let unavailable = fetches
        .iter()
        .filter(|f| matches!(f, TickerFetch::Unavailable(_)))
        .count();
    for fetch in &fetches {
        if let TickerFetch::Unavailable(u) = fetch {
            tracing::warn!("{}: {}", u.ticker, u.reason);
        }
    }

    let rows = rows_from_fetches(&fetches, from, to);
    let summary = append_price_rows(&args.prices_csv, &rows)?;
    Ok(PricesOutcome::Appended {
        from,
        to,
        days: summary.added_dates.len(),
        unavailable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use perf_core::{PerfError, PriceSeries};
    use tempfile::tempdir;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    /// Serves a fixed set of fetch results.
    struct StaticSource(Vec<TickerFetch>);

    #[async_trait]
    impl PriceSource for StaticSource {
        async fn fetch_closes(
            &self,
            _tickers: &[String],
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> Result<Vec<TickerFetch>, PerfError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    #[test]
    fn test_fetch_window() {
        assert_eq!(
            fetch_window(Some(d(5, 2)), d(5, 7), 90),
            Some((d(5, 3), d(5, 6)))
        );
        assert_eq!(fetch_window(Some(d(5, 6)), d(5, 7), 90), None);
        assert_eq!(fetch_window(None, d(5, 7), 10), Some((d(4, 26), d(5, 6))));
    }

    #[test]
    fn test_rows_skip_weekends_and_empty_days() {
        let fetches = vec![
            TickerFetch::Fetched(PriceSeries::new(
                "AAA",
                vec![(d(5, 3), 10.0), (d(5, 4), 11.0), (d(5, 6), 12.0)],
            )),
            TickerFetch::unavailable("BBB", "HTTP 404"),
        ];
        let rows = rows_from_fetches(&fetches, d(5, 3), d(5, 7));
        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
        // 2024-05-04 is a Saturday; 2024-05-07 has no close.
        assert_eq!(dates, vec![d(5, 3), d(5, 6)]);
        assert_eq!(rows[1].closes["AAA"], 12.0);
    }

    #[tokio::test]
    async fn test_run_appends_new_days() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prices_daily.csv");
        std::fs::write(&path, "Date,AAA\n2024-05-02,9.5\n").unwrap();

        let source = StaticSource(vec![TickerFetch::Fetched(PriceSeries::new(
            "AAA",
            vec![(d(5, 2), 1.0), (d(5, 3), 10.0), (d(5, 6), 12.0)],
        ))]);
        let args = PricesArgs {
            prices_csv: path.clone(),
            tickers: None,
            days_back: 90,
        };

        let outcome = run(&args, &source, d(5, 7), Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            outcome,
            PricesOutcome::Appended {
                from: d(5, 3),
                to: d(5, 6),
                days: 2,
                unavailable: 0
            }
        );
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text.lines().collect::<Vec<_>>(),
            vec!["Date,AAA", "2024-05-02,9.5", "2024-05-03,10.0000", "2024-05-06,12.0000"]
        );

        let again = run(&args, &source, d(5, 7), Duration::from_secs(5)).await.unwrap();
        assert_eq!(again, PricesOutcome::UpToDate(d(5, 6)));
    }
}
