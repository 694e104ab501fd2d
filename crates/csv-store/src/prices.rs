//! Daily close history stored as `Date,<TICKER>,...` with one row per trading
//! day and an empty cell where a close is missing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use perf_core::{normalize_ticker, PerfError, PriceSeries, PricePanel, PriceSource, TickerFetch};

use crate::atomic::{into_bytes, write_atomic};
use crate::error::ensure_exists;
use crate::StoreError;

pub const DATE_COLUMN: &str = "Date";

/// Closes for one new trading day.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub closes: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppendSummary {
    pub added_dates: Vec<NaiveDate>,
    pub duplicate_dates: Vec<NaiveDate>,
    pub new_columns: Vec<String>,
}

/// Raw view of the price file. Existing cells are kept as text so an append
/// never rewrites history.
#[derive(Debug, Clone, Default)]
pub struct PriceFile {
    tickers: Vec<String>,
    rows: BTreeMap<NaiveDate, Vec<String>>,
}

fn parse_row_date(raw: &str) -> Option<NaiveDate> {
    let token = raw.split_whitespace().next()?;
    NaiveDate::parse_from_str(token, "%Y-%m-%d").ok()
}

impl PriceFile {
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        ensure_exists(path)?;
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Missing file → empty history.
    pub fn read_or_default(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            Self::read(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(text: &str) -> Result<Self, StoreError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let tickers: Vec<String> = reader
            .headers()?
            .iter()
            .skip(1)
            .map(normalize_ticker)
            .collect();

        let mut rows = BTreeMap::new();
        for result in reader.records() {
            let record = result?;
            let Some(date) = record.get(0).and_then(parse_row_date) else {
                tracing::warn!(
                    "Skipping price row with unparsable date: {:?}",
                    record.get(0).unwrap_or("")
                );
                continue;
            };
            let cells: Vec<String> = (0..tickers.len())
                .map(|i| record.get(i + 1).unwrap_or("").to_string())
                .collect();
            rows.insert(date, cells);
        }

        Ok(Self { tickers, rows })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.keys().next_back().copied()
    }

    pub fn to_panel(&self) -> PricePanel {
        let mut panel = PricePanel::with_dates(self.rows.keys().copied());
        for (i, ticker) in self.tickers.iter().enumerate() {
            let points: Vec<(NaiveDate, f64)> = self
                .rows
                .iter()
                .filter_map(|(date, cells)| {
                    let price = cells.get(i)?.trim().parse::<f64>().ok()?;
                    Some((*date, price))
                })
                .collect();
            panel.insert_series(&PriceSeries::new(ticker.clone(), points));
        }
        panel
    }

    /// Add rows for dates not already stored. Unknown tickers become new
    /// columns, left empty on older rows.
    pub fn append(&mut self, rows: &[PriceRow]) -> AppendSummary {
        let mut summary = AppendSummary::default();
        for row in rows {
            if self.rows.contains_key(&row.date) || summary.added_dates.contains(&row.date) {
                summary.duplicate_dates.push(row.date);
                continue;
            }

            for ticker in row.closes.keys() {
                let ticker = normalize_ticker(ticker);
                if !self.tickers.contains(&ticker) {
                    self.tickers.push(ticker.clone());
                    for cells in self.rows.values_mut() {
                        cells.push(String::new());
                    }
                    summary.new_columns.push(ticker);
                }
            }

            let closes: BTreeMap<String, f64> = row
                .closes
                .iter()
                .map(|(t, p)| (normalize_ticker(t), *p))
                .collect();
            let cells = self
                .tickers
                .iter()
                .map(|t| match closes.get(t) {
                    Some(p) if p.is_finite() && *p > 0.0 => format!("{:.4}", p),
                    _ => String::new(),
                })
                .collect();
            self.rows.insert(row.date, cells);
            summary.added_dates.push(row.date);
        }
        summary
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, StoreError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec![DATE_COLUMN.to_string()];
        header.extend(self.tickers.iter().cloned());
        writer.write_record(&header)?;
        for (date, cells) in &self.rows {
            let mut record = vec![date.format("%Y-%m-%d").to_string()];
            record.extend(cells.iter().cloned());
            writer.write_record(&record)?;
        }
        into_bytes(writer)
    }

    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        write_atomic(path, &self.to_csv_bytes()?)
    }
}

pub fn load_price_panel(path: &Path) -> Result<PricePanel, StoreError> {
    let file = PriceFile::read(path)?;
    tracing::info!(
        "Loaded {} days x {} tickers from {}",
        file.len(),
        file.tickers().len(),
        path.display()
    );
    Ok(file.to_panel())
}

/// Append new trading days to the price file (created when absent) and
/// replace it atomically. Dates already present are left untouched.
pub fn append_price_rows(path: &Path, rows: &[PriceRow]) -> Result<AppendSummary, StoreError> {
    let mut file = PriceFile::read_or_default(path)?;
    let summary = file.append(rows);
    if !summary.duplicate_dates.is_empty() {
        tracing::warn!(
            "{}: {} date(s) already present, not appended",
            path.display(),
            summary.duplicate_dates.len()
        );
    }
    if !summary.added_dates.is_empty() {
        file.write(path)?;
    }
    Ok(summary)
}

/// `PriceSource` over the local price history file.
#[derive(Debug, Clone)]
pub struct CsvPriceSource {
    path: PathBuf,
}

impl CsvPriceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PriceSource for CsvPriceSource {
    async fn fetch_closes(
        &self,
        tickers: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TickerFetch>, PerfError> {
        if !self.path.exists() {
            return Err(StoreError::MissingFile(self.path.clone()).into());
        }
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(StoreError::from)?;
        let panel = PriceFile::parse(&text)?.to_panel();

        let wanted: BTreeSet<String> = tickers.iter().map(|t| normalize_ticker(t)).collect();
        let fetches = wanted
            .into_iter()
            .map(|ticker| {
                let Some(column) = panel.column(&ticker) else {
                    return TickerFetch::unavailable(ticker, "not in price file");
                };
                let points: Vec<(NaiveDate, f64)> = panel
                    .dates()
                    .iter()
                    .zip(column)
                    .filter(|(d, _)| **d >= from && **d <= to)
                    .filter_map(|(d, p)| p.map(|p| (*d, p)))
                    .collect();
                if points.is_empty() {
                    TickerFetch::unavailable(ticker, "no prices in range")
                } else {
                    TickerFetch::Fetched(PriceSeries::new(ticker, points))
                }
            })
            .collect();
        Ok(fetches)
    }

    fn name(&self) -> &str {
        "csv"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn row(day: u32, closes: &[(&str, f64)]) -> PriceRow {
        PriceRow {
            date: d(day),
            closes: closes.iter().map(|(t, p)| (t.to_string(), *p)).collect(),
        }
    }

    const SAMPLE: &str = "Date,AAPL,^GSPC\n\
                          2024-05-01,170.1,5000\n\
                          2024-05-02,,5010.5\n\
                          2024-05-03 00:00:00,172.25,5020\n";

    #[test]
    fn test_parse_to_panel() {
        let file = PriceFile::parse(SAMPLE).unwrap();
        assert_eq!(file.tickers(), &["AAPL".to_string(), "^GSPC".to_string()]);
        assert_eq!(file.last_date(), Some(d(3)));

        let panel = file.to_panel();
        assert_eq!(panel.len(), 3);
        assert_eq!(panel.price("AAPL", 1), None);
        assert_eq!(panel.price("AAPL", 2), Some(172.25));
        assert_eq!(panel.price("^GSPC", 1), Some(5010.5));
    }

    #[test]
    fn test_append_skips_existing_dates_and_adds_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prices_daily.csv");
        std::fs::write(&path, SAMPLE).unwrap();

        let summary = append_price_rows(
            &path,
            &[
                row(3, &[("AAPL", 999.0)]),
                row(6, &[("aapl", 173.123456), ("^GSPC", 5030.0), ("MSFT", 410.0)]),
            ],
        )
        .unwrap();
        assert_eq!(summary.added_dates, vec![d(6)]);
        assert_eq!(summary.duplicate_dates, vec![d(3)]);
        assert_eq!(summary.new_columns, vec!["MSFT".to_string()]);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Date,AAPL,^GSPC,MSFT");
        assert_eq!(lines[1], "2024-05-01,170.1,5000,");
        assert_eq!(lines[3], "2024-05-03,172.25,5020,");
        assert_eq!(lines[4], "2024-05-06,173.1235,5030.0000,410.0000");
    }

    #[test]
    fn test_append_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.csv");
        let summary = append_price_rows(&path, &[row(2, &[("SPY", 500.0)])]).unwrap();
        assert_eq!(summary.added_dates.len(), 1);
        let panel = load_price_panel(&path).unwrap();
        assert_eq!(panel.price("SPY", 0), Some(500.0));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = load_price_panel(Path::new("/nonexistent/prices.csv")).unwrap_err();
        assert!(matches!(err, StoreError::MissingFile(_)));
    }

    #[tokio::test]
    async fn test_csv_price_source_reports_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        std::fs::write(&path, SAMPLE).unwrap();

        let source = CsvPriceSource::new(&path);
        let fetches = source
            .fetch_closes(&["aapl".to_string(), "NOPE".to_string()], d(2), d(31))
            .await
            .unwrap();
        assert_eq!(fetches.len(), 2);
        match &fetches[0] {
            TickerFetch::Fetched(series) => {
                assert_eq!(series.ticker, "AAPL");
                assert_eq!(series.points, vec![(d(3), 172.25)]);
            }
            other => panic!("expected prices, got {:?}", other),
        }
        assert!(matches!(&fetches[1], TickerFetch::Unavailable(u) if u.ticker == "NOPE"));
    }
}
