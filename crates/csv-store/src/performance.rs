use std::path::Path;

use chrono::NaiveDate;
use perf_core::{PerformanceRow, PerformanceTable};

use crate::atomic::{into_bytes, write_atomic};
use crate::error::ensure_exists;
use crate::StoreError;

pub const PERFORMANCE_HEADER: [&str; 19] = [
    "Date",
    "Portfolio_CumReturn",
    "SP500_CumReturn",
    "NASDAQ_CumReturn",
    "Vol_Daily",
    "Vol_Weekly",
    "Vol_Monthly",
    "Drawdown_Current",
    "Drawdown_Max",
    "Return_Port_Daily",
    "Return_Port_Weekly",
    "Return_Port_Monthly",
    "Return_SP_Daily",
    "Return_SP_Weekly",
    "Return_SP_Monthly",
    "Return_NASDAQ_Daily",
    "Return_NASDAQ_Weekly",
    "Return_NASDAQ_Monthly",
    "Sharpe_Monthly_Rolling",
];

fn fixed(value: f64, decimals: usize) -> String {
    // Avoid "-0.00" for values that round to zero.
    let text = format!("{:.*}", decimals, value);
    if text.trim_start_matches('-').chars().all(|c| c == '0' || c == '.') {
        text.trim_start_matches('-').to_string()
    } else {
        text
    }
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| fixed(v, 2)).unwrap_or_default()
}

fn record(row: &PerformanceRow) -> Vec<String> {
    let row = row.rounded();
    vec![
        row.date.format("%Y-%m-%d").to_string(),
        fixed(row.portfolio_nav, 2),
        fixed(row.sp500_nav, 2),
        fixed(row.nasdaq_nav, 2),
        cell(row.vol_252),
        cell(row.vol_5),
        cell(row.vol_21),
        fixed(row.drawdown_current, 2),
        fixed(row.drawdown_max, 2),
        cell(row.port_return_daily),
        cell(row.port_return_weekly),
        cell(row.port_return_monthly),
        cell(row.sp500_return_daily),
        cell(row.sp500_return_weekly),
        cell(row.sp500_return_monthly),
        cell(row.nasdaq_return_daily),
        cell(row.nasdaq_return_weekly),
        cell(row.nasdaq_return_monthly),
        row.sharpe_21.map(|v| fixed(v, 3)).unwrap_or_default(),
    ]
}

pub fn performance_csv_bytes(table: &PerformanceTable) -> Result<Vec<u8>, StoreError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(PERFORMANCE_HEADER)?;
    for row in &table.rows {
        writer.write_record(record(row))?;
    }
    into_bytes(writer)
}

/// Replace the table file atomically; an existing file survives any failure.
pub fn write_performance_table(path: &Path, table: &PerformanceTable) -> Result<(), StoreError> {
    let bytes = performance_csv_bytes(table)?;
    write_atomic(path, &bytes)?;
    tracing::debug!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

pub fn read_performance_table(path: &Path, portfolio: &str) -> Result<PerformanceTable, StoreError> {
    ensure_exists(path)?;
    let text = std::fs::read_to_string(path)?;
    parse_performance_csv(&text, portfolio, &path.display().to_string())
}

pub fn parse_performance_csv(
    text: &str,
    portfolio: &str,
    source: &str,
) -> Result<PerformanceTable, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut idx = [0usize; 19];
    for (slot, name) in idx.iter_mut().zip(PERFORMANCE_HEADER) {
        *slot = headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| StoreError::MissingColumn {
                file: source.to_string(),
                column: name.to_string(),
            })?;
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let invalid = |what: &str| {
            StoreError::InvalidData(format!("{} line {}: invalid {}", source, line, what))
        };
        let raw = |col: usize| record.get(idx[col]).unwrap_or("");
        let opt = |col: usize| -> Result<Option<f64>, StoreError> {
            let text = raw(col);
            if text.is_empty() {
                return Ok(None);
            }
            text.parse::<f64>()
                .map(Some)
                .map_err(|_| invalid(PERFORMANCE_HEADER[col]))
        };
        let req = |col: usize| -> Result<f64, StoreError> {
            opt(col)?.ok_or_else(|| invalid(PERFORMANCE_HEADER[col]))
        };

        let date = NaiveDate::parse_from_str(raw(0), "%Y-%m-%d").map_err(|_| invalid("Date"))?;
        rows.push(PerformanceRow {
            date,
            portfolio_nav: req(1)?,
            sp500_nav: req(2)?,
            nasdaq_nav: req(3)?,
            vol_252: opt(4)?,
            vol_5: opt(5)?,
            vol_21: opt(6)?,
            drawdown_current: req(7)?,
            drawdown_max: req(8)?,
            port_return_daily: opt(9)?,
            port_return_weekly: opt(10)?,
            port_return_monthly: opt(11)?,
            sp500_return_daily: opt(12)?,
            sp500_return_weekly: opt(13)?,
            sp500_return_monthly: opt(14)?,
            nasdaq_return_daily: opt(15)?,
            nasdaq_return_weekly: opt(16)?,
            nasdaq_return_monthly: opt(17)?,
            sharpe_21: opt(18)?,
        });
    }

    Ok(PerformanceTable::new(portfolio, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(day: u32, nav: f64, sharpe: Option<f64>) -> PerformanceRow {
        PerformanceRow {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            portfolio_nav: nav,
            sp500_nav: 100.0,
            nasdaq_nav: 99.996,
            vol_252: None,
            vol_5: Some(12.3456),
            vol_21: None,
            drawdown_current: -0.001,
            drawdown_max: -1.239,
            port_return_daily: Some(0.4),
            port_return_weekly: None,
            port_return_monthly: None,
            sp500_return_daily: None,
            sp500_return_weekly: None,
            sp500_return_monthly: None,
            nasdaq_return_daily: Some(-0.25),
            nasdaq_return_weekly: None,
            nasdaq_return_monthly: None,
            sharpe_21: sharpe,
        }
    }

    #[test]
    fn test_header_and_formatting() {
        let table = PerformanceTable::new("Test", vec![row(2, 100.404, Some(1.23456))]);
        let text = String::from_utf8(performance_csv_bytes(&table).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], PERFORMANCE_HEADER.join(","));
        assert_eq!(
            lines[1],
            "2024-01-02,100.40,100.00,100.00,,12.35,,0.00,-1.24,0.40,,,,,,-0.25,,,1.235"
        );
    }

    #[test]
    fn test_write_then_patch_recent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("portefeuille_test_v2.csv");
        let old = PerformanceTable::new(
            "Test",
            vec![row(2, 100.0, None), row(3, 101.0, None), row(4, 102.0, None)],
        );
        write_performance_table(&path, &old).unwrap();

        let stored = read_performance_table(&path, "Test").unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored.rows[1].portfolio_nav, 101.0);
        assert_eq!(stored.rows[0].vol_252, None);
        assert_eq!(stored.rows[0].vol_5, Some(12.35));

        let fresh = PerformanceTable::new(
            "Test",
            vec![row(2, 100.0, None), row(3, 101.5, None), row(4, 103.0, None), row(5, 104.0, Some(0.5))],
        );
        let patched = stored.patch_recent(&fresh, 2);
        write_performance_table(&path, &patched).unwrap();

        let reread = read_performance_table(&path, "Test").unwrap();
        let navs: Vec<f64> = reread.rows.iter().map(|r| r.portfolio_nav).collect();
        assert_eq!(navs, vec![100.0, 101.0, 103.0, 104.0]);
        assert_eq!(reread.rows[3].sharpe_21, Some(0.5));
    }

    #[test]
    fn test_missing_column_on_read() {
        let err = parse_performance_csv("Date,Portfolio_CumReturn\n", "T", "t.csv").unwrap_err();
        assert!(matches!(err, StoreError::MissingColumn { ref column, .. } if column == "SP500_CumReturn"));
    }
}
