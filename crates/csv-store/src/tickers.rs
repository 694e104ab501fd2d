use std::path::Path;

use perf_core::normalize_ticker;

use crate::error::ensure_exists;
use crate::StoreError;

pub const TICKER_COLUMN: &str = "ticker";

/// Tickers listed in the `ticker` column of a tab-separated file, upper-cased,
/// first occurrence kept.
pub fn load_ticker_list(path: &Path) -> Result<Vec<String>, StoreError> {
    ensure_exists(path)?;
    let text = std::fs::read_to_string(path)?;
    parse_ticker_list(&text, &path.display().to_string())
}

pub fn parse_ticker_list(text: &str, source: &str) -> Result<Vec<String>, StoreError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let idx = reader
        .headers()?
        .iter()
        .position(|h| h.eq_ignore_ascii_case(TICKER_COLUMN))
        .ok_or_else(|| StoreError::MissingColumn {
            file: source.to_string(),
            column: TICKER_COLUMN.to_string(),
        })?;

    let mut tickers: Vec<String> = Vec::new();
    for result in reader.records() {
        let record = result?;
        let ticker = normalize_ticker(record.get(idx).unwrap_or(""));
        if !ticker.is_empty() && !tickers.contains(&ticker) {
            tickers.push(ticker);
        }
    }
    Ok(tickers)
}
