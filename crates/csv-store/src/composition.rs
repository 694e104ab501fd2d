use std::path::Path;

use chrono::NaiveDate;
use perf_core::WeightRecord;

use crate::error::ensure_exists;
use crate::StoreError;

pub const COL_PORTFOLIO: &str = "Portefeuille";
pub const COL_TICKER: &str = "Ticker";
pub const COL_WEIGHT: &str = "Pondération";
pub const COL_DATE: &str = "Date de mise à jour";

// Two-digit years first: "%Y" would also accept "24" as year 24.
const DATE_FORMATS: [&str; 6] = [
    "%d/%m/%y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y-%m-%d",
    "%Y/%m/%d",
];

/// A composition row that was read but not turned into a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompositionLoad {
    pub records: Vec<WeightRecord>,
    pub rejected: Vec<RejectedRow>,
}

pub fn load_composition(path: &Path) -> Result<CompositionLoad, StoreError> {
    ensure_exists(path)?;
    let text = std::fs::read_to_string(path)?;
    let load = parse_composition(&text, &path.display().to_string())?;
    tracing::info!(
        "Loaded {} composition rows from {} ({} rejected)",
        load.records.len(),
        path.display(),
        load.rejected.len()
    );
    Ok(load)
}

/// Parse composition CSV text. `source` names the input in error messages.
pub fn parse_composition(text: &str, source: &str) -> Result<CompositionLoad, StoreError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let delimiter = sniff_delimiter(text.lines().next().unwrap_or(""));

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| StoreError::MissingColumn {
                file: source.to_string(),
                column: name.to_string(),
            })
    };
    let portfolio_idx = column(COL_PORTFOLIO)?;
    let ticker_idx = column(COL_TICKER)?;
    let weight_idx = column(COL_WEIGHT)?;
    let date_idx = column(COL_DATE)?;

    let mut load = CompositionLoad::default();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let portfolio = field(portfolio_idx);
        let ticker = field(ticker_idx);
        if portfolio.is_empty() || ticker.is_empty() {
            load.rejected.push(RejectedRow {
                line,
                reason: "empty portfolio or ticker".to_string(),
            });
            continue;
        }

        load.records.push(WeightRecord::new(
            portfolio,
            ticker,
            parse_weight(field(weight_idx)),
            parse_day_first_date(field(date_idx)),
        ));
    }

    for rejected in &load.rejected {
        tracing::warn!("{} line {}: {}", source, rejected.line, rejected.reason);
    }
    Ok(load)
}

/// Pick the delimiter that occurs most often in the header line; ties prefer
/// `;`, then tab, then `,`.
pub fn sniff_delimiter(header: &str) -> u8 {
    let mut best = b',';
    let mut best_count = 0;
    for candidate in [b';', b'\t', b','] {
        let count = header.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

/// Percent text ("12,5 %", "7.5") to a fraction. Unparsable → 0.
pub fn parse_weight(raw: &str) -> f64 {
    let cleaned = raw.replace('%', "").replace(',', ".");
    match cleaned.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v / 100.0,
        _ => 0.0,
    }
}

/// Day-first date ("05/03/2024" is March 5th), ISO also accepted. A trailing
/// time part is ignored.
pub fn parse_day_first_date(raw: &str) -> Option<NaiveDate> {
    let token = raw.split_whitespace().next()?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
}
