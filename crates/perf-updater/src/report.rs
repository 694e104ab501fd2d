use std::path::PathBuf;

use perf_core::{SkipReason, SkippedPortfolio, UnavailableTicker};

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenTable {
    pub portfolio: String,
    pub path: PathBuf,
    pub rows: usize,
    pub patched: bool,
}

/// What one `performance` run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub written: Vec<WrittenTable>,
    pub skipped: Vec<SkippedPortfolio>,
    pub unavailable_tickers: Vec<UnavailableTicker>,
}

impl RunReport {
    pub fn skip(&mut self, portfolio: &str, reason: SkipReason) {
        self.skipped.push(SkippedPortfolio {
            portfolio: portfolio.to_string(),
            reason,
        });
    }

    pub fn log(&self) {
        for table in &self.written {
            tracing::info!(
                "  {} -> {} ({} rows{})",
                table.portfolio,
                table.path.display(),
                table.rows,
                if table.patched { ", patched" } else { "" }
            );
        }
        for skipped in &self.skipped {
            tracing::warn!("  {} skipped: {}", skipped.portfolio, skipped.reason);
        }
        for ticker in &self.unavailable_tickers {
            tracing::warn!("  {} unavailable: {}", ticker.ticker, ticker.reason);
        }
        tracing::info!(
            "Done! {} table(s) written, {} portfolio(s) skipped",
            self.written.len(),
            self.skipped.len()
        );
    }
}
