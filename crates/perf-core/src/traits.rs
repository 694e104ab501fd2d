use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{PerfError, TickerFetch};

/// Supplier of daily closing prices.
///
/// Implementations return one `TickerFetch` per requested ticker. A ticker the
/// source cannot serve is reported as `TickerFetch::Unavailable`; `Err` is
/// reserved for failures of the source as a whole.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_closes(
        &self,
        tickers: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TickerFetch>, PerfError>;

    fn name(&self) -> &str;
}
