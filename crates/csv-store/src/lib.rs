//! Flat-file persistence: composition input, daily price history, portfolio
//! registry and per-portfolio performance tables.

pub mod atomic;
pub mod composition;
pub mod error;
pub mod performance;
pub mod prices;
pub mod registry;
pub mod tickers;

pub use atomic::write_atomic;
pub use composition::{load_composition, parse_composition, CompositionLoad, RejectedRow};
pub use error::StoreError;
pub use performance::{read_performance_table, write_performance_table, PERFORMANCE_HEADER};
pub use prices::{append_price_rows, load_price_panel, AppendSummary, CsvPriceSource, PriceFile, PriceRow};
pub use registry::{load_registry, slugify_portfolio_name, PortfolioEntry};
pub use tickers::load_ticker_list;
