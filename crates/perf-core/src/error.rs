use thiserror::Error;

#[derive(Error, Debug)]
pub enum PerfError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Ticker {ticker} required by portfolio {portfolio} is not in the price panel")]
    MissingTicker { portfolio: String, ticker: String },

    #[error("Benchmark {0} is not in the price panel")]
    MissingBenchmark(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error: {0}")]
    Api(String),
}
