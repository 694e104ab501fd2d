use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("File not found: {0}")]
    MissingFile(PathBuf),

    #[error("{file}: required column '{column}' not found")]
    MissingColumn { file: String, column: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for perf_core::PerfError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingFile(_) | StoreError::MissingColumn { .. } => {
                perf_core::PerfError::Config(err.to_string())
            }
            other => perf_core::PerfError::InvalidData(other.to_string()),
        }
    }
}

pub(crate) fn ensure_exists(path: &std::path::Path) -> Result<(), StoreError> {
    if path.exists() {
        Ok(())
    } else {
        Err(StoreError::MissingFile(path.to_path_buf()))
    }
}
