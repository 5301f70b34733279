//! Error types for spreadsheet storage.

use thiserror::Error;

/// Errors that can occur reading or writing workbook files
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported file format version {0}")]
    UnsupportedVersion(u32),

    #[error("malformed workbook file: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
