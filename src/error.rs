use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate content: identical bytes already uploaded as '{0}'")]
    DuplicateContent(String),

    #[error("Schema generation failed: {0}")]
    SchemaGeneration(String),

    #[error("Store load failed: {0}")]
    StoreLoad(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Corrupt metadata for '{0}': {1}")]
    CorruptMetadata(String, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for IngestError {
    fn from(e: polars::error::PolarsError) -> Self {
        IngestError::Polars(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
