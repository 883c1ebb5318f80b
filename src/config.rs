//! Store configuration: where uploads, schemas, metadata and the SQLite
//! database live, plus the upload ceiling.
//!
//! The directory layout is a collaborator-visible contract: a companion
//! query-execution process reads the same `metadata/` and `schemas/` records.

use std::path::{Path, PathBuf};

/// Maximum number of registered files unless overridden.
pub const DEFAULT_MAX_FILES: usize = 10;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Raw uploaded bytes, one `<file_id>.<ext>` per ingested source.
    pub upload_dir: PathBuf,

    /// Serialized Schema documents, `<file_id>.json`.
    pub schema_dir: PathBuf,

    /// Per-file metadata records, `<file_id>.json`.
    pub metadata_dir: PathBuf,

    /// SQLite database backing the physical tables.
    pub db_path: PathBuf,

    /// Upload ceiling; exceeding it rejects the upload.
    pub max_files: usize,
}

impl StoreConfig {
    /// Standard layout rooted at `root`: `uploads/`, `schemas/`, `metadata/`,
    /// `database/sheetql.db`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            upload_dir: root.join("uploads"),
            schema_dir: root.join("schemas"),
            metadata_dir: root.join("metadata"),
            db_path: root.join("database").join("sheetql.db"),
            max_files: DEFAULT_MAX_FILES,
        }
    }

    /// Layout rooted at the current directory, with `SHEETQL_DATA_DIR` and
    /// `SHEETQL_MAX_FILES` environment overrides.
    pub fn from_env() -> Self {
        let root = std::env::var("SHEETQL_DATA_DIR").unwrap_or_else(|_| ".".to_string());
        let mut config = Self::new(root);
        if let Ok(raw) = std::env::var("SHEETQL_MAX_FILES") {
            if let Ok(n) = raw.parse::<usize>() {
                config.max_files = n;
            }
        }
        config
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Create every directory the layout needs.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.schema_dir)?;
        std::fs::create_dir_all(&self.metadata_dir)?;
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
