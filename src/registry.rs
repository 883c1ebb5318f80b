//! Registry & Lifecycle Manager
//!
//! Durable index of every ingested file: raw bytes under `uploads/`, one
//! schema record and one metadata record per file (written temp-then-rename),
//! physical tables in the relational store, and an in-memory index rebuilt
//! from durable storage at startup.
//!
//! The index is an explicitly owned, mutex-guarded value injected into
//! request handlers; every mutating operation holds the lock for its full
//! duration, so concurrent uploads cannot race on the file ceiling or on
//! table-name collision detection.

use crate::config::StoreConfig;
use crate::error::{IngestError, Result};
use crate::hashing::compute_file_hash;
use crate::identifier::derive_table_name;
use crate::schema::{generate_schema, is_usable, Schema};
use crate::store::{RebuildItem, RebuildReport, RelationalStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Extensions accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];

/// Durable metadata record, one per ingested file. Field names are a wire
/// contract shared with the companion query-execution process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub original_filename: String,
    pub file_id: String,
    pub table_name: String,
    pub file_hash: String,
    pub uploaded_at: String,
}

/// In-memory index entry: the durable records plus where the raw bytes live.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    #[serde(flatten)]
    pub metadata: FileMetadata,
    pub file_path: PathBuf,
    pub schema: Schema,
}

/// What a successful upload hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub file_id: String,
    pub original_filename: String,
    pub table_name: String,
    pub schema: Schema,
    pub row_count: usize,
    pub column_count: usize,
    pub total_files: usize,
    pub max_files: usize,
}

/// Consistent snapshot of the registry for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub has_files: bool,
    pub files: Vec<FileEntry>,
    pub total_files: usize,
    pub max_files: usize,
}

pub struct FileRegistry {
    config: StoreConfig,
    store: RelationalStore,
    index: Mutex<HashMap<String, FileEntry>>,
}

impl FileRegistry {
    /// Open the registry: ensure the directory layout, open the store, then
    /// reconcile against durable storage and rebuild the physical tables.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.ensure_dirs()?;
        let store = RelationalStore::open(&config.db_path)?;
        let registry = Self {
            config,
            store,
            index: Mutex::new(HashMap::new()),
        };
        registry.reconcile_on_startup()?;
        Ok(registry)
    }

    /// Scan `uploads/` and rebuild the in-memory index purely from durable
    /// metadata and schema records, then rebuild the store to match.
    ///
    /// Files without a metadata record, or with corrupt/partial JSON, are
    /// treated as "being written" and skipped with a warning. A missing or
    /// corrupt schema record is regenerated from the raw bytes.
    fn reconcile_on_startup(&self) -> Result<()> {
        info!("Checking for uploaded files on startup...");

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.config.upload_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut index = self.index.lock().unwrap();
        for file_path in paths {
            let file_id = match file_path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };

            let metadata_path = self.metadata_path(&file_id);
            if !metadata_path.exists() {
                warn!(
                    "No metadata record for {}, skipping",
                    file_path.display()
                );
                continue;
            }

            let metadata: FileMetadata = match read_json(&metadata_path) {
                Ok(m) => m,
                Err(e) => {
                    let corrupt = IngestError::CorruptMetadata(file_id.clone(), e.to_string());
                    warn!("{} — treating as in-progress and skipping", corrupt);
                    continue;
                }
            };

            let schema = match self.load_or_regenerate_schema(&file_id, &file_path) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Skipping {}: {}", file_id, e);
                    continue;
                }
            };

            info!(
                "Recovered file: {} (table: {})",
                metadata.original_filename, metadata.table_name
            );
            index.insert(
                file_id,
                FileEntry {
                    metadata,
                    file_path,
                    schema,
                },
            );
        }

        info!("Startup completed with {} file(s) in registry", index.len());

        let items: Vec<RebuildItem> = index
            .values()
            .map(|entry| RebuildItem {
                file_id: entry.metadata.file_id.clone(),
                file_path: entry.file_path.clone(),
                table_name: entry.metadata.table_name.clone(),
            })
            .collect();
        drop(index);

        if !items.is_empty() {
            let report = self.store.rebuild(&items)?;
            info!(
                "Store rebuild complete: {}/{} file(s) loaded",
                report.loaded, report.attempted
            );
        }
        Ok(())
    }

    fn load_or_regenerate_schema(&self, file_id: &str, file_path: &Path) -> Result<Schema> {
        let schema_path = self.schema_path(file_id);
        if schema_path.exists() {
            match read_json::<Schema>(&schema_path) {
                Ok(schema) => return Ok(schema),
                Err(e) => warn!(
                    "Corrupt schema record for {} ({}); regenerating",
                    file_id, e
                ),
            }
        } else {
            info!("No schema record for {}; regenerating", file_id);
        }

        let schema = generate_schema(file_path)?;
        write_json_atomic(&schema_path, &schema)?;
        Ok(schema)
    }

    /// Ingest one uploaded file end to end.
    ///
    /// Validates the ceiling and extension, persists the raw bytes, rejects
    /// duplicate content, derives a table name, generates and persists the
    /// schema and metadata records, and loads the physical tables. Any
    /// failure past the raw write rolls back every artifact this call
    /// created.
    pub fn upload(&self, original_filename: &str, bytes: &[u8]) -> Result<UploadReceipt> {
        info!("Upload request received for file: {}", original_filename);
        let mut index = self.index.lock().unwrap();

        if index.len() >= self.config.max_files {
            return Err(IngestError::Validation(format!(
                "Maximum {} files allowed. Please delete some files first.",
                self.config.max_files
            )));
        }

        let ext = Path::new(original_filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(IngestError::Validation(format!(
                "Invalid file type '.{}'. Allowed types: .xlsx, .xls, .csv",
                ext
            )));
        }

        let file_id = Uuid::new_v4().to_string();
        let file_path = self.config.upload_dir.join(format!("{}.{}", file_id, ext));
        std::fs::write(&file_path, bytes)?;

        let file_hash = compute_file_hash(bytes);
        if let Some(existing) = check_duplicate_in(&index, &file_hash) {
            remove_if_exists(&file_path);
            return Err(IngestError::DuplicateContent(existing));
        }

        // A new base name must not clash with any physical table either, so
        // a flat `data_Sales.csv` cannot shadow sheet `Sales` of workbook
        // `data`.
        let mut existing_names: Vec<String> = Vec::new();
        for entry in index.values() {
            existing_names.push(entry.metadata.table_name.clone());
            existing_names.extend(self.physical_tables_for(entry));
        }
        let table_name = derive_table_name(original_filename, &existing_names);

        let schema = match generate_schema(&file_path) {
            Ok(schema) => schema,
            Err(e) => {
                remove_if_exists(&file_path);
                return Err(match e {
                    IngestError::SchemaGeneration(msg) => IngestError::SchemaGeneration(msg),
                    other => IngestError::SchemaGeneration(other.to_string()),
                });
            }
        };
        if !is_usable(&schema) {
            remove_if_exists(&file_path);
            return Err(IngestError::SchemaGeneration(format!(
                "File '{}' contains no usable columns",
                original_filename
            )));
        }

        let metadata = FileMetadata {
            original_filename: original_filename.to_string(),
            file_id: file_id.clone(),
            table_name: table_name.clone(),
            file_hash,
            uploaded_at: Utc::now().to_rfc3339(),
        };

        let schema_path = self.schema_path(&file_id);
        let metadata_path = self.metadata_path(&file_id);
        if let Err(e) = write_json_atomic(&schema_path, &schema)
            .and_then(|_| write_json_atomic(&metadata_path, &metadata))
        {
            remove_if_exists(&file_path);
            remove_if_exists(&schema_path);
            remove_if_exists(&metadata_path);
            return Err(e);
        }

        let (row_count, column_count) = match self.store.load(&file_path, &table_name) {
            Ok(counts) => counts,
            Err(e) => {
                remove_if_exists(&file_path);
                remove_if_exists(&schema_path);
                remove_if_exists(&metadata_path);
                return Err(match e {
                    IngestError::StoreLoad(msg) => IngestError::StoreLoad(msg),
                    other => IngestError::StoreLoad(other.to_string()),
                });
            }
        };

        index.insert(
            file_id.clone(),
            FileEntry {
                metadata,
                file_path,
                schema: schema.clone(),
            },
        );
        info!(
            "Registered '{}' as table '{}' ({}/{} files)",
            original_filename,
            table_name,
            index.len(),
            self.config.max_files
        );

        Ok(UploadReceipt {
            file_id,
            original_filename: original_filename.to_string(),
            table_name,
            schema,
            row_count,
            column_count,
            total_files: index.len(),
            max_files: self.config.max_files,
        })
    }

    /// Return the filename of the first registered file with the same
    /// content hash, if any.
    pub fn check_duplicate(&self, file_hash: &str) -> Option<String> {
        let index = self.index.lock().unwrap();
        check_duplicate_in(&index, file_hash)
    }

    /// Consistent snapshot of every registered file, oldest first.
    pub fn status(&self) -> RegistrySnapshot {
        let index = self.index.lock().unwrap();
        let mut files: Vec<FileEntry> = index.values().cloned().collect();
        files.sort_by(|a, b| {
            (&a.metadata.uploaded_at, &a.metadata.file_id)
                .cmp(&(&b.metadata.uploaded_at, &b.metadata.file_id))
        });
        RegistrySnapshot {
            has_files: !files.is_empty(),
            total_files: files.len(),
            max_files: self.config.max_files,
            files,
        }
    }

    /// Aggregate schema digest across every registered file, for the
    /// SQL-generation collaborator.
    pub fn aggregate_summary(&self) -> String {
        let snapshot = self.status();
        if !snapshot.has_files {
            return "No files uploaded.".to_string();
        }

        let mut sections = Vec::with_capacity(snapshot.files.len());
        for entry in &snapshot.files {
            sections.push(format!(
                "Table name: {} (uploaded as '{}')\n{}",
                entry.metadata.table_name,
                entry.metadata.original_filename,
                entry.schema.summary_text()
            ));
        }
        sections.join("\n")
    }

    /// Delete one file: physical tables, raw bytes, schema and metadata
    /// records, and the index entry. Unknown ids are a `NotFound` error;
    /// already-missing artifacts are not.
    pub fn delete(&self, file_id: &str) -> Result<String> {
        let mut index = self.index.lock().unwrap();
        self.delete_locked(&mut index, file_id)
    }

    /// Delete every registered file, best-effort per item. Returns the
    /// number successfully deleted.
    pub fn delete_all(&self) -> usize {
        let mut index = self.index.lock().unwrap();
        let ids: Vec<String> = index.keys().cloned().collect();
        let mut deleted = 0;
        for file_id in ids {
            match self.delete_locked(&mut index, &file_id) {
                Ok(_) => deleted += 1,
                Err(e) => error!("Failed to delete {}: {}", file_id, e),
            }
        }
        info!("Deleted {} file(s)", deleted);
        deleted
    }

    fn delete_locked(
        &self,
        index: &mut HashMap<String, FileEntry>,
        file_id: &str,
    ) -> Result<String> {
        let entry = index
            .get(file_id)
            .cloned()
            .ok_or_else(|| IngestError::NotFound(file_id.to_string()))?;

        // Store cleanup failures are logged, never fatal; artifact cleanup
        // proceeds regardless.
        for table in self.physical_tables_for(&entry) {
            match self.store.drop_table(&table) {
                Ok(true) => debug!("Dropped table '{}'", table),
                Ok(false) => warn!("Table '{}' was already absent", table),
                Err(e) => error!("Failed to drop table '{}': {}", table, e),
            }
        }

        remove_if_exists(&entry.file_path);
        remove_if_exists(&self.schema_path(file_id));
        remove_if_exists(&self.metadata_path(file_id));
        index.remove(file_id);

        info!(
            "Deleted file '{}' (id: {})",
            entry.metadata.original_filename, file_id
        );
        Ok(entry.metadata.original_filename)
    }

    /// Rebuild the physical store from the current index; explicit operator
    /// action, mirrors what startup does.
    pub fn rebuild_store(&self) -> Result<RebuildReport> {
        let index = self.index.lock().unwrap();
        let items: Vec<RebuildItem> = index
            .values()
            .map(|entry| RebuildItem {
                file_id: entry.metadata.file_id.clone(),
                file_path: entry.file_path.clone(),
                table_name: entry.metadata.table_name.clone(),
            })
            .collect();
        self.store.rebuild(&items)
    }

    /// Physical table names in the relational store, sorted.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.store.list_tables()
    }

    fn physical_tables_for(&self, entry: &FileEntry) -> Vec<String> {
        let sheet_names: Vec<String> =
            entry.schema.tables.iter().map(|t| t.name.clone()).collect();
        RelationalStore::physical_table_names(&entry.metadata.table_name, &sheet_names)
    }

    fn schema_path(&self, file_id: &str) -> PathBuf {
        self.config.schema_dir.join(format!("{}.json", file_id))
    }

    fn metadata_path(&self, file_id: &str) -> PathBuf {
        self.config.metadata_dir.join(format!("{}.json", file_id))
    }
}

fn check_duplicate_in(index: &HashMap<String, FileEntry>, file_hash: &str) -> Option<String> {
    index
        .values()
        .find(|entry| entry.metadata.file_hash == file_hash)
        .map(|entry| entry.metadata.original_filename.clone())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write a JSON record via a `.tmp` sibling and an atomic rename, so a
/// concurrent reader never observes a half-written record.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            error!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
