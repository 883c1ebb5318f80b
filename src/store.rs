//! Relational Store Manager
//!
//! Owns the SQLite database backing all ingested files: one physical table
//! per sheet. Loads use replace semantics inside a single transaction, so a
//! failed load never leaves a half-written table and a multi-sheet file is
//! loaded all-or-nothing.

use crate::error::{IngestError, Result};
use crate::identifier::{clean_sheet_suffix, is_safe_identifier};
use crate::inference::{format_any_value, infer_column_type};
use crate::reader::read_sheets;
use polars::prelude::*;
use rusqlite::{params_from_iter, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// One registry entry as the store needs to see it during a rebuild.
#[derive(Debug, Clone)]
pub struct RebuildItem {
    pub file_id: String,
    pub file_path: PathBuf,
    pub table_name: String,
}

/// Outcome of a full rebuild: how many files reloaded out of how many tried.
#[derive(Debug, Clone, Copy)]
pub struct RebuildReport {
    pub loaded: usize,
    pub attempted: usize,
}

pub struct RelationalStore {
    conn: Mutex<Connection>,
}

impl RelationalStore {
    /// Open (or create) the SQLite database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| IngestError::StoreLoad(format!("Failed to open database: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Physical table names for a file: the bare `table_name` when there is a
    /// single sheet, `table_name_<sheet>` per sheet otherwise.
    pub fn physical_table_names(table_name: &str, sheet_names: &[String]) -> Vec<String> {
        if sheet_names.len() <= 1 {
            vec![table_name.to_string()]
        } else {
            sheet_names
                .iter()
                .map(|sheet| format!("{}_{}", table_name, clean_sheet_suffix(sheet)))
                .collect()
        }
    }

    /// Load a tabular file into the store under `table_name`.
    pub fn load(&self, file_path: &Path, table_name: &str) -> Result<(usize, usize)> {
        info!(
            "Loading '{}' as table '{}'",
            file_path.display(),
            table_name
        );
        let sheets = read_sheets(file_path)
            .map_err(|e| IngestError::StoreLoad(format!("Failed to read file: {}", e)))?;
        self.load_sheets(&sheets, table_name)
    }

    /// Load pre-read `(sheet_name, DataFrame)` pairs under `table_name`.
    ///
    /// Every sheet is dropped-and-recreated inside one transaction; on any
    /// failure the transaction rolls back and prior tables stay intact.
    /// Returns the total `(row_count, column_count)` across sheets.
    pub fn load_sheets(
        &self,
        sheets: &[(String, DataFrame)],
        table_name: &str,
    ) -> Result<(usize, usize)> {
        if !is_safe_identifier(table_name) {
            return Err(IngestError::StoreLoad(format!(
                "Invalid table name: '{}'. Only alphanumeric and underscores allowed.",
                table_name
            )));
        }

        let sheet_names: Vec<String> = sheets.iter().map(|(name, _)| name.clone()).collect();
        let physical_names = Self::physical_table_names(table_name, &sheet_names);
        let mut seen = HashSet::new();
        for name in &physical_names {
            if !is_safe_identifier(name) {
                return Err(IngestError::StoreLoad(format!(
                    "Invalid physical table name: '{}'",
                    name
                )));
            }
            // SQLite table names are case-insensitive; two sheets whose
            // cleaned suffixes coincide would silently write over each other.
            if !seen.insert(name.to_lowercase()) {
                return Err(IngestError::StoreLoad(format!(
                    "Distinct sheets map to the same physical table '{}'",
                    name
                )));
            }
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| IngestError::StoreLoad(format!("Failed to begin transaction: {}", e)))?;

        let mut total_rows = 0;
        let mut total_columns = 0;
        for ((sheet_name, df), physical) in sheets.iter().zip(&physical_names) {
            write_table(&tx, physical, df)
                .map_err(|e| IngestError::StoreLoad(format!("Failed to write table '{}': {}", physical, e)))?;
            total_rows += df.height();
            total_columns += df.width();
            debug!(
                "Wrote sheet '{}' as '{}' ({} rows, {} columns)",
                sheet_name,
                physical,
                df.height(),
                df.width()
            );
        }

        tx.commit()
            .map_err(|e| IngestError::StoreLoad(format!("Failed to commit load: {}", e)))?;

        info!(
            "Loaded '{}': {} rows, {} columns across {} table(s)",
            table_name,
            total_rows,
            total_columns,
            physical_names.len()
        );
        Ok((total_rows, total_columns))
    }

    /// Drop one physical table. Returns false (not an error) when the table
    /// does not exist.
    pub fn drop_table(&self, table_name: &str) -> Result<bool> {
        if !is_safe_identifier(table_name) {
            return Err(IngestError::StoreLoad(format!(
                "Invalid table name: '{}'",
                table_name
            )));
        }

        let conn = self.conn.lock().unwrap();
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table_name],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)?;

        if !exists {
            warn!("Table '{}' does not exist in store", table_name);
            return Ok(false);
        }

        conn.execute(&format!("DROP TABLE IF EXISTS \"{}\"", table_name), [])?;
        info!("Dropped table '{}'", table_name);
        Ok(true)
    }

    /// All physical table names, sorted lexicographically.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Drop every physical table. Returns the number dropped.
    pub fn clear(&self) -> Result<usize> {
        let tables = self.list_tables()?;
        let conn = self.conn.lock().unwrap();
        for table in &tables {
            conn.execute(&format!("DROP TABLE IF EXISTS \"{}\"", table), [])?;
            debug!("Dropped table: {}", table);
        }
        info!("Cleared store: dropped {} table(s)", tables.len());
        Ok(tables.len())
    }

    /// Rebuild the entire store from a registry snapshot.
    ///
    /// Clears everything, then reloads each file. Per-file failures (missing
    /// file on disk, bad table name) are logged and skipped; one bad file
    /// never aborts the rebuild.
    pub fn rebuild(&self, items: &[RebuildItem]) -> Result<RebuildReport> {
        info!("Rebuilding store from {} file(s)", items.len());
        self.clear()?;

        let mut loaded = 0;
        for item in items {
            if item.table_name.is_empty() {
                warn!("Skipping file {}: missing table name", item.file_id);
                continue;
            }
            if !item.file_path.exists() {
                warn!(
                    "Skipping file {}: not found at {}",
                    item.file_id,
                    item.file_path.display()
                );
                continue;
            }
            match self.load(&item.file_path, &item.table_name) {
                Ok(_) => loaded += 1,
                Err(e) => {
                    error!("Failed to load file {} during rebuild: {}", item.file_id, e);
                }
            }
        }

        info!("Store rebuild complete: loaded {}/{} file(s)", loaded, items.len());
        Ok(RebuildReport {
            loaded,
            attempted: items.len(),
        })
    }
}

/// Drop-and-recreate one physical table from a DataFrame, inside the caller's
/// transaction.
fn write_table(tx: &rusqlite::Transaction<'_>, table_name: &str, df: &DataFrame) -> Result<()> {
    tx.execute(&format!("DROP TABLE IF EXISTS \"{}\"", table_name), [])?;

    let column_defs: Vec<String> = df
        .get_columns()
        .iter()
        .map(|series| {
            format!(
                "\"{}\" {}",
                series.name().replace('"', "\"\""),
                infer_column_type(series).sqlite_type()
            )
        })
        .collect();
    if column_defs.is_empty() {
        return Err(IngestError::StoreLoad(format!(
            "Sheet for table '{}' has no columns",
            table_name
        )));
    }

    tx.execute(
        &format!("CREATE TABLE \"{}\" ({})", table_name, column_defs.join(", ")),
        [],
    )?;

    let placeholders: Vec<&str> = std::iter::repeat("?").take(df.width()).collect();
    let insert_sql = format!(
        "INSERT INTO \"{}\" VALUES ({})",
        table_name,
        placeholders.join(", ")
    );
    let mut stmt = tx.prepare(&insert_sql)?;

    let columns = df.get_columns();
    for row_idx in 0..df.height() {
        let values: Vec<rusqlite::types::Value> = columns
            .iter()
            .map(|series| match series.get(row_idx) {
                Ok(value) => cell_to_sql(value),
                Err(_) => rusqlite::types::Value::Null,
            })
            .collect();
        stmt.execute(params_from_iter(values))?;
    }

    Ok(())
}

fn cell_to_sql(value: AnyValue) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        AnyValue::Null => Sql::Null,
        AnyValue::Boolean(b) => Sql::Integer(b as i64),
        AnyValue::Int8(v) => Sql::Integer(v as i64),
        AnyValue::Int16(v) => Sql::Integer(v as i64),
        AnyValue::Int32(v) => Sql::Integer(v as i64),
        AnyValue::Int64(v) => Sql::Integer(v),
        AnyValue::UInt8(v) => Sql::Integer(v as i64),
        AnyValue::UInt16(v) => Sql::Integer(v as i64),
        AnyValue::UInt32(v) => Sql::Integer(v as i64),
        AnyValue::UInt64(v) => Sql::Integer(v as i64),
        AnyValue::Float32(v) => Sql::Real(v as f64),
        AnyValue::Float64(v) => Sql::Real(v),
        AnyValue::String(s) => Sql::Text(s.to_string()),
        AnyValue::StringOwned(s) => Sql::Text(s.to_string()),
        other => Sql::Text(format_any_value(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    struct Fixture {
        dir: PathBuf,
        store: RelationalStore,
    }

    fn fixture() -> Fixture {
        let dir = std::env::temp_dir().join(format!("sheetql_store_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let store = RelationalStore::open(&dir.join("store.db")).unwrap();
        Fixture { dir, store }
    }

    fn write_csv(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_and_list() {
        let fx = fixture();
        let csv = write_csv(&fx.dir, "orders.csv", "id,amount\n1,10.5\n2,20.0\n");

        let (rows, cols) = fx.store.load(&csv, "orders").unwrap();
        assert_eq!((rows, cols), (2, 2));
        assert_eq!(fx.store.list_tables().unwrap(), vec!["orders"]);
    }

    #[test]
    fn test_load_replaces_existing_table() {
        let fx = fixture();
        let first = write_csv(&fx.dir, "v1.csv", "id\n1\n2\n3\n");
        let second = write_csv(&fx.dir, "v2.csv", "id\n9\n");

        fx.store.load(&first, "data").unwrap();
        let (rows, _) = fx.store.load(&second, "data").unwrap();
        assert_eq!(rows, 1);
        assert_eq!(fx.store.list_tables().unwrap(), vec!["data"]);
    }

    #[test]
    fn test_load_rejects_unsafe_identifier() {
        let fx = fixture();
        let csv = write_csv(&fx.dir, "x.csv", "id\n1\n");
        let err = fx.store.load(&csv, "bad name;").unwrap_err();
        assert!(matches!(err, IngestError::StoreLoad(_)));
        assert!(fx.store.list_tables().unwrap().is_empty());
    }

    #[test]
    fn test_failed_load_keeps_prior_table() {
        let fx = fixture();
        let good = write_csv(&fx.dir, "good.csv", "id\n1\n2\n");
        fx.store.load(&good, "data").unwrap();

        let missing = fx.dir.join("never_written.csv");
        assert!(fx.store.load(&missing, "data").is_err());
        assert_eq!(fx.store.list_tables().unwrap(), vec!["data"]);
    }

    #[test]
    fn test_drop_is_idempotent() {
        let fx = fixture();
        let csv = write_csv(&fx.dir, "t.csv", "id\n1\n");
        fx.store.load(&csv, "t").unwrap();

        assert!(fx.store.drop_table("t").unwrap());
        assert!(!fx.store.drop_table("t").unwrap());
        assert!(!fx.store.drop_table("never_existed").unwrap());
    }

    #[test]
    fn test_clear_drops_everything() {
        let fx = fixture();
        let a = write_csv(&fx.dir, "a.csv", "id\n1\n");
        let b = write_csv(&fx.dir, "b.csv", "id\n1\n");
        fx.store.load(&a, "a").unwrap();
        fx.store.load(&b, "b").unwrap();

        assert_eq!(fx.store.clear().unwrap(), 2);
        assert!(fx.store.list_tables().unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_skips_missing_files() {
        let fx = fixture();
        let a = write_csv(&fx.dir, "a.csv", "id\n1\n");

        let items = vec![
            RebuildItem {
                file_id: "one".into(),
                file_path: a,
                table_name: "a".into(),
            },
            RebuildItem {
                file_id: "two".into(),
                file_path: fx.dir.join("gone.csv"),
                table_name: "b".into(),
            },
            RebuildItem {
                file_id: "three".into(),
                file_path: fx.dir.join("a.csv"),
                table_name: String::new(),
            },
        ];

        let report = fx.store.rebuild(&items).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.attempted, 3);
        assert_eq!(fx.store.list_tables().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_multi_sheet_load_creates_suffixed_tables() {
        let fx = fixture();
        let sales = DataFrame::new(vec![Series::new("id", &[1i64, 2])]).unwrap();
        let returns = DataFrame::new(vec![Series::new("id", &[9i64])]).unwrap();
        let sheets = vec![("Sales".to_string(), sales), ("Returns".to_string(), returns)];

        let (rows, cols) = fx.store.load_sheets(&sheets, "data").unwrap();
        assert_eq!((rows, cols), (3, 2));
        assert_eq!(
            fx.store.list_tables().unwrap(),
            vec!["data_Returns", "data_Sales"]
        );

        let conn = fx.store.conn.lock().unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM data_Sales", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_multi_sheet_rollback_on_bad_sheet() {
        let fx = fixture();
        let csv = write_csv(&fx.dir, "prior.csv", "id\n1\n");
        fx.store.load(&csv, "prior").unwrap();

        // A sheet with no columns cannot be written; the whole load rolls
        // back, including the sheet that was already written.
        let good = DataFrame::new(vec![Series::new("id", &[1i64])]).unwrap();
        let sheets = vec![
            ("Sales".to_string(), good),
            ("Returns".to_string(), DataFrame::default()),
        ];

        let err = fx.store.load_sheets(&sheets, "data").unwrap_err();
        assert!(matches!(err, IngestError::StoreLoad(_)));
        assert_eq!(fx.store.list_tables().unwrap(), vec!["prior"]);
    }

    #[test]
    fn test_colliding_sheet_suffixes_rejected() {
        let fx = fixture();
        let a = DataFrame::new(vec![Series::new("id", &[1i64])]).unwrap();
        let b = DataFrame::new(vec![Series::new("id", &[2i64])]).unwrap();
        // Both suffixes clean to `A`, which would make the second sheet
        // overwrite the first.
        let sheets = vec![("A!".to_string(), a), ("A-".to_string(), b)];

        let err = fx.store.load_sheets(&sheets, "data").unwrap_err();
        assert!(matches!(err, IngestError::StoreLoad(_)));
        assert!(fx.store.list_tables().unwrap().is_empty());
    }

    #[test]
    fn test_sheet_suffixes_differing_only_in_case_rejected() {
        let fx = fixture();
        let a = DataFrame::new(vec![Series::new("id", &[1i64])]).unwrap();
        let b = DataFrame::new(vec![Series::new("id", &[2i64])]).unwrap();
        let sheets = vec![("Sales".to_string(), a), ("SALES".to_string(), b)];

        let err = fx.store.load_sheets(&sheets, "data").unwrap_err();
        assert!(matches!(err, IngestError::StoreLoad(_)));
        assert!(fx.store.list_tables().unwrap().is_empty());
    }

    #[test]
    fn test_physical_names_for_multi_sheet() {
        let sheets = vec!["Sales".to_string(), "Returns".to_string()];
        assert_eq!(
            RelationalStore::physical_table_names("data", &sheets),
            vec!["data_Sales", "data_Returns"]
        );

        let single = vec!["Sheet1".to_string()];
        assert_eq!(
            RelationalStore::physical_table_names("data", &single),
            vec!["data"]
        );
    }

    #[test]
    fn test_declared_types_follow_inference() {
        let fx = fixture();
        let csv = write_csv(&fx.dir, "typed.csv", "id,price,label\n1,9.5,a\n2,3.25,b\n");
        fx.store.load(&csv, "typed").unwrap();

        let conn = fx.store.conn.lock().unwrap();
        let ddl: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE name='typed'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(ddl.contains("\"id\" INTEGER"));
        assert!(ddl.contains("\"price\" REAL"));
        assert!(ddl.contains("\"label\" TEXT"));
    }

    #[test]
    fn test_row_values_survive_roundtrip() {
        let fx = fixture();
        let csv = write_csv(&fx.dir, "vals.csv", "id,name\n1,alice\n2,bob\n");
        fx.store.load(&csv, "vals").unwrap();

        let conn = fx.store.conn.lock().unwrap();
        let name: String = conn
            .query_row("SELECT name FROM vals WHERE id = 2", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "bob");
    }
}
