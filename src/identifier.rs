//! Identifier sanitation: turning arbitrary filenames, column headers and
//! sheet names into SQL-safe identifiers.
//!
//! `derive_table_name` is the only collision-aware function; everything else
//! is a pure string cleanup.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

lazy_static! {
    /// Runs of characters that cannot appear in an identifier.
    static ref INVALID_RUN: Regex = Regex::new(r"[^a-zA-Z0-9_]+").unwrap();
    /// Collapsed underscore runs.
    static ref UNDERSCORE_RUN: Regex = Regex::new(r"_+").unwrap();
    /// A safe physical table name.
    static ref SAFE_IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Derive a SQL-safe, collision-free table name from an uploaded filename.
///
/// The file stem is lowercased with invalid-character runs collapsed to a
/// single underscore and leading/trailing underscores trimmed. A `t_` prefix
/// is added when the result starts with a digit, and `table` is the fallback
/// when nothing survives. Collisions against `existing_names` get `_1`, `_2`,
/// ... suffixes until unique; the comparison is case-insensitive because
/// SQLite table names are.
pub fn derive_table_name(filename: &str, existing_names: &[String]) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);

    let cleaned = INVALID_RUN.replace_all(stem, "_");
    let cleaned = UNDERSCORE_RUN.replace_all(&cleaned, "_");
    let mut table_name = cleaned.trim_matches('_').to_lowercase();

    if table_name.starts_with(|c: char| c.is_ascii_digit()) {
        table_name = format!("t_{}", table_name);
    }
    if table_name.is_empty() {
        table_name = "table".to_string();
    }

    let base = table_name.clone();
    let mut counter = 1usize;
    while existing_names
        .iter()
        .any(|n| n.eq_ignore_ascii_case(&table_name))
    {
        table_name = format!("{}_{}", base, counter);
        counter += 1;
    }
    table_name
}

/// Clean a column header: trim surrounding whitespace, spaces become
/// underscores. Case is preserved.
pub fn clean_column_name(name: &str) -> String {
    name.trim().replace(' ', "_")
}

/// Clean a sheet name for use as a physical-table suffix: case is preserved,
/// runs of invalid characters collapse to a single underscore.
pub fn clean_sheet_suffix(name: &str) -> String {
    let cleaned = INVALID_RUN.replace_all(name, "_");
    let cleaned = UNDERSCORE_RUN.replace_all(&cleaned, "_");
    cleaned.trim_matches('_').to_string()
}

/// Whether `name` is safe to interpolate into DDL as a table name.
pub fn is_safe_identifier(name: &str) -> bool {
    SAFE_IDENTIFIER.is_match(name)
}
