//! Schema documents: the structured description of an ingested file that the
//! SQL-generation collaborators consume.
//!
//! A Schema is regenerated whenever a file is (re)ingested and never mutated
//! in place; the serialized field names are a stable contract.

use crate::error::{IngestError, Result};
use crate::inference::{analyze_column, ColumnType};
use crate::reader::read_sheets;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
    pub null_count: usize,
    pub null_percentage: f64,
    pub unique_count: usize,
    pub total_count: usize,
    pub sample_values: Vec<String>,
    pub is_potential_primary_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Sheet name, or `Sheet1` for flat files.
    pub name: String,
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSummary {
    pub total_tables: usize,
    pub total_rows: usize,
    pub total_columns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub file_name: String,
    /// Lowercased extension including the dot, e.g. `.csv`.
    pub file_type: String,
    pub tables: Vec<TableSchema>,
    pub summary: SchemaSummary,
}

impl Schema {
    /// Human-readable digest handed to the SQL-generation agent.
    pub fn summary_text(&self) -> String {
        let mut lines = vec![
            format!("File: {}", self.file_name),
            format!("Type: {}", self.file_type),
            format!("Tables: {}", self.summary.total_tables),
            format!("Total Rows: {}", self.summary.total_rows),
            format!("Total Columns: {}", self.summary.total_columns),
            String::new(),
        ];

        for table in &self.tables {
            lines.push(format!("Table: {}", table.name));
            lines.push(format!(
                "  Rows: {}, Columns: {}",
                table.row_count, table.column_count
            ));
            for col in &table.columns {
                let pk_marker = if col.is_potential_primary_key { " [PK]" } else { "" };
                let null_info = if col.null_count > 0 {
                    format!(" ({} nulls)", col.null_count)
                } else {
                    String::new()
                };
                lines.push(format!(
                    "  - {}: {}{}{}",
                    col.name, col.column_type, pk_marker, null_info
                ));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

/// Build the full Schema document for one uploaded file.
///
/// Reads every sheet, analyzes every column, and aggregates the summary.
/// Re-running on identical bytes produces a structurally identical Schema.
pub fn generate_schema(path: &Path) -> Result<Schema> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let file_type = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();

    let sheets = read_sheets(path)?;
    if sheets.is_empty() {
        return Err(IngestError::SchemaGeneration(format!(
            "No sheets found in {}",
            file_name
        )));
    }

    let mut tables = Vec::with_capacity(sheets.len());
    let mut total_rows = 0;
    let mut total_columns = 0;

    for (sheet_name, df) in &sheets {
        let columns: Vec<ColumnSchema> = df
            .get_columns()
            .iter()
            .map(|series| analyze_column(series.name(), series))
            .collect();

        total_rows += df.height();
        total_columns += df.width();
        tables.push(TableSchema {
            name: sheet_name.clone(),
            row_count: df.height(),
            column_count: df.width(),
            columns,
        });
    }

    let schema = Schema {
        file_name: file_name.clone(),
        file_type,
        summary: SchemaSummary {
            total_tables: tables.len(),
            total_rows,
            total_columns,
        },
        tables,
    };

    info!(
        "Schema generated for {}: {} table(s), {} row(s), {} column(s)",
        file_name, schema.summary.total_tables, total_rows, total_columns
    );
    Ok(schema)
}

/// Quick sanity check used after generation; a schema with no tables or no
/// columns anywhere means the file was effectively empty.
pub fn is_usable(schema: &Schema) -> bool {
    schema.summary.total_tables > 0 && schema.summary.total_columns > 0
}
