//! Tabular file reading: one DataFrame per sheet.
//!
//! A flat `.csv` yields exactly one sheet named `Sheet1`; `.xlsx`/`.xls`
//! workbooks yield every worksheet in file order. Column headers come back
//! already cleaned (trimmed, spaces replaced with underscores), so both the
//! Schema Builder and the Relational Store see identical names.

use crate::error::{IngestError, Result};
use crate::identifier::clean_column_name;
use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{NaiveDateTime, NaiveTime};
use polars::prelude::*;
use std::path::Path;

/// Default sheet name for flat files, which have no sheet concept.
pub const FLAT_SHEET_NAME: &str = "Sheet1";

/// Read a tabular file into `(sheet_name, DataFrame)` pairs.
///
/// Unsupported extensions are rejected; unreadable or corrupt bytes surface
/// as the underlying reader's error.
pub fn read_sheets(path: &Path) -> Result<Vec<(String, DataFrame)>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" => {
            let df = read_csv(path)?;
            Ok(vec![(FLAT_SHEET_NAME.to_string(), df)])
        }
        "xlsx" | "xls" => read_workbook(path),
        other => Err(IngestError::SchemaGeneration(format!(
            "Unsupported file type: '.{}'",
            other
        ))),
    }
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    let df = LazyCsvReader::new(path)
        .with_try_parse_dates(true)
        .with_infer_schema_length(Some(1000))
        .finish()
        .map_err(|e| IngestError::Polars(format!("Failed to read CSV: {}", e)))?
        .collect()
        .map_err(|e| IngestError::Polars(format!("Failed to collect CSV: {}", e)))?;
    clean_headers(df)
}

fn read_workbook(path: &Path) -> Result<Vec<(String, DataFrame)>> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        IngestError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to open workbook {}: {}", path.display(), e),
        ))
    })?;

    let sheet_names = workbook.sheet_names().to_owned();
    let mut sheets = Vec::with_capacity(sheet_names.len());
    for name in sheet_names {
        let range = workbook.worksheet_range(&name).map_err(|e| {
            IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to read sheet '{}': {}", name, e),
            ))
        })?;
        let df = sheet_to_dataframe(&range)?;
        sheets.push((name, df));
    }
    Ok(sheets)
}

fn clean_headers(mut df: DataFrame) -> Result<DataFrame> {
    let cleaned: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| clean_column_name(n))
        .collect();
    df.set_column_names(&cleaned)?;
    Ok(df)
}

/// The storage kind a worksheet column resolves to once every cell has been
/// seen. Mirrors the dtypes a dataframe reader would assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    DateTime,
    Duration,
    Text,
}

/// Convert one worksheet cell grid into a typed DataFrame.
///
/// The first row is the header; each remaining column is scanned to pick a
/// dominant kind, then materialized as a typed Series. Cells that do not fit
/// the chosen kind become nulls rather than failing the sheet.
pub fn sheet_to_dataframe(range: &Range<Data>) -> Result<DataFrame> {
    let rows: Vec<&[Data]> = range.rows().collect();
    if rows.is_empty() {
        return Ok(DataFrame::default());
    }

    let headers: Vec<String> = rows[0]
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let raw = match cell {
                Data::Empty => format!("column_{}", idx),
                other => cell_to_string(other).unwrap_or_else(|| format!("column_{}", idx)),
            };
            clean_column_name(&raw)
        })
        .collect();

    let data_rows = &rows[1..];
    let mut columns = Vec::with_capacity(headers.len());
    for (col_idx, header) in headers.iter().enumerate() {
        let kind = classify_column(data_rows, col_idx);
        columns.push(build_series(header, data_rows, col_idx, kind));
    }

    DataFrame::new(columns).map_err(|e| IngestError::Polars(e.to_string()))
}

fn classify_column(rows: &[&[Data]], col_idx: usize) -> ColumnKind {
    let mut has_text = false;
    let mut has_bool = false;
    let mut has_num = false;
    let mut has_frac = false;
    let mut has_datetime = false;
    let mut has_duration = false;

    for row in rows {
        match row.get(col_idx) {
            Some(Data::Empty) | Some(Data::Error(_)) | None => {}
            Some(Data::String(_)) | Some(Data::DateTimeIso(_)) | Some(Data::DurationIso(_)) => {
                has_text = true
            }
            Some(Data::Bool(_)) => has_bool = true,
            Some(Data::Int(_)) => has_num = true,
            Some(Data::Float(f)) => {
                has_num = true;
                if f.fract() != 0.0 {
                    has_frac = true;
                }
            }
            Some(Data::DateTime(dt)) => {
                if dt.is_duration() {
                    has_duration = true;
                } else {
                    has_datetime = true;
                }
            }
        }
    }

    if has_text {
        ColumnKind::Text
    } else if has_datetime || has_duration {
        if has_num || has_bool {
            ColumnKind::Text
        } else if has_duration && !has_datetime {
            ColumnKind::Duration
        } else {
            ColumnKind::DateTime
        }
    } else if has_bool {
        if has_num {
            ColumnKind::Text
        } else {
            ColumnKind::Bool
        }
    } else if has_num {
        if has_frac {
            ColumnKind::Float
        } else {
            ColumnKind::Int
        }
    } else {
        ColumnKind::Text
    }
}

fn build_series(name: &str, rows: &[&[Data]], col_idx: usize, kind: ColumnKind) -> Series {
    match kind {
        ColumnKind::Int => {
            let values: Vec<Option<i64>> = rows
                .iter()
                .map(|row| match row.get(col_idx) {
                    Some(Data::Int(i)) => Some(*i),
                    Some(Data::Float(f)) => Some(*f as i64),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Float => {
            let values: Vec<Option<f64>> = rows
                .iter()
                .map(|row| match row.get(col_idx) {
                    Some(Data::Int(i)) => Some(*i as f64),
                    Some(Data::Float(f)) => Some(*f),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Bool => {
            let values: Vec<Option<bool>> = rows
                .iter()
                .map(|row| match row.get(col_idx) {
                    Some(Data::Bool(b)) => Some(*b),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        ColumnKind::DateTime => {
            let values: Vec<Option<NaiveDateTime>> = rows
                .iter()
                .map(|row| match row.get(col_idx) {
                    Some(Data::DateTime(dt)) => dt.as_datetime(),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Duration => {
            let values: Vec<Option<NaiveTime>> = rows
                .iter()
                .map(|row| match row.get(col_idx) {
                    Some(Data::DateTime(dt)) => dt.as_duration().and_then(|d| {
                        let secs = d.num_seconds().rem_euclid(86_400);
                        NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, 0)
                    }),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Text => {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|row| row.get(col_idx).and_then(cell_to_string))
                .collect();
            Series::new(name, values)
        }
    }
}

fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.to_string())
            .or_else(|| Some(dt.as_f64().to_string())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_from_grid(grid: Vec<Vec<Data>>) -> Range<Data> {
        let rows = grid.len() as u32;
        let cols = grid.iter().map(|r| r.len()).max().unwrap_or(0) as u32;
        let mut range = Range::new((0, 0), (rows - 1, cols - 1));
        for (r, row) in grid.into_iter().enumerate() {
            for (c, cell) in row.into_iter().enumerate() {
                range.set_value((r as u32, c as u32), cell);
            }
        }
        range
    }

    #[test]
    fn test_sheet_with_mixed_columns() {
        let range = range_from_grid(vec![
            vec![
                Data::String("id".into()),
                Data::String(" unit price ".into()),
                Data::String("name".into()),
            ],
            vec![
                Data::Float(1.0),
                Data::Float(9.5),
                Data::String("widget".into()),
            ],
            vec![
                Data::Float(2.0),
                Data::Float(3.25),
                Data::String("gadget".into()),
            ],
        ]);

        let df = sheet_to_dataframe(&range).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.get_column_names(), &["id", "unit_price", "name"]);
        // Whole-number floats collapse to an integer column.
        assert_eq!(df.column("id").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("unit_price").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("name").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_empty_cells_become_nulls() {
        let range = range_from_grid(vec![
            vec![Data::String("v".into())],
            vec![Data::Float(1.0)],
            vec![Data::Empty],
            vec![Data::Float(3.0)],
        ]);

        let df = sheet_to_dataframe(&range).unwrap();
        assert_eq!(df.column("v").unwrap().null_count(), 1);
    }

    #[test]
    fn test_bool_column() {
        let range = range_from_grid(vec![
            vec![Data::String("active".into())],
            vec![Data::Bool(true)],
            vec![Data::Bool(false)],
        ]);

        let df = sheet_to_dataframe(&range).unwrap();
        assert_eq!(df.column("active").unwrap().dtype(), &DataType::Boolean);
    }

    #[test]
    fn test_mixed_kinds_fall_back_to_text() {
        let range = range_from_grid(vec![
            vec![Data::String("v".into())],
            vec![Data::Float(1.0)],
            vec![Data::String("two".into())],
        ]);

        let df = sheet_to_dataframe(&range).unwrap();
        let col = df.column("v").unwrap();
        assert_eq!(col.dtype(), &DataType::String);
        assert_eq!(col.null_count(), 0);
    }

    #[test]
    fn test_missing_header_gets_positional_name() {
        let range = range_from_grid(vec![
            vec![Data::String("a".into()), Data::Empty],
            vec![Data::Float(1.0), Data::Float(2.0)],
        ]);

        let df = sheet_to_dataframe(&range).unwrap();
        assert_eq!(df.get_column_names(), &["a", "column_1"]);
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let err = read_sheets(Path::new("notes.txt")).unwrap_err();
        match err {
            IngestError::SchemaGeneration(msg) => assert!(msg.contains(".txt")),
            other => panic!("expected SchemaGeneration, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_csv_is_a_read_error() {
        let err = read_sheets(Path::new("does_not_exist_9f8e.csv")).unwrap_err();
        assert!(matches!(err, IngestError::Polars(_)));
    }
}
