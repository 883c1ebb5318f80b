//! Type Inference Engine
//!
//! Maps a column's raw storage type (the polars dtype of the Series the
//! reader produced) to a semantic SQL type, and computes per-column
//! statistics: null counts, distinct counts, sample values and the
//! primary-key heuristic.

use crate::schema::ColumnSchema;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Semantic column type exposed to the SQL-generation collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Real,
    Boolean,
    Text,
    Datetime,
    Time,
}

impl ColumnType {
    /// Declared type used in the relational store's CREATE TABLE.
    pub fn sqlite_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text => "TEXT",
            ColumnType::Datetime => "DATETIME",
            ColumnType::Time => "TIME",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sqlite_type())
    }
}

/// Infer the semantic type of a column from its storage dtype.
///
/// Integer columns holding exactly two distinct non-null values that are a
/// subset of {0, 1} are reported as BOOLEAN flags.
pub fn infer_column_type(series: &Series) -> ColumnType {
    match series.dtype() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            if is_zero_one_flag(series) {
                ColumnType::Boolean
            } else {
                ColumnType::Integer
            }
        }
        DataType::Float32 | DataType::Float64 => ColumnType::Real,
        DataType::Boolean => ColumnType::Boolean,
        DataType::Date | DataType::Datetime(_, _) => ColumnType::Datetime,
        DataType::Time => ColumnType::Time,
        _ => ColumnType::Text,
    }
}

fn is_zero_one_flag(series: &Series) -> bool {
    let non_null = series.drop_nulls();
    let distinct = match non_null.n_unique() {
        Ok(n) => n,
        Err(_) => return false,
    };
    if distinct != 2 {
        return false;
    }
    matches!(
        (non_null.min::<f64>(), non_null.max::<f64>()),
        (Ok(Some(lo)), Ok(Some(hi))) if lo == 0.0 && hi == 1.0
    )
}

/// Analyze a single column: semantic type plus statistics.
pub fn analyze_column(name: &str, series: &Series) -> ColumnSchema {
    let column_type = infer_column_type(series);

    let total_count = series.len();
    let null_count = series.null_count();
    let null_percentage = if total_count > 0 {
        round2(null_count as f64 / total_count as f64 * 100.0)
    } else {
        0.0
    };

    let non_null = series.drop_nulls();
    let unique_count = non_null.n_unique().unwrap_or(0);
    let sample_values = collect_samples(&non_null, 3);

    // All values distinct, none missing: a primary-key candidate.
    let is_potential_primary_key =
        unique_count == total_count && null_count == 0 && total_count > 0;

    ColumnSchema {
        name: name.to_string(),
        column_type,
        nullable: null_count > 0,
        null_count,
        null_percentage,
        unique_count,
        total_count,
        sample_values,
        is_potential_primary_key,
    }
}

/// First `limit` non-null values, stringified. Values that cannot be read
/// are skipped rather than failing the column.
fn collect_samples(non_null: &Series, limit: usize) -> Vec<String> {
    let mut samples = Vec::new();
    for idx in 0..non_null.len().min(limit) {
        if let Ok(value) = non_null.get(idx) {
            samples.push(format_any_value(&value));
        }
    }
    samples
}

/// Render a cell value the way collaborators expect to see it: strings
/// unquoted, everything else via its display form.
pub(crate) fn format_any_value(value: &AnyValue) -> String {
    match value {
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        other => other.to_string(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_one_integers_are_boolean() {
        let s = Series::new("flag", &[0i64, 1, 0, 1]);
        assert_eq!(infer_column_type(&s), ColumnType::Boolean);
    }

    #[test]
    fn test_plain_integers() {
        let s = Series::new("id", &[1i64, 2, 3, 4]);
        assert_eq!(infer_column_type(&s), ColumnType::Integer);
    }

    #[test]
    fn test_constant_zero_is_not_boolean() {
        // Only one distinct value; the flag heuristic needs both 0 and 1.
        let s = Series::new("z", &[0i64, 0, 0]);
        assert_eq!(infer_column_type(&s), ColumnType::Integer);
    }

    #[test]
    fn test_floats_are_real() {
        let s = Series::new("amount", &[1.5f64, 2.0]);
        assert_eq!(infer_column_type(&s), ColumnType::Real);
    }

    #[test]
    fn test_bool_storage() {
        let s = Series::new("b", &[true, false]);
        assert_eq!(infer_column_type(&s), ColumnType::Boolean);
    }

    #[test]
    fn test_strings_are_text() {
        let s = Series::new("name", &["alice", "bob"]);
        assert_eq!(infer_column_type(&s), ColumnType::Text);
    }

    #[test]
    fn test_datetime_storage() {
        use chrono::NaiveDate;
        let ts = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let s = Series::new("ts", &[Some(ts), None]);
        assert_eq!(infer_column_type(&s), ColumnType::Datetime);
    }

    #[test]
    fn test_primary_key_candidate() {
        let s = Series::new("id", &[1i64, 2, 3, 4, 5]);
        let col = analyze_column("id", &s);
        assert_eq!(col.total_count, 5);
        assert_eq!(col.unique_count, 5);
        assert_eq!(col.null_count, 0);
        assert!(col.is_potential_primary_key);
        assert!(!col.nullable);
    }

    #[test]
    fn test_nulls_disqualify_primary_key() {
        let s = Series::new("id", &[Some(1i64), Some(2), None, Some(4)]);
        let col = analyze_column("id", &s);
        assert!(!col.is_potential_primary_key);
        assert!(col.nullable);
        assert_eq!(col.null_count, 1);
        assert_eq!(col.null_percentage, 25.0);
    }

    #[test]
    fn test_null_percentage_rounds_to_two_decimals() {
        let values: Vec<Option<i64>> = (0..3).map(|i| if i == 0 { None } else { Some(i) }).collect();
        let s = Series::new("v", &values);
        let col = analyze_column("v", &s);
        assert_eq!(col.null_percentage, 33.33);
    }

    #[test]
    fn test_samples_skip_nulls_and_cap_at_three() {
        let s = Series::new(
            "name",
            &[None, Some("a"), Some("b"), Some("c"), Some("d")],
        );
        let col = analyze_column("name", &s);
        assert_eq!(col.sample_values, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_column() {
        let s = Series::new("empty", &Vec::<Option<i64>>::new());
        let col = analyze_column("empty", &s);
        assert_eq!(col.total_count, 0);
        assert_eq!(col.null_percentage, 0.0);
        assert!(!col.is_potential_primary_key);
        assert!(col.sample_values.is_empty());
    }
}
