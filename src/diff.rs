//! Builds and renders structured row/table diffs.
//!
//! Nearest teacher analogue is the filesystem-diff machinery in `runner.rs`
//! (`FilesystemDiff`/`compute_fs_diff`): compare a before/after snapshot and report only what
//! changed. Here the "snapshot" is a set of expected vs. actual rows instead of a file tree.

use crate::matcher::{ColumnMismatch, RowMatchError};
use crate::value::Value;
use indexmap::IndexMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Mismatch,
    Missing,
    Unexpected,
}

#[derive(Debug, Clone)]
pub struct RowDiff {
    pub key: Vec<(String, Value)>,
    pub diffs: Vec<ColumnMismatch>,
    pub status: RowStatus,
}

#[derive(Debug, Clone, Default)]
pub struct DiffError {
    pub table: String,
    pub primary_keys: Vec<String>,
    pub row_count_mismatch: Option<(usize, usize)>,
    pub row_diffs: Vec<RowDiff>,
}

impl DiffError {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_keys: Vec::new(),
            row_count_mismatch: None,
            row_diffs: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count_mismatch.is_none() && self.row_diffs.is_empty()
    }

    /// Builds a one-row diff out of a row comparison failure (e.g. a column named in the
    /// expected row is absent from the actual row), so a `RowMatchError` still renders as a
    /// readable diff instead of being reduced to a bare message.
    pub fn from_row_error(table: impl Into<String>, err: &RowMatchError) -> Self {
        let mut d = Self::new(table);
        d.row_diffs.push(RowDiff {
            key: Vec::new(),
            diffs: vec![ColumnMismatch {
                column: "<error>".to_string(),
                expected: Value::Null,
                actual: Value::String(err.to_string()),
            }],
            status: RowStatus::Mismatch,
        });
        d
    }

    /// Renders the diff as a unified, plain-text report matching spec §4.7: a header, a
    /// `+`/`-` legend, then per-row blocks sorted by primary-key tuple, columns sorted
    /// alphabetically.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Table: {}", self.table);
        let _ = writeln!(out, "- Expected");
        let _ = writeln!(out, "+ Actual");

        if let Some((expected, actual)) = self.row_count_mismatch {
            let _ = writeln!(out, "+ rows: {expected}");
            let _ = writeln!(out, "- rows: {actual}");
        }

        let mut rows = self.row_diffs.clone();
        rows.sort_by(|a, b| key_display(&a.key).cmp(&key_display(&b.key)));

        for row in &rows {
            let key_str = row
                .key
                .iter()
                .map(|(k, v)| format!("{k}={}", v.display()))
                .collect::<Vec<_>>()
                .join(", ");
            let status = match row.status {
                RowStatus::Mismatch => "mismatch",
                RowStatus::Missing => "missing",
                RowStatus::Unexpected => "unexpected",
            };
            let _ = writeln!(out, "{key_str} [{status}]");

            let mut diffs = row.diffs.clone();
            diffs.sort_by(|a, b| a.column.cmp(&b.column));

            match row.status {
                RowStatus::Missing => {
                    let fields: Vec<String> = diffs
                        .iter()
                        .map(|d| format!("{}: {}", d.column, d.expected.display()))
                        .collect();
                    let _ = writeln!(out, "+ {}", fields.join(", "));
                }
                RowStatus::Unexpected => {
                    let fields: Vec<String> = diffs
                        .iter()
                        .map(|d| format!("{}: {}", d.column, d.actual.display()))
                        .collect();
                    let _ = writeln!(out, "- {}", fields.join(", "));
                }
                RowStatus::Mismatch => {
                    let expected_fields: Vec<String> = diffs
                        .iter()
                        .map(|d| format!("{}: {}", d.column, d.expected.display()))
                        .collect();
                    let actual_fields: Vec<String> = diffs
                        .iter()
                        .map(|d| format!("{}: {}", d.column, d.actual.display()))
                        .collect();
                    let _ = writeln!(out, "+ {}", expected_fields.join(", "));
                    let _ = writeln!(out, "- {}", actual_fields.join(", "));
                }
            }
        }

        out
    }
}

fn key_display(key: &[(String, Value)]) -> String {
    key.iter().map(|(_, v)| v.display()).collect::<Vec<_>>().join("\u{0}")
}

/// Builds a `DiffError` from two ordered row sequences (used by the `all` expected-result
/// strategy, where row order matters). Fails if a row comparison itself fails (e.g. a column
/// named in the expected row is absent from the actual row) rather than treating it as a match.
pub fn diff_ordered_rows(
    table: &str,
    pks: &[String],
    expected: &[IndexMap<String, Value>],
    actual: &[IndexMap<String, Value>],
) -> Result<DiffError, RowMatchError> {
    let mut d = DiffError::new(table);
    d.primary_keys = pks.to_vec();

    if expected.len() != actual.len() {
        d.row_count_mismatch = Some((expected.len(), actual.len()));
    }

    for (i, (e, a)) in expected.iter().zip(actual.iter()).enumerate() {
        let mismatches = crate::matcher::match_row(e, a, chrono::Utc::now())?;
        if !mismatches.is_empty() {
            d.row_diffs.push(RowDiff {
                key: row_key(e, pks, i),
                diffs: mismatches,
                status: RowStatus::Mismatch,
            });
        }
    }

    Ok(d)
}

fn row_key(row: &IndexMap<String, Value>, pks: &[String], fallback_index: usize) -> Vec<(String, Value)> {
    if pks.is_empty() {
        return vec![("#".to_string(), Value::Int(fallback_index as i64))];
    }
    pks.iter()
        .map(|pk| (pk.clone(), row.get(pk).cloned().unwrap_or(Value::Null)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn renders_row_count_mismatch() {
        let d = DiffError {
            table: "users".into(),
            primary_keys: vec!["id".into()],
            row_count_mismatch: Some((2, 1)),
            row_diffs: Vec::new(),
        };
        let out = d.render();
        assert!(out.contains("+ rows: 2"));
        assert!(out.contains("- rows: 1"));
    }

    #[test]
    fn diff_ordered_rows_reports_mismatch() {
        let expected = vec![row(&[("id", Value::Int(1)), ("name", Value::String("Jon".into()))])];
        let actual = vec![row(&[("id", Value::Int(1)), ("name", Value::String("John".into()))])];
        let d = diff_ordered_rows("users", &["id".to_string()], &expected, &actual).unwrap();
        assert!(!d.is_empty());
        assert_eq!(d.row_diffs.len(), 1);
        let rendered = d.render();
        assert!(rendered.contains("id=1"));
        assert!(rendered.contains("+ name: Jon"));
        assert!(rendered.contains("- name: John"));
    }

    #[test]
    fn diff_ordered_rows_propagates_column_missing_instead_of_passing() {
        let expected = vec![row(&[("id", Value::Int(1)), ("name", Value::String("Jon".into()))])];
        let actual = vec![row(&[("id", Value::Int(1))])];
        let err = diff_ordered_rows("users", &["id".to_string()], &expected, &actual).unwrap_err();
        assert!(matches!(err, RowMatchError::ColumnMissing(col) if col == "name"));
    }
}
