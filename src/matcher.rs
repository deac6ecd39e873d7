//! Row and value comparison engine.
//!
//! Generalizes the teacher's `OutputMatch`/`OutputMatchStructured` untagged-match idiom
//! (exact vs. equals/contains/regex) into the richer matcher tokens fixture documents use:
//! `null`, `notnull`, `any`, `["regexp", pattern]`, `["currentdate", tolerance?]`.

use crate::value::Value;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub enum Matcher {
    Null,
    NotNull,
    Any,
    Regex(Regex),
    CurrentDate(Duration),
    Equal(Value),
}

#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("invalid matcher syntax: {0}")]
    InvalidSyntax(String),
    #[error("invalid regex pattern '{0}': {1}")]
    InvalidRegex(String, regex::Error),
}

/// Parses an expected-value literal into a [`Matcher`]. Scalars become `Equal`; the special
/// single- and two-element sequence forms become their respective tokens.
pub fn parse_matcher(expected: &Value) -> Result<Matcher, MatcherError> {
    if let Value::Seq(items) = expected {
        match items.as_slice() {
            [Value::Null] => return Ok(Matcher::Null),
            [Value::String(tag)] if tag == "null" => return Ok(Matcher::Null),
            [Value::String(tag)] if tag == "notnull" => return Ok(Matcher::NotNull),
            [Value::String(tag)] if tag == "any" => return Ok(Matcher::Any),
            [Value::String(tag)] if tag == "currentdate" => {
                return Ok(Matcher::CurrentDate(Duration::seconds(5)));
            }
            [Value::String(tag), tol] if tag == "currentdate" => {
                let tol = tol
                    .as_str()
                    .ok_or_else(|| MatcherError::InvalidSyntax("currentdate tolerance must be a string".into()))?;
                return Ok(Matcher::CurrentDate(parse_duration(tol)?));
            }
            [Value::String(tag), pattern] if tag == "regexp" => {
                let pattern = pattern
                    .as_str()
                    .ok_or_else(|| MatcherError::InvalidSyntax("regexp pattern must be a string".into()))?;
                let re = Regex::new(pattern)
                    .map_err(|e| MatcherError::InvalidRegex(pattern.to_string(), e))?;
                return Ok(Matcher::Regex(re));
            }
            _ => return Err(MatcherError::InvalidSyntax(format!("{:?}", items))),
        }
    }
    Ok(Matcher::Equal(expected.clone()))
}

/// Parses a duration shorthand like `"10s"`, `"250ms"`, `"3m"`, `"2h"`. A bare number is
/// interpreted as seconds.
fn parse_duration(s: &str) -> Result<Duration, MatcherError> {
    let s = s.trim();
    let (num_part, unit) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, "ms")
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, "s")
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, "m")
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, "h")
    } else {
        (s, "s")
    };
    let n: i64 = num_part
        .trim()
        .parse()
        .map_err(|_| MatcherError::InvalidSyntax(format!("invalid duration '{s}'")))?;
    Ok(match unit {
        "ms" => Duration::milliseconds(n),
        "m" => Duration::minutes(n),
        "h" => Duration::hours(n),
        _ => Duration::seconds(n),
    })
}

impl Matcher {
    pub fn matches(&self, actual: &Value, now: DateTime<Utc>) -> bool {
        match self {
            Matcher::Null => actual.is_null(),
            Matcher::NotNull => !actual.is_null(),
            Matcher::Any => true,
            Matcher::Regex(re) => actual.as_str().is_some_and(|s| re.is_match(s)),
            Matcher::CurrentDate(tolerance) => match actual {
                Value::Time(t) => (*t - now).abs() <= *tolerance,
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|t| (t.with_timezone(&Utc) - now).abs() <= *tolerance)
                    .unwrap_or(false),
                _ => false,
            },
            Matcher::Equal(expected) => values_equal(expected, actual),
        }
    }
}

/// Scalar equality with numeric widening (ints/floats compare within a small epsilon) and
/// string/bytes compared as UTF-8 text; everything else falls back to structural equality.
pub fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => (a - b).abs() < 1e-9,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
            (*a as f64 - b).abs() < 1e-9
        }
        (Value::String(a), Value::Bytes(b)) | (Value::Bytes(b), Value::String(a)) => {
            a.as_bytes() == b.as_slice()
        }
        (Value::Seq(a), Value::Seq(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|bv| values_equal(v, bv)))
        }
        _ => expected == actual,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RowMatchError {
    #[error("expected column '{0}' missing from actual row")]
    ColumnMissing(String),
    #[error(transparent)]
    Matcher(#[from] MatcherError),
}

#[derive(Debug, Clone)]
pub struct ColumnMismatch {
    pub column: String,
    pub expected: Value,
    pub actual: Value,
}

/// Compares a single expected row against an actual row. Every key present in `expected` must
/// also be present in `actual`. Returns the list of columns that did not match (empty = match).
pub fn match_row(
    expected: &IndexMap<String, Value>,
    actual: &IndexMap<String, Value>,
    now: DateTime<Utc>,
) -> Result<Vec<ColumnMismatch>, RowMatchError> {
    let mut mismatches = Vec::new();
    for (col, expected_value) in expected {
        let actual_value = actual
            .get(col)
            .ok_or_else(|| RowMatchError::ColumnMissing(col.clone()))?;
        let matcher = parse_matcher(expected_value)?;
        if !matcher.matches(actual_value, now) {
            mismatches.push(ColumnMismatch {
                column: col.clone(),
                expected: expected_value.clone(),
                actual: actual_value.clone(),
            });
        }
    }
    Ok(mismatches)
}

/// Counts how many keys two rows share with matching values; used to pair expected/actual rows
/// when `ResultOrdered` is false.
pub fn overlap_score(expected: &IndexMap<String, Value>, actual: &IndexMap<String, Value>) -> usize {
    expected
        .iter()
        .filter(|(k, v)| actual.get(*k).is_some_and(|av| values_equal(v, av)))
        .count()
}

/// Greedily pairs expected rows to actual rows by descending overlap score. Returns
/// `(matched_pairs, unmatched_expected_indices, unmatched_actual_indices)`.
pub fn pair_rows_unordered(
    expected: &[IndexMap<String, Value>],
    actual: &[IndexMap<String, Value>],
) -> (Vec<(usize, usize)>, Vec<usize>, Vec<usize>) {
    let mut scored: Vec<(usize, usize, usize)> = Vec::new();
    for (ei, e) in expected.iter().enumerate() {
        for (ai, a) in actual.iter().enumerate() {
            scored.push((overlap_score(e, a), ei, ai));
        }
    }
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let mut used_expected = BTreeSet::new();
    let mut used_actual = BTreeSet::new();
    let mut pairs = Vec::new();
    for (_, ei, ai) in scored {
        if used_expected.contains(&ei) || used_actual.contains(&ai) {
            continue;
        }
        used_expected.insert(ei);
        used_actual.insert(ai);
        pairs.push((ei, ai));
    }
    pairs.sort_by_key(|(ei, _)| *ei);

    let unmatched_expected: Vec<usize> = (0..expected.len())
        .filter(|i| !used_expected.contains(i))
        .collect();
    let unmatched_actual: Vec<usize> = (0..actual.len())
        .filter(|i| !used_actual.contains(i))
        .collect();

    (pairs, unmatched_expected, unmatched_actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn null_and_notnull_tokens() {
        let m = parse_matcher(&Value::Seq(vec![Value::String("null".into())])).unwrap();
        assert!(m.matches(&Value::Null, Utc::now()));
        assert!(!m.matches(&Value::Int(1), Utc::now()));

        let m = parse_matcher(&Value::Seq(vec![Value::String("notnull".into())])).unwrap();
        assert!(m.matches(&Value::Int(1), Utc::now()));
        assert!(!m.matches(&Value::Null, Utc::now()));
    }

    #[test]
    fn literal_yaml_null_in_sequence_is_the_null_token() {
        let m = parse_matcher(&Value::Seq(vec![Value::Null])).unwrap();
        assert!(matches!(m, Matcher::Null));
        assert!(m.matches(&Value::Null, Utc::now()));
        assert!(!m.matches(&Value::Int(1), Utc::now()));
    }

    #[test]
    fn regex_matcher() {
        let m = parse_matcher(&Value::Seq(vec![
            Value::String("regexp".into()),
            Value::String("^[a-z]+[0-9]+[a-z]+$".into()),
        ]))
        .unwrap();
        assert!(m.matches(&Value::String("ab12cd".into()), Utc::now()));
        assert!(!m.matches(&Value::String("AB12CD".into()), Utc::now()));
    }

    #[test]
    fn currentdate_matcher_within_tolerance() {
        let now = Utc::now();
        let m = parse_matcher(&Value::Seq(vec![
            Value::String("currentdate".into()),
            Value::String("3h".into()),
        ]))
        .unwrap();
        let created = now + Duration::hours(2);
        assert!(m.matches(&Value::Time(created), now));
    }

    #[test]
    fn scalar_numeric_widening() {
        assert!(values_equal(&Value::Int(3), &Value::Float(3.0)));
        assert!(!values_equal(&Value::Int(3), &Value::Float(3.1)));
    }

    #[test]
    fn match_row_reports_mismatches() {
        let expected = row(&[("id", Value::Int(1)), ("name", Value::String("Jon".into()))]);
        let actual = row(&[("id", Value::Int(1)), ("name", Value::String("John".into()))]);
        let mismatches = match_row(&expected, &actual, Utc::now()).unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].column, "name");
    }

    #[test]
    fn match_row_errors_on_missing_column() {
        let expected = row(&[("id", Value::Int(1)), ("missing_col", Value::Int(2))]);
        let actual = row(&[("id", Value::Int(1))]);
        let err = match_row(&expected, &actual, Utc::now()).unwrap_err();
        assert!(matches!(err, RowMatchError::ColumnMissing(_)));
    }

    #[test]
    fn pair_rows_unordered_matches_by_overlap() {
        let expected = vec![row(&[("id", Value::Int(2))]), row(&[("id", Value::Int(1))])];
        let actual = vec![row(&[("id", Value::Int(1))]), row(&[("id", Value::Int(2))])];
        let (pairs, unmatched_e, unmatched_a) = pair_rows_unordered(&expected, &actual);
        assert_eq!(pairs.len(), 2);
        assert!(unmatched_e.is_empty());
        assert!(unmatched_a.is_empty());
    }
}
