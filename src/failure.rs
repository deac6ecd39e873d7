//! Failure classification: wraps a raw error with its kind (assertion/definition/unknown) and
//! contextual key/value pairs.
//!
//! Grounded on the teacher's plain `Result<_, String>` error propagation style in `runner.rs`,
//! generalized into a typed wrapper because this crate's validation/classification requirements
//! (spec §4.9) are considerably richer than "a command failed".

use crate::diff::DiffError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Assertion,
    Definition,
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Assertion => "assertion",
            FailureKind::Definition => "definition",
            FailureKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

const ASSERTION_PREFIXES: &[&str] = &[
    "simple validation failed",
    "verify query validation failed",
    "table state validation failed",
    "validation failed",
];

const DEFINITION_PREFIXES: &[&str] = &[
    "failed to execute fixtures",
    "failed to execute fixture",
    "failed to execute verify query",
    "failed to execute query",
    "failed to execute DML query",
    "failed to execute main SQL",
    "failed to render SQL template",
    "failed to load fixture external file",
    "failed to load expected results",
    "failed to query table",
    "failed to get column names",
    "failed to scan row",
    "failed to count rows",
    "failed to clear table",
    "failed to insert row",
    "failed to prepare insert statement",
    "failed to execute delete",
    "failed to unmarshal external rows",
];

/// A fixture-execution failure: its classification, the underlying message, a rendered
/// diff (when the failure is a row/table mismatch), and contextual fields for the reporter.
#[derive(Debug)]
pub struct FixtureError {
    pub kind: FailureKind,
    pub message: String,
    pub diff: Option<DiffError>,
    pub context: Vec<(String, String)>,
}

impl fmt::Display for FixtureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FixtureError {}

impl FixtureError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diff: None,
            context: Vec::new(),
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion, message)
    }

    pub fn definition(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Definition, message)
    }

    pub fn with_diff(mut self, diff: DiffError) -> Self {
        self.diff = Some(diff);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Classifies a raw message by prefix, matching the taxonomy in spec §4.9. `kind` should
    /// already be known from the call site in most cases; this is the fallback used when an
    /// error crosses a boundary that only carries text (e.g. surfaced from an external
    /// collaborator).
    pub fn classify_message(message: &str) -> FailureKind {
        for prefix in ASSERTION_PREFIXES {
            if message.starts_with(prefix) {
                return FailureKind::Assertion;
            }
        }
        for prefix in DEFINITION_PREFIXES {
            if message.starts_with(prefix) {
                return FailureKind::Definition;
            }
        }
        FailureKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_assertion_prefixes() {
        assert_eq!(
            FixtureError::classify_message("validation failed: column mismatch"),
            FailureKind::Assertion
        );
    }

    #[test]
    fn classifies_definition_prefixes() {
        assert_eq!(
            FixtureError::classify_message("failed to execute fixture users: syntax error"),
            FailureKind::Definition
        );
    }

    #[test]
    fn falls_back_to_unknown() {
        assert_eq!(FixtureError::classify_message("boom"), FailureKind::Unknown);
    }

    #[test]
    fn builder_chains_context() {
        let err = FixtureError::definition("failed to execute fixture users")
            .with_context("table", "users")
            .with_context("line", "12");
        assert_eq!(err.context.len(), 2);
    }
}
