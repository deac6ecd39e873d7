//! The document/test-case data model (spec §3), independent of how it was parsed.

use crate::value::Value;
use indexmap::IndexMap;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct Document {
    pub metadata: IndexMap<String, Value>,
    pub sql: String,
    pub sql_start_line: usize,
    pub parameters_text: Option<String>,
    pub parameters_type: Option<ParametersType>,
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParametersType {
    Yaml,
    Json,
    List,
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub source_file: String,
    pub line: usize,
    pub sql: String,
    pub prepared_sql: Option<String>,
    pub sql_args: Vec<Value>,
    pub parameters: IndexMap<String, Value>,
    pub fixtures: Vec<TableFixture>,
    pub expected_result: Option<Vec<IndexMap<String, Value>>>,
    pub expected_results: Vec<ExpectedResultSpec>,
    pub expected_error: Option<String>,
    pub verify_query: Option<String>,
    pub result_ordered: bool,
    pub slow_query_threshold: Option<Duration>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, source_file: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            source_file: source_file.into(),
            line,
            sql: String::new(),
            prepared_sql: None,
            sql_args: Vec::new(),
            parameters: IndexMap::new(),
            fixtures: Vec::new(),
            expected_result: None,
            expected_results: Vec::new(),
            expected_error: None,
            verify_query: None,
            result_ordered: true,
            slow_query_threshold: None,
        }
    }

    /// A case must have exactly one of an expected error or at least one expected-result block.
    pub fn has_expectation(&self) -> bool {
        self.expected_error.is_some() || self.expected_result.is_some() || !self.expected_results.is_empty()
    }

    pub fn is_error_expectation_exclusive(&self) -> bool {
        !(self.expected_error.is_some()
            && (self.expected_result.is_some() || !self.expected_results.is_empty()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureStrategy {
    ClearInsert,
    Upsert,
    Delete,
}

impl FixtureStrategy {
    /// Parses a fixture strategy tag, treating the legacy `insert` tag as an alias for
    /// `clear-insert` and falling back to `clear-insert` for anything unrecognized.
    pub fn parse(tag: &str) -> Self {
        match tag.trim() {
            "upsert" => FixtureStrategy::Upsert,
            "delete" => FixtureStrategy::Delete,
            _ => FixtureStrategy::ClearInsert,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableFixture {
    pub table_name: String,
    pub strategy: FixtureStrategy,
    pub data: Vec<IndexMap<String, Value>>,
    pub external_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedResultStrategy {
    #[default]
    All,
    PkMatch,
    PkExists,
    PkNotExists,
}

impl ExpectedResultStrategy {
    pub fn parse(tag: &str) -> Self {
        match tag.trim() {
            "pk-match" => ExpectedResultStrategy::PkMatch,
            "pk-exists" => ExpectedResultStrategy::PkExists,
            "pk-not-exists" => ExpectedResultStrategy::PkNotExists,
            _ => ExpectedResultStrategy::All,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpectedResultSpec {
    pub table_name: String,
    pub strategy: ExpectedResultStrategy,
    pub data: Vec<IndexMap<String, Value>>,
    pub external_file: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TableColumn {
    pub nullable: bool,
    pub is_primary_key: bool,
    pub data_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    pub name: String,
    pub schema: Option<String>,
    pub columns: IndexMap<String, TableColumn>,
    pub column_order: Vec<String>,
}

impl TableInfo {
    pub fn primary_keys(&self) -> Vec<String> {
        self.column_order
            .iter()
            .filter(|c| self.columns.get(*c).is_some_and(|col| col.is_primary_key))
            .cloned()
            .collect()
    }
}
