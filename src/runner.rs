//! The test runner (spec §4.8 Test Runner, C8): discovery, scheduling, result aggregation, and
//! summary reporting.
//!
//! Grounded on the teacher's `main.rs` orchestration (`thread::scope`-bounded parallel-or-serial
//! execution, sort-by-original-order, aggregate pass/fail counters, always-run-suite-teardown
//! idiom) kept nearly verbatim in control flow, re-pointed at Markdown document discovery
//! (`loader::find_documents`/`load_document`) and per-case transaction scheduling
//! (`executor::execute_test_case`) instead of spec-file/subprocess scheduling.

use crate::config::{resolve_options, SuiteConfig};
use crate::database::{ConnectionManager, DbIsolation};
use crate::diff::DiffError;
use crate::executor::{execute_test_case, resolve_value, ExecutorOptions};
use crate::failure::FailureKind;
use crate::loader;
use crate::markdown;
use crate::model::{Document, TestCase};
use crate::sql_generator::{SqlGenerator, TemplateGenerator};
use crate::table_info::TableInfoCatalog;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// The connection name used when a document's front matter names no `database`.
pub const DEFAULT_DATABASE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    FixtureOnly,
}

pub struct RunOptions {
    pub filter: Option<String>,
    pub parallel: Option<usize>,
    pub commit: bool,
    pub mode: Mode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { filter: None, parallel: None, commit: false, mode: Mode::Normal }
    }
}

/// One case's outcome, shaped for the three reporter formats in `main.rs`.
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub name: String,
    pub source_file: String,
    pub line: usize,
    pub passed: bool,
    pub duration: Duration,
    pub kind: Option<FailureKind>,
    pub message: Option<String>,
    pub diff: Option<String>,
    pub context: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub cases: Vec<CaseReport>,
    pub passed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("fixture-only mode requires exactly one matching test case, found {0}")]
    FixtureOnlyModeRequiresOne(usize),
    #[error("failed to discover fixture documents: {0}")]
    Discovery(#[from] std::io::Error),
}

struct Job {
    database: String,
    case: TestCase,
    base_dir: PathBuf,
    commit: bool,
    timeout: Option<Duration>,
    is_first_of_document: bool,
}

fn metadata_str<'a>(metadata: &'a IndexMap<String, Value>, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}

fn metadata_bool(metadata: &IndexMap<String, Value>, key: &str) -> Option<bool> {
    match metadata.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}

fn metadata_u64(metadata: &IndexMap<String, Value>, key: &str) -> Option<u64> {
    match metadata.get(key) {
        Some(Value::Int(n)) if *n >= 0 => Some(*n as u64),
        _ => None,
    }
}

/// Merges the document's declared-parameters block under the case's own parameters, case winning
/// on conflict, per spec §4.8 Preparation.
fn merged_parameters(document: &Document, case: &TestCase) -> IndexMap<String, Value> {
    let mut merged = match (&document.parameters_text, document.parameters_type) {
        (Some(text), Some(ptype)) => markdown::decode_param_map(text, ptype),
        _ => IndexMap::new(),
    };
    for (k, v) in &case.parameters {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Renders `PreparedSQL`/`SQLArgs` for one case via the external SQL generator, inheriting the
/// document SQL when the case doesn't override it and normalizing parameters (`currentdate`
/// offsets) before rendering.
fn prepare_case(document: &Document, case: &TestCase, dialect: crate::dialect::Dialect) -> Result<TestCase, String> {
    let mut tc = case.clone();
    if tc.sql.trim().is_empty() {
        tc.sql = document.sql.clone();
    }

    let mut params = merged_parameters(document, case);
    for v in params.values_mut() {
        *v = resolve_value(v);
    }

    let generator = TemplateGenerator { dialect };
    let (sql, args) = generator
        .generate(&tc.sql, &params)
        .map_err(|e| format!("failed to render SQL template: {e}"))?;

    tc.parameters = params;
    tc.prepared_sql = Some(sql);
    tc.sql_args = args;
    Ok(tc)
}

fn run_one(conn_mgr: &ConnectionManager, catalog: &dyn TableInfoCatalog, job: &Job, fixture_only: bool) -> CaseReport {
    if job.is_first_of_document && conn_mgr.isolation(&job.database) == Some(DbIsolation::PerFile) {
        conn_mgr.reset(&job.database);
    }

    let exec_options = ExecutorOptions {
        commit: job.commit,
        base_dir: job.base_dir.clone(),
        fixture_only,
    };

    let start = Instant::now();
    let outcome = execute_test_case(conn_mgr, &job.database, catalog, &job.case, &exec_options);
    let duration = start.elapsed();

    // Every database call is a blocking, synchronous suspension point with no cancellation
    // hook exposed by any of the three drivers, so a per-case timeout can only be detected
    // after the fact rather than preempted; a case that ran past its budget is still reported
    // as a Definition failure even though its work already completed.
    let outcome = match (job.timeout, outcome) {
        (Some(limit), Ok(_)) if duration > limit => Err(crate::failure::FixtureError::definition(format!(
            "case exceeded timeout of {limit:?} (took {duration:?})"
        ))),
        (_, other) => other,
    };

    match outcome {
        Ok(_trace) => CaseReport {
            name: job.case.name.clone(),
            source_file: job.case.source_file.clone(),
            line: job.case.line,
            passed: true,
            duration,
            kind: None,
            message: None,
            diff: None,
            context: Vec::new(),
        },
        Err(err) => CaseReport {
            name: job.case.name.clone(),
            source_file: job.case.source_file.clone(),
            line: job.case.line,
            passed: false,
            duration,
            kind: Some(err.kind),
            message: Some(err.message.clone()),
            diff: err.diff.as_ref().map(DiffError::render),
            context: err.context.clone(),
        },
    }
}

/// Discovers, prepares, schedules, and runs every fixture document under `path` against
/// `conn_mgr`, returning an aggregated summary sorted by `(source_file, line, name)`.
pub fn run(
    path: &Path,
    suite: &SuiteConfig,
    conn_mgr: &ConnectionManager,
    catalog: &dyn TableInfoCatalog,
    options: &RunOptions,
) -> Result<RunSummary, RunError> {
    let discovery_root = if path.is_dir() { path } else { path.parent().unwrap_or(Path::new(".")) };
    let base_dir = suite.resolved_base_dir(discovery_root);

    let documents = loader::find_documents(path)?;

    let mut jobs: Vec<Job> = Vec::new();
    let mut preload: Vec<CaseReport> = Vec::new();

    for doc_path in &documents {
        let source_file = doc_path.to_string_lossy().replace('\\', "/");
        let document = match loader::load_document(doc_path) {
            Ok(document) => document,
            Err(e) => {
                preload.push(CaseReport {
                    name: "<load>".to_string(),
                    source_file,
                    line: 0,
                    passed: false,
                    duration: Duration::ZERO,
                    kind: Some(FailureKind::Definition),
                    message: Some(e.to_string()),
                    diff: None,
                    context: Vec::new(),
                });
                continue;
            }
        };

        let database = metadata_str(&document.metadata, "database").unwrap_or(DEFAULT_DATABASE).to_string();
        let document_commit = if options.commit { Some(true) } else { metadata_bool(&document.metadata, "commit") };
        let document_timeout = metadata_u64(&document.metadata, "timeout").map(Duration::from_secs);

        let Some(dialect) = conn_mgr.dialect(&database) else {
            for case in &document.test_cases {
                preload.push(CaseReport {
                    name: case.name.clone(),
                    source_file: case.source_file.clone(),
                    line: case.line,
                    passed: false,
                    duration: Duration::ZERO,
                    kind: Some(FailureKind::Definition),
                    message: Some(format!("database '{database}' is not configured")),
                    diff: None,
                    context: Vec::new(),
                });
            }
            continue;
        };

        let mut first_in_document = true;
        for case in &document.test_cases {
            if let Some(filter) = &options.filter {
                if !case.name.contains(filter.as_str()) {
                    continue;
                }
            }

            match prepare_case(&document, case, dialect) {
                Ok(prepared) => {
                    let effective = resolve_options(suite, document_commit, document_timeout);
                    jobs.push(Job {
                        database: database.clone(),
                        case: prepared,
                        base_dir: base_dir.clone(),
                        commit: effective.commit,
                        timeout: effective.timeout,
                        is_first_of_document: first_in_document,
                    });
                    first_in_document = false;
                }
                Err(message) => {
                    // `prepare_case` surfaces failures from the caller-supplied `SqlGenerator`
                    // as plain text with no structured kind attached, so fall back to
                    // message-prefix classification rather than assuming Definition.
                    let kind = crate::failure::FixtureError::classify_message(&message);
                    preload.push(CaseReport {
                        name: case.name.clone(),
                        source_file: case.source_file.clone(),
                        line: case.line,
                        passed: false,
                        duration: Duration::ZERO,
                        kind: Some(kind),
                        message: Some(message),
                        diff: None,
                        context: Vec::new(),
                    });
                }
            }
        }
    }

    let fixture_only = options.mode == Mode::FixtureOnly;
    if fixture_only && jobs.len() + preload.len() != 1 {
        return Err(RunError::FixtureOnlyModeRequiresOne(jobs.len() + preload.len()));
    }

    let pool_size = options
        .parallel
        .or(suite.parallel)
        .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
        .max(1)
        .min(jobs.len().max(1));

    let indices: VecDeque<usize> = (0..jobs.len()).collect();
    let queue = Mutex::new(indices);
    let results: Mutex<Vec<Option<CaseReport>>> = Mutex::new((0..jobs.len()).map(|_| None).collect());

    thread::scope(|scope| {
        for _ in 0..pool_size {
            scope.spawn(|| loop {
                let idx = {
                    let mut q = queue.lock().expect("job queue lock poisoned");
                    q.pop_front()
                };
                let Some(idx) = idx else { break };
                let report = run_one(conn_mgr, catalog, &jobs[idx], fixture_only);
                results.lock().expect("results lock poisoned")[idx] = Some(report);
            });
        }
    });

    let mut cases: Vec<CaseReport> = results
        .into_inner()
        .expect("results lock poisoned")
        .into_iter()
        .map(|r| r.expect("every job slot filled"))
        .chain(preload)
        .collect();

    cases.sort_by(|a, b| {
        (a.source_file.as_str(), a.line, a.name.as_str()).cmp(&(b.source_file.as_str(), b.line, b.name.as_str()))
    });

    let passed = cases.iter().filter(|c| c.passed).count();
    let failed = cases.len() - passed;

    Ok(RunSummary { cases, passed, failed })
}

/// Parses every matching document under `path` without executing it, returning `(source_file,
/// error)` pairs for any that fail to parse.
pub fn validate(path: &Path) -> Result<Vec<(PathBuf, String)>, std::io::Error> {
    let documents = loader::find_documents(path)?;
    let mut errors = Vec::new();
    for doc_path in &documents {
        if let Err(e) = loader::load_document(doc_path) {
            errors.push((doc_path.clone(), e.to_string()));
        }
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseConfig, DbDriver};
    use crate::table_info::NullTableInfoCatalog;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_case(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    fn sqlite_conn_mgr() -> ConnectionManager {
        let mut configs = HashMap::new();
        configs.insert(
            DEFAULT_DATABASE.to_string(),
            DatabaseConfig { driver: DbDriver::Sqlite, url: "sqlite::memory:".to_string(), isolation: DbIsolation::None },
        );
        ConnectionManager::new(configs)
    }

    #[test]
    fn runs_a_passing_case_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write_case(
            dir.path(),
            "create_table.test.md",
            "# setup\n\n## Description\n\nCreates the users table.\n\n## SQL\n\n```sql\nCREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)\n```\n\n### creates the table\n\n**Expected Results:**\n\n```json\n[]\n```\n",
        );

        let conn_mgr = sqlite_conn_mgr();
        let suite = SuiteConfig::default();
        let catalog = NullTableInfoCatalog;
        let options = RunOptions::default();

        let summary = run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();
        assert_eq!(summary.cases.len(), 1);
        assert!(summary.all_passed(), "{:?}", summary.cases);
    }

    #[test]
    fn filter_skips_non_matching_cases() {
        let dir = tempfile::tempdir().unwrap();
        write_case(
            dir.path(),
            "two_cases.test.md",
            "# doc\n\n## Description\n\nA no-op query.\n\n## SQL\n\n```sql\nSELECT 1\n```\n\n### alpha case\n\n**Expected Results:**\n\n```json\n[]\n```\n\n### beta case\n\n**Expected Results:**\n\n```json\n[]\n```\n",
        );

        let conn_mgr = sqlite_conn_mgr();
        let suite = SuiteConfig::default();
        let catalog = NullTableInfoCatalog;
        let options = RunOptions { filter: Some("alpha".to_string()), ..RunOptions::default() };

        let summary = run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();
        assert_eq!(summary.cases.len(), 1);
        assert_eq!(summary.cases[0].name, "alpha case");
    }

    #[test]
    fn fixture_only_mode_rejects_multiple_cases() {
        let dir = tempfile::tempdir().unwrap();
        write_case(
            dir.path(),
            "two_cases.test.md",
            "# doc\n\n## Description\n\nA no-op query.\n\n## SQL\n\n```sql\nSELECT 1\n```\n\n### alpha\n\n**Expected Results:**\n\n```json\n[]\n```\n\n### beta\n\n**Expected Results:**\n\n```json\n[]\n```\n",
        );

        let conn_mgr = sqlite_conn_mgr();
        let suite = SuiteConfig::default();
        let catalog = NullTableInfoCatalog;
        let options = RunOptions { mode: Mode::FixtureOnly, ..RunOptions::default() };

        let err = run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap_err();
        assert!(matches!(err, RunError::FixtureOnlyModeRequiresOne(2)));
    }

    #[test]
    fn missing_database_surfaces_as_definition_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_case(
            dir.path(),
            "orphan.test.md",
            "---\ndatabase: nope\n---\n# doc\n\n## Description\n\nA no-op query.\n\n## SQL\n\n```sql\nSELECT 1\n```\n\n### alone\n\n**Expected Results:**\n\n```json\n[]\n```\n",
        );

        let conn_mgr = sqlite_conn_mgr();
        let suite = SuiteConfig::default();
        let catalog = NullTableInfoCatalog;
        let options = RunOptions::default();

        let summary = run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();
        assert_eq!(summary.cases.len(), 1);
        assert!(!summary.cases[0].passed);
        assert_eq!(summary.cases[0].kind, Some(FailureKind::Definition));
    }
}
