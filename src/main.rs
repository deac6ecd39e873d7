use clap::{Parser, Subcommand, ValueEnum};
use fixtest::config::{self, SuiteConfig};
use fixtest::database::ConnectionManager;
use fixtest::failure::FailureKind;
use fixtest::loader;
use fixtest::runner::{self, CaseReport, Mode, RunOptions, RunSummary};
use fixtest::table_info::NullTableInfoCatalog;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with checkmarks
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

#[derive(Parser)]
#[command(name = "fixtest")]
#[command(about = "A Markdown-driven SQL fixture test runner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover and run fixture documents
    Run {
        /// Path to fixture documents (file or directory)
        path: PathBuf,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        /// Filter test cases by name substring
        #[arg(short, long)]
        filter: Option<String>,
        /// Show verbose output (SQL trace)
        #[arg(short, long)]
        verbose: bool,
        /// Worker pool size (overrides fixtures.yaml)
        #[arg(long)]
        parallel: Option<usize>,
        /// Persist successful transactions instead of always rolling back
        #[arg(long)]
        commit: bool,
        /// Apply fixtures only, skipping query execution and validation
        #[arg(long)]
        fixture_only: bool,
    },
    /// Parse fixture documents without executing them
    Validate {
        /// Path to fixture documents (file or directory)
        path: PathBuf,
    },
    /// Scaffold a new fixture document
    Init {
        /// Output path for the new document
        #[arg(default_value = "fixtures/example.test.md")]
        path: PathBuf,
    },
    /// Print the JSON Schema for `fixtures.yaml`
    Schema,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { path, output, filter, verbose, parallel, commit, fixture_only } => {
            run_command(&path, output, filter, verbose, parallel, commit, fixture_only)
        }
        Command::Validate { path } => validate_command(&path),
        Command::Init { path } => init_command(&path),
        Command::Schema => schema_command(),
    }
}

fn run_command(
    path: &PathBuf,
    output: OutputFormat,
    filter: Option<String>,
    verbose: bool,
    parallel: Option<usize>,
    commit: bool,
    fixture_only: bool,
) {
    if verbose
        && let Some(ref f) = filter
    {
        eprintln!("Filtering cases by: {f:?}");
    }

    let discovery_root: PathBuf =
        if path.is_file() { path.parent().unwrap_or(path).to_path_buf() } else { path.clone() };

    let suite: SuiteConfig = match config::load_suite_config(&discovery_root) {
        Ok(suite) => suite,
        Err(e) => {
            eprintln!("Error loading suite config: {e}");
            std::process::exit(2);
        }
    };

    let conn_mgr = ConnectionManager::new(suite.databases.clone());
    let catalog = NullTableInfoCatalog;

    let options = RunOptions {
        filter,
        parallel,
        commit,
        mode: if fixture_only { Mode::FixtureOnly } else { Mode::Normal },
    };

    let summary = match runner::run(path, &suite, &conn_mgr, &catalog, &options) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    conn_mgr.close_all();

    match output {
        OutputFormat::Human => print_human(&summary, verbose),
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Junit => print!("{}", format_junit_xml(&summary)),
    }

    if !summary.all_passed() {
        std::process::exit(1);
    }
}

fn print_human(summary: &RunSummary, verbose: bool) {
    let mut current_file: Option<&str> = None;
    for case in &summary.cases {
        if current_file != Some(case.source_file.as_str()) {
            println!("\n{}", case.source_file);
            current_file = Some(case.source_file.as_str());
        }

        if case.passed {
            println!("  \u{2713} {} ({:.2?})", case.name, case.duration);
            continue;
        }

        let marker = match case.kind {
            Some(FailureKind::Assertion) => "\u{26a0}",
            Some(FailureKind::Definition) => "\u{2716}",
            _ => "?",
        };
        println!("  {marker} {} ({:.2?})", case.name, case.duration);
        if let Some(message) = &case.message {
            println!("    {message}");
        }
        for (key, value) in &case.context {
            println!("    {key}: {value}");
        }
        if verbose && let Some(diff) = &case.diff {
            for line in diff.lines() {
                println!("    {line}");
            }
        }
    }

    println!("\n{} passed, {} failed", summary.passed, summary.failed);
}

fn print_json(summary: &RunSummary) {
    let cases: Vec<serde_json::Value> = summary
        .cases
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name,
                "source_file": c.source_file,
                "line": c.line,
                "passed": c.passed,
                "duration_ms": c.duration.as_secs_f64() * 1000.0,
                "kind": c.kind.map(|k| k.to_string()),
                "message": c.message,
                "diff": c.diff,
                "context": c.context,
            })
        })
        .collect();

    let output = serde_json::json!({
        "passed": summary.passed,
        "failed": summary.failed,
        "cases": cases,
    });
    println!("{}", serde_json::to_string_pretty(&output).expect("failed to serialize summary"));
}

/// Formats a run summary as JUnit XML, grouping cases by source file, following the teacher's
/// `format_junit_xml`/`escape_xml` pattern.
fn format_junit_xml(summary: &RunSummary) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let total_time: f64 = summary.cases.iter().map(|c| c.duration.as_secs_f64()).sum();
    let _ = writeln!(
        xml,
        "<testsuites tests=\"{}\" failures=\"{}\" time=\"{total_time:.3}\">",
        summary.cases.len(),
        summary.failed
    );

    let mut start = 0;
    while start < summary.cases.len() {
        let file = summary.cases[start].source_file.clone();
        let mut end = start;
        while end < summary.cases.len() && summary.cases[end].source_file == file {
            end += 1;
        }
        write_junit_testsuite(&mut xml, &file, &summary.cases[start..end]);
        start = end;
    }

    xml.push_str("</testsuites>\n");
    xml
}

fn write_junit_testsuite(xml: &mut String, file: &str, cases: &[CaseReport]) {
    let time: f64 = cases.iter().map(|c| c.duration.as_secs_f64()).sum();
    let failures = cases.iter().filter(|c| !c.passed).count();

    let _ = writeln!(
        xml,
        "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{failures}\" time=\"{time:.3}\">",
        escape_xml(file),
        cases.len()
    );

    for case in cases {
        let _ = writeln!(
            xml,
            "    <testcase name=\"{}\" time=\"{:.3}\">",
            escape_xml(&case.name),
            case.duration.as_secs_f64()
        );

        if !case.passed {
            let message = case.message.as_deref().unwrap_or("case failed");
            let _ = writeln!(xml, "      <failure message=\"{}\">", escape_xml(message));
            if let Some(diff) = &case.diff {
                let _ = writeln!(xml, "{}", escape_xml(diff));
            }
            xml.push_str("      </failure>\n");
        }

        xml.push_str("    </testcase>\n");
    }

    xml.push_str("  </testsuite>\n");
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn validate_command(path: &PathBuf) {
    let documents = match loader::find_documents(path) {
        Ok(documents) => documents,
        Err(e) => {
            eprintln!("Error finding fixture documents: {e}");
            std::process::exit(2);
        }
    };

    if documents.is_empty() {
        eprintln!("No fixture documents found at: {}", path.display());
        std::process::exit(2);
    }

    let mut errors = 0;
    for doc_path in &documents {
        match loader::load_document(doc_path) {
            Ok(document) => {
                println!("\u{2713} {} ({} case(s))", doc_path.display(), document.test_cases.len())
            }
            Err(e) => {
                eprintln!("\u{2716} {}: {e}", doc_path.display());
                errors += 1;
            }
        }
    }

    if errors > 0 {
        eprintln!("\n{errors} document(s) failed validation");
        std::process::exit(1);
    }
    println!("\nAll {} document(s) valid", documents.len());
}

fn init_command(path: &PathBuf) {
    let template = r#"# User lookup by email

## Description

Looks up a user by email address.

## SQL

```sql
SELECT id, email, name FROM users WHERE email = {{email}}
```

## Test Cases

### finds an existing user

**Parameters:**

```yaml
email: alice@example.com
```

**Fixtures: users**

```yaml
- id: 1
  email: alice@example.com
  name: Alice
```

**Expected Results:**

```yaml
- id: 1
  email: alice@example.com
  name: Alice
```
"#;

    if path.exists() {
        eprintln!("Error: file already exists: {}", path.display());
        std::process::exit(1);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
        && let Err(e) = fs::create_dir_all(parent)
    {
        eprintln!("Error creating directory: {e}");
        std::process::exit(1);
    }
    if let Err(e) = fs::write(path, template) {
        eprintln!("Error writing file: {e}");
        std::process::exit(1);
    }
    println!("Created: {}", path.display());
}

fn schema_command() {
    let schema = schemars::schema_for!(SuiteConfig);
    let json = serde_json::to_string_pretty(&schema).expect("failed to serialize schema");
    println!("{json}");
}
