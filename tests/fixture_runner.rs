//! End-to-end integration tests driving the fixture engine as a library against real in-memory
//! SQLite databases, covering the concrete scenarios this crate is expected to validate.

use fixtest::config::SuiteConfig;
use fixtest::database::{ConnectionManager, DatabaseConfig, DbDriver, DbIsolation};
use fixtest::model::{TableColumn, TableInfo};
use fixtest::runner::{self, Mode, RunOptions};
use fixtest::table_info::{NullTableInfoCatalog, StaticTableInfoCatalog};
use std::collections::HashMap;
use std::fs;
use tempfile::tempdir;

fn sqlite_conn_mgr() -> ConnectionManager {
    let mut configs = HashMap::new();
    configs.insert(
        runner::DEFAULT_DATABASE.to_string(),
        DatabaseConfig {
            driver: DbDriver::Sqlite,
            url: "sqlite::memory:".to_string(),
            isolation: DbIsolation::None,
        },
    );
    ConnectionManager::new(configs)
}

/// A catalog declaring `users(id PK, name)`, for scenarios that rely on pk-based matching.
fn users_catalog() -> StaticTableInfoCatalog {
    let mut catalog = StaticTableInfoCatalog::new();
    let mut columns = indexmap::IndexMap::new();
    columns.insert(
        "id".to_string(),
        TableColumn { nullable: false, is_primary_key: true, data_type: "integer".to_string() },
    );
    columns.insert(
        "name".to_string(),
        TableColumn { nullable: true, is_primary_key: false, data_type: "text".to_string() },
    );
    catalog.insert(TableInfo {
        name: "users".to_string(),
        schema: None,
        columns,
        column_order: vec!["id".to_string(), "name".to_string()],
    });
    catalog
}

/// A catalog declaring `profiles(user_id PK, bio)`, for the upsert scenario.
fn profiles_catalog() -> StaticTableInfoCatalog {
    let mut catalog = StaticTableInfoCatalog::new();
    let mut columns = indexmap::IndexMap::new();
    columns.insert(
        "user_id".to_string(),
        TableColumn { nullable: false, is_primary_key: true, data_type: "integer".to_string() },
    );
    columns.insert(
        "bio".to_string(),
        TableColumn { nullable: true, is_primary_key: false, data_type: "text".to_string() },
    );
    catalog.insert(TableInfo {
        name: "profiles".to_string(),
        schema: None,
        columns,
        column_order: vec!["user_id".to_string(), "bio".to_string()],
    });
    catalog
}

#[test]
fn unique_violation_expectation_passes_and_rolls_back() {
    let dir = tempdir().unwrap();
    let conn_mgr = sqlite_conn_mgr();
    conn_mgr
        .execute(
            runner::DEFAULT_DATABASE,
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT UNIQUE NOT NULL, name TEXT NOT NULL, age INTEGER CHECK (age BETWEEN 18 AND 150))",
            &[],
        )
        .unwrap();

    let body = r#"# Reject duplicate email

## Description

Inserting a second user with an already-registered email violates the unique constraint.

## SQL

```sql
INSERT INTO users (email, name, age) VALUES ({{email}}, {{name}}, {{age}})
```

## Test Cases

### rejects a duplicate email

**Fixtures: users**

```yaml
- email: existing@example.com
  name: Alice
  age: 25
```

**Parameters:**

```yaml
email: existing@example.com
name: Bob
age: 30
```

**Expected Error:** unique violation
"#;
    fs::write(dir.path().join("reject_duplicate.test.md"), body).unwrap();

    let suite = SuiteConfig::default();
    let catalog = NullTableInfoCatalog;
    let options = RunOptions::default();
    let summary = runner::run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();

    assert_eq!(summary.cases.len(), 1);
    assert!(summary.all_passed(), "{:?}", summary.cases);
}

#[test]
fn pk_match_strategy_compares_only_named_columns() {
    let dir = tempdir().unwrap();
    let conn_mgr = sqlite_conn_mgr();
    conn_mgr
        .execute(runner::DEFAULT_DATABASE, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", &[])
        .unwrap();

    let body = r#"# Rename user

## Description

Updates a single user's display name.

## SQL

```sql
UPDATE users SET name = {{new_name}} WHERE id = {{id}}
```

## Test Cases

### renames John to Jon

**Fixtures: users**

```yaml
- id: 1
  name: John
- id: 2
  name: Jane
```

**Parameters:**

```yaml
id: 1
new_name: Jon
```

**Expected Results: users[pk-match]**

```yaml
- id: 1
  name: Jon
```
"#;
    fs::write(dir.path().join("rename.test.md"), body).unwrap();

    let suite = SuiteConfig::default();
    let catalog = users_catalog();
    let options = RunOptions::default();
    let summary = runner::run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();

    assert_eq!(summary.cases.len(), 1);
    assert!(summary.all_passed(), "{:?}", summary.cases);
}

#[test]
fn pk_match_strategy_fails_on_mismatched_column() {
    let dir = tempdir().unwrap();
    let conn_mgr = sqlite_conn_mgr();
    conn_mgr
        .execute(runner::DEFAULT_DATABASE, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", &[])
        .unwrap();

    let body = r#"# Rename user

## Description

Updates a single user's display name.

## SQL

```sql
UPDATE users SET name = {{new_name}} WHERE id = {{id}}
```

## Test Cases

### wrongly expects the name unchanged

**Fixtures: users**

```yaml
- id: 1
  name: John
```

**Parameters:**

```yaml
id: 1
new_name: Jon
```

**Expected Results: users[pk-match]**

```yaml
- id: 1
  name: John
```
"#;
    fs::write(dir.path().join("rename_wrong.test.md"), body).unwrap();

    let suite = SuiteConfig::default();
    let catalog = users_catalog();
    let options = RunOptions::default();
    let summary = runner::run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();

    assert_eq!(summary.cases.len(), 1);
    assert!(!summary.all_passed());
    assert!(summary.cases[0].diff.as_deref().unwrap_or_default().contains("Jon"));
}

#[test]
fn upsert_fixture_is_idempotent_across_applications() {
    let dir = tempdir().unwrap();
    let conn_mgr = sqlite_conn_mgr();
    conn_mgr
        .execute(runner::DEFAULT_DATABASE, "CREATE TABLE profiles (user_id INTEGER PRIMARY KEY, bio TEXT)", &[])
        .unwrap();

    let body = r#"# Count profiles

## Description

Counts the number of profile rows after the upsert fixture is materialized.

## SQL

```sql
SELECT COUNT(*) AS total FROM profiles
```

## Test Cases

### has exactly two profiles

**Fixtures: profiles[upsert]**

```yaml
- user_id: 1
  bio: A
- user_id: 2
  bio: B
```

**Fixtures: profiles[upsert]**

```yaml
- user_id: 1
  bio: A
- user_id: 2
  bio: B
```

**Expected Results:**

```yaml
- total: 2
```
"#;
    fs::write(dir.path().join("profiles.test.md"), body).unwrap();

    let suite = SuiteConfig::default();
    let catalog = profiles_catalog();
    let options = RunOptions::default();
    let summary = runner::run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();

    assert_eq!(summary.cases.len(), 1);
    assert!(summary.all_passed(), "{:?}", summary.cases);
}

#[test]
fn unordered_result_ignores_row_order() {
    let dir = tempdir().unwrap();
    let conn_mgr = sqlite_conn_mgr();
    conn_mgr.execute(runner::DEFAULT_DATABASE, "CREATE TABLE users (id INTEGER PRIMARY KEY)", &[]).unwrap();

    let body = r#"# List user ids

## Description

Lists every user id, in whatever order the engine returns them.

## SQL

```sql
SELECT id FROM users ORDER BY id
```

## Test Cases

### ids match regardless of order

**Fixtures: users**

```yaml
- id: 1
- id: 2
```

**Result Order:** unordered

**Expected Results:**

```yaml
- id: 2
- id: 1
```
"#;
    fs::write(dir.path().join("list_ids.test.md"), body).unwrap();

    let suite = SuiteConfig::default();
    let catalog = NullTableInfoCatalog;
    let options = RunOptions::default();
    let summary = runner::run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();

    assert_eq!(summary.cases.len(), 1);
    assert!(summary.all_passed(), "{:?}", summary.cases);
}

#[test]
fn regex_matcher_validates_token_shape() {
    let dir = tempdir().unwrap();
    let conn_mgr = sqlite_conn_mgr();
    conn_mgr.execute(runner::DEFAULT_DATABASE, "CREATE TABLE tokens (token TEXT)", &[]).unwrap();

    let body = r#"# Token shape

## Description

Checks that the stored token matches the expected letters-digits-letters shape.

## SQL

```sql
SELECT token FROM tokens
```

## Test Cases

### token matches the expected pattern

**Fixtures: tokens**

```yaml
- token: ab12cd
```

**Expected Results:**

```yaml
- token: ["regexp", "^[a-z]+[0-9]+[a-z]+$"]
```
"#;
    fs::write(dir.path().join("token.test.md"), body).unwrap();

    let suite = SuiteConfig::default();
    let catalog = NullTableInfoCatalog;
    let options = RunOptions::default();
    let summary = runner::run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();

    assert_eq!(summary.cases.len(), 1);
    assert!(summary.all_passed(), "{:?}", summary.cases);
}

#[test]
fn fixture_only_mode_applies_fixtures_without_running_the_query() {
    let dir = tempdir().unwrap();
    let conn_mgr = sqlite_conn_mgr();
    conn_mgr
        .execute(runner::DEFAULT_DATABASE, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", &[])
        .unwrap();

    let body = r#"# Seed users

## Description

Seeds a single user row; the query itself would fail if ever executed.

## SQL

```sql
SELECT * FROM does_not_exist
```

## Test Cases

### seeds one user

**Fixtures: users**

```yaml
- id: 1
  name: Alice
```

**Expected Results:**

```yaml
- id: 1
  name: Alice
```
"#;
    fs::write(dir.path().join("seed.test.md"), body).unwrap();

    let suite = SuiteConfig::default();
    let catalog = NullTableInfoCatalog;
    let options = RunOptions { mode: Mode::FixtureOnly, ..RunOptions::default() };
    let summary = runner::run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();

    assert_eq!(summary.cases.len(), 1);
    assert!(summary.all_passed(), "{:?}", summary.cases);
}

#[test]
fn literal_null_token_matches_null_column() {
    let dir = tempdir().unwrap();
    let conn_mgr = sqlite_conn_mgr();
    conn_mgr.execute(runner::DEFAULT_DATABASE, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", &[]).unwrap();

    let body = r#"# Find deleted user

## Description

Looks up a soft-deleted user, whose name column has been cleared.

## SQL

```sql
SELECT id, name FROM users WHERE id = {{id}}
```

## Test Cases

### name is null after deletion

**Fixtures: users**

```yaml
- id: 1
  name: null
```

**Parameters:**

```yaml
id: 1
```

**Expected Results:**

```yaml
- id: 1
  name: [null]
```
"#;
    fs::write(dir.path().join("deleted_user.test.md"), body).unwrap();

    let suite = SuiteConfig::default();
    let catalog = NullTableInfoCatalog;
    let options = RunOptions::default();
    let summary = runner::run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();

    assert_eq!(summary.cases.len(), 1);
    assert!(summary.all_passed(), "{:?}", summary.cases);
}

#[test]
fn column_missing_from_actual_row_is_reported_as_an_assertion_failure() {
    let dir = tempdir().unwrap();
    let conn_mgr = sqlite_conn_mgr();
    conn_mgr.execute(runner::DEFAULT_DATABASE, "CREATE TABLE users (id INTEGER PRIMARY KEY)", &[]).unwrap();

    let body = r#"# List user ids

## Description

Checks a column that the query never selects.

## SQL

```sql
SELECT id FROM users
```

## Test Cases

### expects a column the query doesn't return

**Fixtures: users**

```yaml
- id: 1
```

**Expected Results:**

```yaml
- id: 1
  name: Alice
```
"#;
    fs::write(dir.path().join("missing_column.test.md"), body).unwrap();

    let suite = SuiteConfig::default();
    let catalog = NullTableInfoCatalog;
    let options = RunOptions::default();
    let summary = runner::run(dir.path(), &suite, &conn_mgr, &catalog, &options).unwrap();

    assert_eq!(summary.cases.len(), 1);
    assert!(!summary.all_passed());
    assert_eq!(summary.cases[0].kind, Some(fixtest::failure::FailureKind::Assertion));
}

#[test]
fn validate_reports_parse_errors_without_executing() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("broken.test.md"),
        "# Broken\n\n## Description\n\nMissing both an expected result and an expected error.\n\n## SQL\n\n```sql\nSELECT 1\n```\n\n## Test Cases\n\n### has no expectation\n\nnothing here\n",
    )
    .unwrap();

    let errors = runner::validate(dir.path()).unwrap();
    assert_eq!(errors.len(), 1);
}
