//! Per-driver SQL dispatch: identifier quoting, placeholder syntax, and upsert statement
//! construction.
//!
//! Generalizes the teacher's `database.rs::DbDriver{Postgres,Sqlite}` enum (used there only to
//! pick a connection strategy) into a small trait-free dispatch covering the DML fragments the
//! fixture executor needs. A `MySql` variant is added for the new dialect.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Quotes a single identifier for this dialect.
    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
        }
    }

    /// Renders the `n`-th (1-based) positional placeholder.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Builds `DELETE FROM <table>` with no WHERE clause, used by the `clear-insert` strategy.
    pub fn delete_all_statement(self, table: &str) -> String {
        format!("DELETE FROM {}", self.quote_ident(table))
    }

    /// Builds a plain positional `INSERT INTO <table> (<cols>) VALUES (<placeholders>)`.
    pub fn insert_statement(self, table: &str, cols: &[String]) -> String {
        let quoted_cols: Vec<String> = cols.iter().map(|c| self.quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=cols.len()).map(|n| self.placeholder(n)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_ident(table),
            quoted_cols.join(", "),
            placeholders.join(", ")
        )
    }

    /// Builds an upsert statement keyed on the primary key columns. Every row applying this
    /// statement must supply all of `pks`.
    pub fn upsert_statement(self, table: &str, cols: &[String], pks: &[String]) -> String {
        let quoted_table = self.quote_ident(table);
        let quoted_cols: Vec<String> = cols.iter().map(|c| self.quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=cols.len()).map(|n| self.placeholder(n)).collect();
        let base = format!(
            "INSERT INTO {quoted_table} ({}) VALUES ({})",
            quoted_cols.join(", "),
            placeholders.join(", ")
        );

        let non_pk_cols: Vec<&String> = cols.iter().filter(|c| !pks.contains(c)).collect();

        let mut out = base;
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                let pk_list: Vec<String> = pks.iter().map(|p| self.quote_ident(p)).collect();
                if non_pk_cols.is_empty() {
                    let _ = write!(out, " ON CONFLICT ({}) DO NOTHING", pk_list.join(", "));
                } else {
                    let sets: Vec<String> = non_pk_cols
                        .iter()
                        .map(|c| format!("{} = EXCLUDED.{}", self.quote_ident(c), self.quote_ident(c)))
                        .collect();
                    let _ = write!(
                        out,
                        " ON CONFLICT ({}) DO UPDATE SET {}",
                        pk_list.join(", "),
                        sets.join(", ")
                    );
                }
            }
            Dialect::MySql => {
                if non_pk_cols.is_empty() {
                    let pk_list: Vec<String> = pks
                        .iter()
                        .map(|p| format!("{} = VALUES({})", self.quote_ident(p), self.quote_ident(p)))
                        .collect();
                    let _ = write!(out, " ON DUPLICATE KEY UPDATE {}", pk_list.join(", "));
                } else {
                    let sets: Vec<String> = non_pk_cols
                        .iter()
                        .map(|c| format!("{} = VALUES({})", self.quote_ident(c), self.quote_ident(c)))
                        .collect();
                    let _ = write!(out, " ON DUPLICATE KEY UPDATE {}", sets.join(", "));
                }
            }
        }
        out
    }

    /// Builds `DELETE FROM <table> WHERE pk1 = ? AND pk2 = ?` for the `delete` strategy.
    pub fn delete_by_pk_statement(self, table: &str, pks: &[String]) -> String {
        let clauses: Vec<String> = pks
            .iter()
            .enumerate()
            .map(|(i, pk)| format!("{} = {}", self.quote_ident(pk), self.placeholder(i + 1)))
            .collect();
        format!(
            "DELETE FROM {} WHERE {}",
            self.quote_ident(table),
            clauses.join(" AND ")
        )
    }
}
