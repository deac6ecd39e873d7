//! Maps dialect-specific driver errors onto a canonical [`ErrorKind`] taxonomy.
//!
//! The teacher has no equivalent of this module (`database.rs::DbError` is a flat message
//! string); classification is new, but dispatches through the same three driver crates the
//! teacher already links (`tokio-postgres`, `rusqlite`) plus `mysql` for the new dialect.

use std::fmt;

/// Canonical, dialect-independent error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    NotFound,
    DataTooLong,
    NumericOverflow,
    InvalidTextRepresentation,
}

impl ErrorKind {
    /// Canonical lowercase name, as written in `Expected Error` blocks.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UniqueViolation => "unique violation",
            ErrorKind::ForeignKeyViolation => "foreign key violation",
            ErrorKind::NotNullViolation => "not null violation",
            ErrorKind::CheckViolation => "check violation",
            ErrorKind::NotFound => "not found",
            ErrorKind::DataTooLong => "data too long",
            ErrorKind::NumericOverflow => "numeric overflow",
            ErrorKind::InvalidTextRepresentation => "invalid text representation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalizes an arbitrary error-type string the way the parser does for `Expected Error`
/// blocks: lowercase, `_`/`-` become spaces, whitespace collapsed.
pub fn normalize_error_text(s: &str) -> String {
    let replaced: String = s
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect();
    replaced
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a normalized error-type string into an [`ErrorKind`].
pub fn parse_error_kind(s: &str) -> Option<ErrorKind> {
    match normalize_error_text(s).as_str() {
        "unique violation" => Some(ErrorKind::UniqueViolation),
        "foreign key violation" => Some(ErrorKind::ForeignKeyViolation),
        "not null violation" => Some(ErrorKind::NotNullViolation),
        "check violation" => Some(ErrorKind::CheckViolation),
        "not found" => Some(ErrorKind::NotFound),
        "data too long" => Some(ErrorKind::DataTooLong),
        "numeric overflow" => Some(ErrorKind::NumericOverflow),
        "invalid text representation" => Some(ErrorKind::InvalidTextRepresentation),
        _ => None,
    }
}

/// Classifies a PostgreSQL error by its SQLSTATE code.
pub fn classify_postgres(err: &tokio_postgres::Error) -> Option<ErrorKind> {
    let code = err.code()?.code();
    classify_postgres_sqlstate(code)
}

fn classify_postgres_sqlstate(code: &str) -> Option<ErrorKind> {
    match code {
        "23505" => Some(ErrorKind::UniqueViolation),
        "23503" => Some(ErrorKind::ForeignKeyViolation),
        "23502" => Some(ErrorKind::NotNullViolation),
        "23514" => Some(ErrorKind::CheckViolation),
        "22001" => Some(ErrorKind::DataTooLong),
        "22003" => Some(ErrorKind::NumericOverflow),
        "22P02" => Some(ErrorKind::InvalidTextRepresentation),
        _ => None,
    }
}

/// Classifies a MySQL error by its numeric error code.
pub fn classify_mysql(err: &mysql::Error) -> Option<ErrorKind> {
    let mysql::Error::MySqlError(inner) = err else {
        return None;
    };
    classify_mysql_code(inner.code)
}

fn classify_mysql_code(code: u16) -> Option<ErrorKind> {
    match code {
        1062 => Some(ErrorKind::UniqueViolation),
        1451 | 1452 => Some(ErrorKind::ForeignKeyViolation),
        1048 | 1364 => Some(ErrorKind::NotNullViolation),
        3819 => Some(ErrorKind::CheckViolation),
        1406 => Some(ErrorKind::DataTooLong),
        1264 | 1690 => Some(ErrorKind::NumericOverflow),
        1265 | 1366 => Some(ErrorKind::InvalidTextRepresentation),
        _ => None,
    }
}

/// Classifies a SQLite error by its primary and extended result codes.
pub fn classify_sqlite(err: &rusqlite::Error) -> Option<ErrorKind> {
    if let rusqlite::Error::SqliteFailure(sqlite_err, _) = err {
        use rusqlite::ErrorCode;
        return match sqlite_err.code {
            ErrorCode::ConstraintViolation => classify_sqlite_extended(sqlite_err.extended_code),
            ErrorCode::TypeMismatch => Some(ErrorKind::InvalidTextRepresentation),
            ErrorCode::TooBig => Some(ErrorKind::DataTooLong),
            _ => None,
        };
    }
    None
}

fn classify_sqlite_extended(extended: i32) -> Option<ErrorKind> {
    // Extended result codes, see sqlite3.h: SQLITE_CONSTRAINT_* family.
    match extended {
        2067 /* SQLITE_CONSTRAINT_UNIQUE */ | 1555 /* SQLITE_CONSTRAINT_PRIMARYKEY */ => {
            Some(ErrorKind::UniqueViolation)
        }
        787 /* SQLITE_CONSTRAINT_FOREIGNKEY */ => Some(ErrorKind::ForeignKeyViolation),
        1299 /* SQLITE_CONSTRAINT_NOTNULL */ => Some(ErrorKind::NotNullViolation),
        275 /* SQLITE_CONSTRAINT_CHECK */ => Some(ErrorKind::CheckViolation),
        _ => None,
    }
}

/// Message-substring fallback used when no structured driver error is available (e.g. after the
/// error has already been flattened to text).
pub fn classify_message(message: &str) -> Option<ErrorKind> {
    let lower = message.to_lowercase();
    if lower.contains("not found") || lower.contains("no rows") {
        return Some(ErrorKind::NotFound);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_error_text() {
        assert_eq!(normalize_error_text("Unique_Violation"), "unique violation");
        assert_eq!(normalize_error_text("foreign-key violation"), "foreign key violation");
        assert_eq!(normalize_error_text("  check   violation "), "check violation");
    }

    #[test]
    fn parses_known_kinds() {
        assert_eq!(parse_error_kind("unique_violation"), Some(ErrorKind::UniqueViolation));
        assert_eq!(parse_error_kind("bogus"), None);
    }

    #[test]
    fn postgres_sqlstate_mapping() {
        assert_eq!(classify_postgres_sqlstate("23505"), Some(ErrorKind::UniqueViolation));
        assert_eq!(classify_postgres_sqlstate("22P02"), Some(ErrorKind::InvalidTextRepresentation));
        assert_eq!(classify_postgres_sqlstate("00000"), None);
    }

    #[test]
    fn mysql_code_mapping() {
        assert_eq!(classify_mysql_code(1062), Some(ErrorKind::UniqueViolation));
        assert_eq!(classify_mysql_code(1451), Some(ErrorKind::ForeignKeyViolation));
        assert_eq!(classify_mysql_code(9999), None);
    }

    #[test]
    fn sqlite_extended_mapping() {
        assert_eq!(classify_sqlite_extended(2067), Some(ErrorKind::UniqueViolation));
        assert_eq!(classify_sqlite_extended(787), Some(ErrorKind::ForeignKeyViolation));
    }

    #[test]
    fn sqlite_mismatch_and_toobig_mapping() {
        let mismatch = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(20), None);
        assert_eq!(classify_sqlite(&mismatch), Some(ErrorKind::InvalidTextRepresentation));

        let toobig = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(18), None);
        assert_eq!(classify_sqlite(&toobig), Some(ErrorKind::DataTooLong));
    }

    #[test]
    fn message_fallback() {
        assert_eq!(classify_message("row not found"), Some(ErrorKind::NotFound));
        assert_eq!(classify_message("syntax error"), None);
    }
}
