//! Driver error mappers.
//!
//! Each mapper inspects a raw store error and either returns a categorized
//! `DatabaseError` or `None` when it does not recognise the failure. The
//! mapper list for a driver is tried in order; the first hit wins.

use super::{DatabaseError, ErrorCategory, RepoError};
use crate::context::ContextError;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::ffi;
use rusqlite::ErrorCode;
use std::error::Error;
use std::time::Duration;

/// Maps one raw store error, or reports "no mapping".
pub type ErrorMapper = fn(&(dyn Error + 'static)) -> Option<DatabaseError>;

const SQLITE_MAPPERS: &[ErrorMapper] = &[map_sqlite_error, map_common_error];
const MSSQL_MAPPERS: &[ErrorMapper] = &[map_mssql_error, map_common_error];
const COMMON_MAPPERS: &[ErrorMapper] = &[map_common_error];

/// Returns the ordered mapper list for a driver identifier.
pub fn mappers_for_driver(driver: &str) -> &'static [ErrorMapper] {
    match driver {
        "sqlite" | "sqlite3" => SQLITE_MAPPERS,
        "mssql" | "sqlserver" => MSSQL_MAPPERS,
        _ => COMMON_MAPPERS,
    }
}

/// Maps a raw store error into the category taxonomy.
///
/// Errors that are already categorized pass through unchanged. Anything no
/// mapper recognises becomes a generic retryable "database operation failed".
pub fn map_database_error<E>(err: E, driver: &str) -> DatabaseError
where
    E: Error + Send + Sync + 'static,
{
    let raw: &(dyn Error + 'static) = &err;
    if let Some(existing) = raw.downcast_ref::<DatabaseError>() {
        return existing.clone();
    }
    if let Some(RepoError::Database(existing)) = raw.downcast_ref::<RepoError>() {
        return existing.clone();
    }

    for mapper in mappers_for_driver(driver) {
        if let Some(mapped) = mapper(raw) {
            return mapped.with_source(err);
        }
    }

    DatabaseError::retryable(
        ErrorCategory::Database,
        "DATABASE_ERROR",
        "Database operation failed",
        None,
    )
    .with_source(err)
}

/// Maps `rusqlite` failures using primary and extended result codes.
pub fn map_sqlite_error(err: &(dyn Error + 'static)) -> Option<DatabaseError> {
    let err = err.downcast_ref::<rusqlite::Error>()?;

    let (code, message) = match err {
        rusqlite::Error::QueryReturnedNoRows => return Some(DatabaseError::not_found()),
        rusqlite::Error::SqliteFailure(code, message) => (code, message.as_deref()),
        // Prepare-time failures carry the same code plus the offending offset.
        rusqlite::Error::SqlInputError { error, msg, .. } => (error, Some(msg.as_str())),
        rusqlite::Error::ToSqlConversionFailure(_) => {
            return Some(DatabaseError::non_retryable(
                ErrorCategory::Syntax,
                "INVALID_PARAMETER",
                "Parameter cannot be bound",
            ))
        }
        _ => return None,
    };

    match code.code {
        ErrorCode::ConstraintViolation => Some(map_sqlite_constraint(code.extended_code, message)),
        ErrorCode::DatabaseBusy => Some(DatabaseError::retryable(
            ErrorCategory::Lock,
            "DATABASE_LOCKED",
            "Database is locked",
            Some(Duration::from_millis(100)),
        )),
        ErrorCode::DatabaseLocked => Some(DatabaseError::retryable(
            ErrorCategory::Lock,
            "TABLE_LOCKED",
            "Database table is locked",
            Some(Duration::from_millis(100)),
        )),
        ErrorCode::PermissionDenied
        | ErrorCode::AuthorizationForStatementDenied
        | ErrorCode::ReadOnly => Some(DatabaseError::non_retryable(
            ErrorCategory::Permission,
            "AUTHORIZATION_DENIED",
            "Authorization denied",
        )),
        ErrorCode::CannotOpen | ErrorCode::NotADatabase => Some(DatabaseError::retryable(
            ErrorCategory::Connection,
            "CONNECTION_ERROR",
            "Database connection error",
            None,
        )),
        ErrorCode::OperationInterrupted => Some(DatabaseError::retryable(
            ErrorCategory::Timeout,
            "DATABASE_TIMEOUT",
            "Database operation interrupted",
            Some(Duration::from_millis(2000)),
        )),
        ErrorCode::Unknown => message.and_then(map_sqlite_statement_error),
        _ => None,
    }
}

// SQLITE_ERROR covers every deterministic statement failure; only the text
// tells them apart.
fn map_sqlite_statement_error(message: &str) -> Option<DatabaseError> {
    let (code, text) = if message.contains("syntax error") {
        ("SYNTAX_ERROR", "SQL syntax error")
    } else if message.contains("no such column") {
        ("UNKNOWN_COLUMN", "Unknown column")
    } else if message.contains("no such table") {
        ("UNKNOWN_TABLE", "Unknown table")
    } else if message.contains("too many SQL variables") {
        ("TOO_MANY_PARAMETERS", "Statement exceeds the bound parameter limit")
    } else {
        return None;
    };
    Some(
        DatabaseError::non_retryable(ErrorCategory::Syntax, code, text)
            .with_metadata("detail", message),
    )
}

fn map_sqlite_constraint(extended_code: i32, message: Option<&str>) -> DatabaseError {
    let mapped = match extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            DatabaseError::non_retryable(
                ErrorCategory::Duplicate,
                "DUPLICATE_KEY",
                "Duplicate key value violates unique constraint",
            )
        }
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => DatabaseError::non_retryable(
            ErrorCategory::Constraint,
            "FOREIGN_KEY_VIOLATION",
            "Foreign key constraint violation",
        ),
        ffi::SQLITE_CONSTRAINT_NOTNULL => DatabaseError::non_retryable(
            ErrorCategory::Constraint,
            "NOT_NULL_VIOLATION",
            "Not null constraint violation",
        ),
        ffi::SQLITE_CONSTRAINT_CHECK => DatabaseError::non_retryable(
            ErrorCategory::Constraint,
            "CHECK_CONSTRAINT_VIOLATION",
            "Check constraint violation",
        ),
        _ => DatabaseError::non_retryable(
            ErrorCategory::Constraint,
            "CONSTRAINT_VIOLATION",
            "Constraint violation",
        ),
    };

    match message {
        Some(detail) => mapped.with_metadata("detail", detail),
        None => mapped,
    }
}

struct MessagePattern {
    pattern: Regex,
    build: fn() -> DatabaseError,
}

static MSSQL_PATTERNS: Lazy<Vec<MessagePattern>> = Lazy::new(|| {
    let pattern = |expr: &str| Regex::new(expr).expect("static mssql pattern is valid");
    vec![
        MessagePattern {
            pattern: pattern(r"(?i)duplicate key|unique.*constraint"),
            build: || {
                DatabaseError::non_retryable(
                    ErrorCategory::Duplicate,
                    "DUPLICATE_KEY",
                    "Duplicate key violation",
                )
            },
        },
        MessagePattern {
            pattern: pattern(r"(?i)foreign key.*constraint"),
            build: || {
                DatabaseError::non_retryable(
                    ErrorCategory::Constraint,
                    "FOREIGN_KEY_VIOLATION",
                    "Foreign key constraint violation",
                )
            },
        },
        MessagePattern {
            pattern: pattern(r"(?i)deadlock|was deadlocked"),
            build: || {
                DatabaseError::retryable(
                    ErrorCategory::Lock,
                    "DEADLOCK_DETECTED",
                    "Deadlock detected",
                    Some(Duration::from_millis(500)),
                )
            },
        },
        MessagePattern {
            pattern: pattern(r"(?i)timeout|query timeout"),
            build: || {
                DatabaseError::retryable(
                    ErrorCategory::Timeout,
                    "QUERY_TIMEOUT",
                    "Query timeout",
                    Some(Duration::from_millis(2000)),
                )
            },
        },
        MessagePattern {
            pattern: pattern(r"(?i)permission denied|access denied"),
            build: || {
                DatabaseError::non_retryable(
                    ErrorCategory::Permission,
                    "PERMISSION_DENIED",
                    "Permission denied",
                )
            },
        },
    ]
});

/// Maps SQL Server failures, which only surface as message text.
pub fn map_mssql_error(err: &(dyn Error + 'static)) -> Option<DatabaseError> {
    let message = err.to_string();
    MSSQL_PATTERNS
        .iter()
        .find(|candidate| candidate.pattern.is_match(&message))
        .map(|candidate| (candidate.build)())
}

/// Driver-independent mapping: context expiry and connection-level text.
pub fn map_common_error(err: &(dyn Error + 'static)) -> Option<DatabaseError> {
    if let Some(context_err) = err.downcast_ref::<ContextError>() {
        return Some(match context_err {
            ContextError::DeadlineExceeded => DatabaseError::retryable(
                ErrorCategory::Timeout,
                "DATABASE_TIMEOUT",
                "Database operation timeout",
                Some(Duration::from_millis(2000)),
            ),
            ContextError::Cancelled => DatabaseError::non_retryable(
                ErrorCategory::Timeout,
                "CONTEXT_CANCELED",
                "Operation cancelled by caller",
            ),
        });
    }

    let message = err.to_string().to_ascii_lowercase();
    if message.contains("connection refused") {
        return Some(DatabaseError::retryable(
            ErrorCategory::Connection,
            "CONNECTION_REFUSED",
            "Database connection refused",
            None,
        ));
    }
    if message.contains("timeout") {
        return Some(DatabaseError::retryable(
            ErrorCategory::Timeout,
            "DATABASE_TIMEOUT",
            "Database operation timeout",
            Some(Duration::from_millis(2000)),
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::{map_database_error, mappers_for_driver};
    use crate::context::ContextError;
    use crate::error::{DatabaseError, ErrorCategory, Retryability};
    use std::fmt::{Display, Formatter};
    use std::time::Duration;

    #[derive(Debug)]
    struct DriverMessage(&'static str);

    impl Display for DriverMessage {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for DriverMessage {}

    #[test]
    fn no_rows_maps_to_not_found() {
        let mapped = map_database_error(rusqlite::Error::QueryReturnedNoRows, "sqlite");
        assert_eq!(mapped.category(), ErrorCategory::NotFound);
        assert_eq!(mapped.text_code(), "RECORD_NOT_FOUND");
        assert!(!mapped.is_retryable());
    }

    #[test]
    fn unique_violation_from_real_statement_maps_to_duplicate() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (email TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .expect_err("second insert must violate unique");

        let mapped = map_database_error(err, "sqlite");
        assert_eq!(mapped.category(), ErrorCategory::Duplicate);
        assert_eq!(mapped.text_code(), "DUPLICATE_KEY");
    }

    #[test]
    fn not_null_violation_maps_to_constraint() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT NOT NULL);")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES (NULL)", [])
            .expect_err("null insert must fail");

        let mapped = map_database_error(err, "sqlite");
        assert_eq!(mapped.category(), ErrorCategory::Constraint);
        assert_eq!(mapped.text_code(), "NOT_NULL_VIOLATION");
    }

    #[test]
    fn prepare_failures_are_non_retryable_syntax_errors() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT);").unwrap();

        for (sql, code) in [
            ("SELEC * FROM t", "SYNTAX_ERROR"),
            ("SELECT * FROM t WHERE nope = 1", "UNKNOWN_COLUMN"),
            ("SELECT * FROM missing", "UNKNOWN_TABLE"),
        ] {
            let err = conn.prepare(sql).map(|_| ()).expect_err("statement must not prepare");
            let mapped = map_database_error(err, "sqlite");
            assert_eq!(mapped.category(), ErrorCategory::Syntax, "{sql}");
            assert_eq!(mapped.text_code(), code, "{sql}");
            assert!(!mapped.is_retryable(), "{sql}");
        }
    }

    #[test]
    fn oversized_statements_and_unbindable_values_are_not_retryable() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let placeholders = vec!["?"; 40_000].join(", ");
        let err = conn
            .prepare(&format!("SELECT {placeholders}"))
            .map(|_| ())
            .expect_err("too many variables");
        let mapped = map_database_error(err, "sqlite");
        assert_eq!(mapped.text_code(), "TOO_MANY_PARAMETERS");
        assert!(!mapped.is_retryable());

        let err = conn
            .query_row("SELECT ?", [crate::model::Value::UInt(u64::MAX)], |row| {
                row.get::<_, i64>(0)
            })
            .expect_err("u64 above i64::MAX cannot bind");
        let mapped = map_database_error(err, "sqlite");
        assert_eq!(mapped.category(), ErrorCategory::Syntax);
        assert_eq!(mapped.text_code(), "INVALID_PARAMETER");
        assert!(!mapped.is_retryable());
    }

    #[test]
    fn already_categorized_errors_pass_through() {
        let original = DatabaseError::expected_count(1, 0);
        let mapped = map_database_error(original, "sqlite");
        assert_eq!(mapped.category(), ErrorCategory::ExpectedCount);
        assert_eq!(mapped.text_code(), "EXPECTED_COUNT_VIOLATION");
    }

    #[test]
    fn unknown_errors_fall_back_to_generic_retryable() {
        let mapped = map_database_error(DriverMessage("disk quota exceeded"), "postgres");
        assert_eq!(mapped.category(), ErrorCategory::Database);
        assert_eq!(mapped.text_code(), "DATABASE_ERROR");
        assert!(mapped.is_retryable());
    }

    #[test]
    fn mssql_patterns_cover_duplicates_and_deadlocks() {
        let duplicate = map_database_error(
            DriverMessage("Cannot insert duplicate key row in object 'dbo.users'"),
            "mssql",
        );
        assert_eq!(duplicate.category(), ErrorCategory::Duplicate);

        let deadlock = map_database_error(
            DriverMessage("Transaction (Process ID 52) was deadlocked on lock resources"),
            "sqlserver",
        );
        assert_eq!(deadlock.category(), ErrorCategory::Lock);
        assert_eq!(
            deadlock.retryability(),
            Retryability::Retryable {
                backoff: Some(Duration::from_millis(500))
            }
        );
    }

    #[test]
    fn context_deadline_maps_to_timeout() {
        let mapped = map_database_error(ContextError::DeadlineExceeded, "sqlite");
        assert_eq!(mapped.category(), ErrorCategory::Timeout);
        assert!(mapped.is_retryable());

        let cancelled = map_database_error(ContextError::Cancelled, "sqlite");
        assert_eq!(cancelled.category(), ErrorCategory::Timeout);
        assert!(!cancelled.is_retryable());
    }

    #[test]
    fn unknown_driver_only_uses_common_mapper() {
        assert_eq!(mappers_for_driver("oracle").len(), 1);
        assert_eq!(mappers_for_driver("sqlite3").len(), 2);
    }
}
