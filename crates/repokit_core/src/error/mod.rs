//! Error taxonomy for repository operations.
//!
//! # Responsibility
//! - Define the category/retryability axes every store failure is mapped to.
//! - Expose category predicates so callers never branch on message text.
//!
//! # Invariants
//! - Raw store errors are mapped exactly once, at the repository boundary.
//! - An already-categorized `DatabaseError` is never re-wrapped.
//!
//! # See also
//! - `error::mapping` for per-driver mappers.

use crate::mapping::PatchError;
use crate::model::DescriptorError;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

mod mapping;

pub use mapping::{
    map_common_error, map_database_error, map_mssql_error, map_sqlite_error, mappers_for_driver,
    ErrorMapper,
};

pub type RepoResult<T> = Result<T, RepoError>;

/// Failure category attached to every mapped store error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unmapped store failure.
    Database,
    NotFound,
    Duplicate,
    Constraint,
    Connection,
    Timeout,
    Lock,
    Permission,
    Syntax,
    /// A statement touched a different number of rows than required.
    ExpectedCount,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::NotFound => "database_not_found",
            Self::Duplicate => "database_duplicate",
            Self::Constraint => "database_constraint",
            Self::Connection => "database_connection",
            Self::Timeout => "database_timeout",
            Self::Lock => "database_lock",
            Self::Permission => "database_permission",
            Self::Syntax => "database_syntax",
            Self::ExpectedCount => "database_expected_count",
        }
    }
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the caller may retry the failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    NonRetryable,
    Retryable { backoff: Option<Duration> },
}

impl Retryability {
    pub fn after_millis(millis: u64) -> Self {
        Self::Retryable {
            backoff: Some(Duration::from_millis(millis)),
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

/// Categorized store failure.
///
/// Built by the driver mappers; carries a stable text code (`DUPLICATE_KEY`,
/// `RECORD_NOT_FOUND`, ...) and optional metadata such as the violated
/// constraint.
#[derive(Debug, Clone)]
pub struct DatabaseError {
    category: ErrorCategory,
    retry: Retryability,
    text_code: &'static str,
    message: String,
    metadata: BTreeMap<String, String>,
    source: Option<Arc<dyn Error + Send + Sync + 'static>>,
}

impl DatabaseError {
    pub fn non_retryable(
        category: ErrorCategory,
        text_code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            retry: Retryability::NonRetryable,
            text_code,
            message: message.into(),
            metadata: BTreeMap::new(),
            source: None,
        }
    }

    pub fn retryable(
        category: ErrorCategory,
        text_code: &'static str,
        message: impl Into<String>,
        backoff: Option<Duration>,
    ) -> Self {
        Self {
            category,
            retry: Retryability::Retryable { backoff },
            text_code,
            message: message.into(),
            metadata: BTreeMap::new(),
            source: None,
        }
    }

    /// Generic not-found error used when a lookup produced no row.
    pub fn not_found() -> Self {
        Self::non_retryable(ErrorCategory::NotFound, "RECORD_NOT_FOUND", "Record not found")
    }

    pub fn expected_count(expected: u64, actual: u64) -> Self {
        Self::non_retryable(
            ErrorCategory::ExpectedCount,
            "EXPECTED_COUNT_VIOLATION",
            format!("SQL expected count violation: expected {expected} row(s), got {actual}"),
        )
        .with_metadata("expected", expected.to_string())
        .with_metadata("actual", actual.to_string())
    }

    /// Query rejected before reaching the store (bad identifier, operator, ...).
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::non_retryable(ErrorCategory::Syntax, "INVALID_QUERY", message)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn retryability(&self) -> Retryability {
        self.retry
    }

    pub fn is_retryable(&self) -> bool {
        self.retry.is_retryable()
    }

    pub fn text_code(&self) -> &'static str {
        self.text_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

impl Display for DatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.message, self.text_code)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl Error for DatabaseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn Error + 'static))
    }
}

/// One offending field of a validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Structured configuration/validation failure listing every offender.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}: {}", format_field_errors(.fields))]
pub struct ValidationError {
    pub message: String,
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, fields: Vec<FieldError>) -> Self {
        Self {
            message: message.into(),
            fields,
        }
    }
}

fn format_field_errors(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|field| format!("{}: {}", field.field, field.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Crate-wide error returned by every repository operation.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("invalid persisted data in `{table}.{column}`: {message}")]
    InvalidData {
        table: &'static str,
        column: String,
        message: String,
    },
}

impl RepoError {
    /// Category of a mapped store error; `None` for non-store failures.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Database(err) => Some(err.category()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == Some(ErrorCategory::NotFound)
    }

    pub fn is_duplicate(&self) -> bool {
        self.category() == Some(ErrorCategory::Duplicate)
    }

    /// Duplicate keys count as constraint violations too.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self.category(),
            Some(ErrorCategory::Constraint | ErrorCategory::Duplicate)
        )
    }

    pub fn is_expected_count_violation(&self) -> bool {
        self.category() == Some(ErrorCategory::ExpectedCount)
    }

    pub fn is_connection_error(&self) -> bool {
        self.category() == Some(ErrorCategory::Connection)
    }

    pub fn is_timeout(&self) -> bool {
        self.category() == Some(ErrorCategory::Timeout)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(err) => err.is_retryable(),
            _ => false,
        }
    }

    pub fn as_database(&self) -> Option<&DatabaseError> {
        match self {
            Self::Database(err) => Some(err),
            _ => None,
        }
    }
}

/// Lets `Database::run_in_tx` closures return `RepoResult`.
impl From<rusqlite::Error> for RepoError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(map_database_error(err, crate::db::SQLITE_DRIVER))
    }
}
