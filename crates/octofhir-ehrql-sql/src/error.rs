//! SQL engine errors

use octofhir_ehrql_diagnostics::{
    EHQL0200, EHQL0201, EHQL0202, EHQL0204, EHQL0300, EHQL0301, EHQL0302, EHQL0303, EHQL0304,
    EhrqlError, ErrorCode,
};
use octofhir_ehrql_ir::QueryModelError;
use octofhir_ehrql_model::ProviderError;
use std::fmt;
use thiserror::Error;

/// Result type for compilation
pub type CompileResult<T> = Result<T, SqlError>;

/// Result type for execution
pub type ExecResult<T> = Result<T, ExecutionError>;

/// Errors raised while compiling a dataset to SQL
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SqlError {
    /// The dialect has no implementation for an operation
    #[error("{operation} is not supported by the {dialect} dialect")]
    Unsupported { dialect: String, operation: String },

    #[error("Unknown dialect: {0}")]
    UnknownDialect(String),

    /// Broken invariant; the IR should never allow this
    #[error("Internal compiler error: {0}")]
    Internal(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    QueryModel(#[from] QueryModelError),
}

impl SqlError {
    pub fn unsupported(dialect: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            dialect: dialect.into(),
            operation: operation.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unsupported { .. } => EHQL0200,
            Self::UnknownDialect(_) => EHQL0201,
            Self::Internal(_) => EHQL0202,
            Self::Config(_) => EHQL0204,
            Self::Provider(err) => err.code(),
            Self::QueryModel(err) => err.code(),
        }
    }
}

impl From<SqlError> for EhrqlError {
    fn from(err: SqlError) -> Self {
        match err {
            SqlError::QueryModel(inner) => inner.into(),
            SqlError::Provider(inner) => inner.into(),
            SqlError::Unsupported { ref dialect, .. } => {
                let dialect = dialect.clone();
                EhrqlError::compilation(err.code(), err.to_string()).with_dialect(dialect)
            }
            other => EhrqlError::compilation(other.code(), other.to_string()),
        }
    }
}

/// Whether a database error is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// Connection drops, lock timeouts and similar operational failures
    Transient,
    /// Malformed SQL, missing objects and other errors that will recur
    Permanent,
}

impl fmt::Display for DatabaseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error reported by a database connection
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} database error: {message}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub message: String,
}

impl DatabaseError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: DatabaseErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: DatabaseErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == DatabaseErrorKind::Transient
    }
}

/// Errors raised while running compiled statements
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: DatabaseError },

    /// Every row of a full batch shares one key, so paging cannot advance
    #[error("Batch size {batch_size} is too small: more rows than that share key {key}")]
    BatchSizeTooSmall { batch_size: usize, key: String },

    /// A result value could not be decoded to the declared type
    #[error("Unexpected value for '{column}': expected {expected}, found {found}")]
    UnexpectedValue {
        column: String,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Compile(#[from] SqlError),
}

impl ExecutionError {
    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Database(err) if err.is_transient() => EHQL0300,
            Self::Database(_) => EHQL0301,
            Self::RetriesExhausted { .. } => EHQL0302,
            Self::BatchSizeTooSmall { .. } => EHQL0303,
            Self::UnexpectedValue { .. } => EHQL0304,
            Self::Compile(err) => err.code(),
        }
    }
}

impl From<ExecutionError> for EhrqlError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Compile(inner) => inner.into(),
            ExecutionError::Database(ref inner) => {
                EhrqlError::execution(err.code(), err.to_string(), inner.is_transient())
            }
            other => EhrqlError::execution(other.code(), other.to_string(), false),
        }
    }
}
