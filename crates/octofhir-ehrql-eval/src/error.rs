//! Evaluation errors for the in-memory engine

use octofhir_ehrql_diagnostics::{
    EHQL0011, EHQL0103, EHQL0400, EHQL0401, EHQL0402, EhrqlError, ErrorCode,
};
use octofhir_ehrql_ir::QueryModelError;
use octofhir_ehrql_types::SchemaError;
use thiserror::Error;

/// Result type for evaluation operations
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors that can occur while loading data or evaluating a dataset
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// A query selected a table the database does not hold
    #[error("Unknown table in database: {0}")]
    UnknownTable(String),

    #[error("Table '{0}' is already defined")]
    DuplicateTable(String),

    /// A one-row-per-patient table received a second row for a patient
    #[error("Table '{table}' already has a row for patient {patient_id}")]
    DuplicatePatient { table: String, patient_id: i64 },

    /// A many-rows series has no value for a row of its own domain
    #[error("Row mismatch between columns: {0}")]
    RowMismatch(String),

    /// Operand types the query model should have rejected
    #[error("Type mismatch in {operation}: expected {expected}, found {found}")]
    TypeMismatch {
        operation: String,
        expected: String,
        found: String,
    },

    /// Internal error (should not happen)
    #[error("Internal evaluation error: {0}")]
    Internal(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    QueryModel(#[from] QueryModelError),
}

impl EvalError {
    /// Create a type mismatch error
    pub fn type_mismatch(
        operation: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            operation: operation.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownTable(_) => EHQL0400,
            Self::DuplicateTable(_) => EHQL0011,
            Self::DuplicatePatient { .. } => EHQL0103,
            Self::RowMismatch(_) => EHQL0401,
            Self::TypeMismatch { .. } | Self::Internal(_) => EHQL0402,
            Self::Schema(err) => err.code(),
            Self::QueryModel(err) => err.code(),
        }
    }
}

impl From<EvalError> for EhrqlError {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::Schema(inner) => inner.into(),
            EvalError::QueryModel(inner) => inner.into(),
            EvalError::DuplicateTable(_) => EhrqlError::construction(err.code(), err.to_string()),
            EvalError::DuplicatePatient { .. } => {
                EhrqlError::validation(err.code(), err.to_string())
            }
            other => EhrqlError::evaluation(other.code(), other.to_string()),
        }
    }
}
