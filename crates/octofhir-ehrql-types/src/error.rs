//! Schema and value validation errors

use octofhir_ehrql_diagnostics::{
    EHQL0010, EHQL0100, EHQL0101, EHQL0102, EHQL0103, EhrqlError, ErrorCode,
};
use thiserror::Error;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while validating values against types and schemas
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// A value violated a column constraint
    #[error("Column '{column}': {message}")]
    ConstraintViolation { column: String, message: String },

    /// A value does not conform to the declared type
    #[error("Expected value of type {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// Malformed schema declaration
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Row arity does not match the schema
    #[error("Row has {found} values but the schema declares {expected} columns")]
    InvalidRow { expected: usize, found: usize },

    /// Literal that cannot be represented (e.g. null inside a set)
    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),
}

impl SchemaError {
    pub fn constraint(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConstraintViolation { .. } => EHQL0100,
            Self::TypeMismatch { .. } => EHQL0101,
            Self::InvalidSchema(_) => EHQL0102,
            Self::InvalidRow { .. } => EHQL0103,
            Self::InvalidLiteral(_) => EHQL0010,
        }
    }
}

impl From<SchemaError> for EhrqlError {
    fn from(err: SchemaError) -> Self {
        match &err {
            SchemaError::ConstraintViolation { column, .. } => {
                EhrqlError::validation(err.code(), err.to_string()).with_column(column.clone())
            }
            SchemaError::InvalidLiteral(_) => EhrqlError::construction(err.code(), err.to_string()),
            _ => EhrqlError::validation(err.code(), err.to_string()),
        }
    }
}
