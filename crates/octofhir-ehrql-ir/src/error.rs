//! Query model construction errors

use octofhir_ehrql_diagnostics::{
    EHQL0001, EHQL0002, EHQL0003, EHQL0004, EHQL0005, EHQL0006, EHQL0007, EHQL0008, EHQL0009,
    EHQL0010, EHQL0011, EhrqlError, ErrorCode,
};
use octofhir_ehrql_types::SchemaError;
use thiserror::Error;

/// Result type for query model construction
pub type IrResult<T> = Result<T, QueryModelError>;

/// Errors raised while building IR nodes. These are query-author errors: they are
/// raised immediately and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryModelError {
    /// Many-rows-per-patient values from incompatible lineages were combined
    #[error("Domain mismatch: {0}")]
    DomainMismatch(String),

    /// An operand has the wrong type
    #[error("Type mismatch in {operation}: expected {expected}, found {found}")]
    TypeMismatch {
        operation: String,
        expected: String,
        found: String,
    },

    /// Sort key is not orderable
    #[error("Invalid sort key: {0}")]
    InvalidSort(String),

    /// PickOneRowPerPatient applied to a frame with no Sort in its lineage
    #[error("Cannot pick a row from a frame that has not been sorted")]
    UnsortedPick,

    /// Aggregation over values that are already one row per patient
    #[error("Cannot aggregate {0}: it already has one row per patient")]
    AggregateOfPatientSeries(String),

    /// Column not declared in the table schema
    #[error("Table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    /// Row-level operation applied to a one-row-per-patient frame
    #[error("Cannot {0} a one-row-per-patient frame")]
    PatientFrame(String),

    /// Condition or sort key drawn from a frame derived from the one being transformed
    #[error("Condition comes from a descendant of the frame it is applied to: {0}")]
    DescendantCondition(String),

    /// Dataset definition violates a rule
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),

    /// Table name registered twice in a catalog
    #[error("Table '{0}' is already registered")]
    DuplicateTable(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl QueryModelError {
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

    pub fn domain_mismatch(message: impl Into<String>) -> Self {
        Self::DomainMismatch(message.into())
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DomainMismatch(_) => EHQL0001,
            Self::TypeMismatch { .. } => EHQL0002,
            Self::InvalidSort(_) => EHQL0003,
            Self::UnsortedPick => EHQL0004,
            Self::AggregateOfPatientSeries(_) => EHQL0005,
            Self::UnknownColumn { .. } => EHQL0006,
            Self::PatientFrame(_) => EHQL0007,
            Self::DescendantCondition(_) => EHQL0008,
            Self::InvalidDataset(_) => EHQL0009,
            Self::InvalidLiteral(_) => EHQL0010,
            Self::DuplicateTable(_) => EHQL0011,
            Self::Schema(err) => err.code(),
        }
    }
}

impl From<QueryModelError> for EhrqlError {
    fn from(err: QueryModelError) -> Self {
        match err {
            QueryModelError::Schema(inner) => inner.into(),
            other => EhrqlError::construction(other.code(), other.to_string()),
        }
    }
}
