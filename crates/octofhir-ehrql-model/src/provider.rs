//! Table provider trait

use indexmap::IndexMap;
use octofhir_ehrql_diagnostics::{EHQL0203, EhrqlError, ErrorCode};
use octofhir_ehrql_types::TableSchema;
use serde::{Deserialize, Serialize};

/// What a logical table resolves to in the backend.
///
/// Every variant yields a relation with a `patient_id` column plus one column per
/// schema column, named as in the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableExpression {
    /// A physical table whose columns already match the schema
    Table {
        #[serde(default)]
        schema: Option<String>,
        name: String,
    },
    /// A physical table with renamed columns
    Mapped {
        #[serde(default)]
        schema: Option<String>,
        name: String,
        /// Physical name of the patient identifier column
        patient_id: String,
        /// Logical column name to physical column name
        columns: IndexMap<String, String>,
    },
    /// A query producing the expected columns
    Query { sql: String },
}

impl TableExpression {
    pub fn table(name: impl Into<String>) -> Self {
        Self::Table {
            schema: None,
            name: name.into(),
        }
    }

    pub fn query(sql: impl Into<String>) -> Self {
        Self::Query { sql: sql.into() }
    }
}

/// Resolves logical tables to backend table expressions.
///
/// The compiler never looks inside the returned expression beyond rendering it.
pub trait TableProvider: Send + Sync {
    /// Resolve a table for the given schema
    fn table_expression(
        &self,
        name: &str,
        schema: &TableSchema,
    ) -> Result<TableExpression, ProviderError>;

    /// Provider name for diagnostics
    fn name(&self) -> &str;
}

/// Table provider error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Table '{table}' has no mapping for column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("Invalid table mapping: {0}")]
    InvalidMapping(String),
}

impl ProviderError {
    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        EHQL0203
    }
}

impl From<ProviderError> for EhrqlError {
    fn from(err: ProviderError) -> Self {
        EhrqlError::compilation(err.code(), err.to_string())
    }
}

/// Provider where every logical table is a physical table of the same name
#[derive(Debug, Clone, Default)]
pub struct DirectTableProvider {
    schema: Option<String>,
}

impl DirectTableProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve tables inside a database schema
    pub fn in_schema(schema: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
        }
    }
}

impl TableProvider for DirectTableProvider {
    fn table_expression(
        &self,
        name: &str,
        _schema: &TableSchema,
    ) -> Result<TableExpression, ProviderError> {
        Ok(TableExpression::Table {
            schema: self.schema.clone(),
            name: name.to_string(),
        })
    }

    fn name(&self) -> &str {
        "direct"
    }
}
