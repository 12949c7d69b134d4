//! In-memory table storage
//!
//! Tables are declared from the same frames queries select from, so the stored
//! schema is always the one the query model validated against. Every inserted
//! row is checked against that schema.

use indexmap::IndexMap;
use octofhir_ehrql_ir::{Frame, FrameKind};
use octofhir_ehrql_types::{TableSchema, Value};
use std::collections::BTreeSet;

use crate::error::{EvalError, EvalResult};

/// One stored row; its position in the table is its row id
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub patient_id: i64,
    pub values: Vec<Value>,
}

/// A table and its rows, in insertion order
#[derive(Debug, Clone)]
pub struct TableData {
    name: String,
    schema: TableSchema,
    one_row_per_patient: bool,
    rows: Vec<TableRow>,
}

impl TableData {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn is_patient_table(&self) -> bool {
        self.one_row_per_patient
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    /// Position of a column within each row's values
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.column_names().position(|column| column == name)
    }

    pub fn patient_ids(&self) -> BTreeSet<i64> {
        self.rows.iter().map(|row| row.patient_id).collect()
    }
}

/// Database of named tables for the in-memory engine
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    tables: IndexMap<String, TableData>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the table a table-selection frame reads from
    pub fn add_table(&mut self, frame: &Frame) -> EvalResult<()> {
        let (name, schema, one_row_per_patient) = match frame.kind() {
            FrameKind::SelectTable { name, schema } => (name, schema, false),
            FrameKind::SelectPatientTable { name, schema } => (name, schema, true),
            _ => {
                return Err(EvalError::internal(
                    "only table-selection frames can be stored",
                ));
            }
        };
        if self.tables.contains_key(name) {
            return Err(EvalError::DuplicateTable(name.clone()));
        }
        log::debug!("Declared in-memory table '{}'", name);
        self.tables.insert(
            name.clone(),
            TableData {
                name: name.clone(),
                schema: schema.clone(),
                one_row_per_patient,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Append one row, validating it against the table's schema
    pub fn insert(
        &mut self,
        table: &str,
        patient_id: i64,
        values: impl IntoIterator<Item = Value>,
    ) -> EvalResult<()> {
        let data = self
            .tables
            .get_mut(table)
            .ok_or_else(|| EvalError::UnknownTable(table.to_string()))?;
        let values: Vec<Value> = values.into_iter().collect();
        data.schema.validate_row(&values)?;
        if data.one_row_per_patient && data.rows.iter().any(|row| row.patient_id == patient_id) {
            return Err(EvalError::DuplicatePatient {
                table: table.to_string(),
                patient_id,
            });
        }
        data.rows.push(TableRow { patient_id, values });
        Ok(())
    }

    /// Declare a table and load its rows in one step
    pub fn with_table(
        mut self,
        frame: &Frame,
        rows: impl IntoIterator<Item = (i64, Vec<Value>)>,
    ) -> EvalResult<Self> {
        self.add_table(frame)?;
        let name = frame.table_name().unwrap_or_default().to_string();
        for (patient_id, values) in rows {
            self.insert(&name, patient_id, values)?;
        }
        Ok(self)
    }

    pub fn table(&self, name: &str) -> EvalResult<&TableData> {
        self.tables
            .get(name)
            .ok_or_else(|| EvalError::UnknownTable(name.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableData> {
        self.tables.values()
    }

    /// Every patient with a row in any table
    pub fn patient_ids(&self) -> BTreeSet<i64> {
        self.tables
            .values()
            .flat_map(|table| table.rows.iter().map(|row| row.patient_id))
            .collect()
    }
}
