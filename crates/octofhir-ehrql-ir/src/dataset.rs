//! Datasets and table catalogs

use indexmap::IndexMap;
use octofhir_ehrql_types::{EhrqlType, PATIENT_ID, TableSchema};

use crate::{Frame, IrResult, QueryModelError, Series};

/// Letters, digits and underscores, starting with a letter
fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A population plus named one-row-per-patient variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    population: Series,
    variables: IndexMap<String, Series>,
}

impl Dataset {
    /// Start a dataset from its population condition
    pub fn new(population: Series) -> IrResult<Self> {
        if population.ty() != &EhrqlType::Bool {
            return Err(QueryModelError::InvalidDataset(format!(
                "population must be a boolean series, found {}",
                population.ty()
            )));
        }
        if !population.is_one_row_per_patient() {
            return Err(QueryModelError::InvalidDataset(
                "population must have one row per patient".to_string(),
            ));
        }
        Ok(Self {
            population,
            variables: IndexMap::new(),
        })
    }

    /// Add a named output column
    pub fn add_variable(&mut self, name: impl Into<String>, series: Series) -> IrResult<()> {
        let name = name.into();
        if !is_valid_variable_name(&name) || name == PATIENT_ID {
            return Err(QueryModelError::InvalidDataset(format!(
                "'{name}' is not a valid variable name"
            )));
        }
        if self.variables.contains_key(&name) {
            return Err(QueryModelError::InvalidDataset(format!(
                "variable '{name}' is already defined"
            )));
        }
        if !series.is_one_row_per_patient() {
            return Err(QueryModelError::InvalidDataset(format!(
                "variable '{name}' must have one row per patient"
            )));
        }
        if series.ty().is_set() {
            return Err(QueryModelError::InvalidDataset(format!(
                "variable '{name}' may not be a set"
            )));
        }
        self.variables.insert(name, series);
        Ok(())
    }

    /// Builder form of `add_variable`
    pub fn with_variable(mut self, name: impl Into<String>, series: Series) -> IrResult<Self> {
        self.add_variable(name, series)?;
        Ok(self)
    }

    pub fn population(&self) -> &Series {
        &self.population
    }

    pub fn variables(&self) -> &IndexMap<String, Series> {
        &self.variables
    }

    /// Population followed by every variable
    pub fn all_series(&self) -> impl Iterator<Item = &Series> {
        std::iter::once(&self.population).chain(self.variables.values())
    }

    /// Rebuild with the same names from already-validated parts
    pub(crate) fn from_parts(population: Series, variables: IndexMap<String, Series>) -> Self {
        Self {
            population,
            variables,
        }
    }
}

/// Explicit registry of the tables a query may select from
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: IndexMap<String, Frame>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, name: String, frame: Frame) -> IrResult<Frame> {
        if self.tables.contains_key(&name) {
            return Err(QueryModelError::DuplicateTable(name));
        }
        log::debug!("Registered table '{}' ({} columns)", name, frame.schema().len());
        self.tables.insert(name, frame.clone());
        Ok(frame)
    }

    /// Register a table with zero or more rows per patient
    pub fn register_event_table(
        &mut self,
        name: impl Into<String>,
        schema: TableSchema,
    ) -> IrResult<Frame> {
        let name = name.into();
        let frame = Frame::select_table(name.clone(), schema);
        self.register(name, frame)
    }

    /// Register a table with at most one row per patient
    pub fn register_patient_table(
        &mut self,
        name: impl Into<String>,
        schema: TableSchema,
    ) -> IrResult<Frame> {
        let name = name.into();
        let frame = Frame::select_patient_table(name.clone(), schema);
        self.register(name, frame)
    }

    pub fn get(&self, name: &str) -> Option<&Frame> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &Frame)> {
        self.tables.iter().map(|(name, frame)| (name.as_str(), frame))
    }
}
