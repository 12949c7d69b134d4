//! Mapped table provider
//!
//! Holds explicit logical-to-backend table mappings. Mappings are registered at
//! startup (in code or from a JSON document) and read concurrently afterwards.

use indexmap::IndexMap;
use octofhir_ehrql_types::TableSchema;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::provider::{ProviderError, TableExpression, TableProvider};

/// Provider backed by an explicit mapping table
#[derive(Clone, Default)]
pub struct MappedTableProvider {
    mappings: Arc<RwLock<IndexMap<String, TableExpression>>>,
    fallback_to_direct: bool,
}

impl MappedTableProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve unmapped tables to physical tables of the same name
    pub fn with_direct_fallback(mut self) -> Self {
        self.fallback_to_direct = true;
        self
    }

    /// Load mappings from a JSON object of `name -> TableExpression`
    pub fn from_json(json: &str) -> Result<Self, ProviderError> {
        let mappings: IndexMap<String, TableExpression> = serde_json::from_str(json)
            .map_err(|e| ProviderError::InvalidMapping(e.to_string()))?;
        let provider = Self::new();
        for (name, expression) in mappings {
            provider.register(name, expression);
        }
        Ok(provider)
    }

    /// Register (or replace) the mapping for a logical table
    pub fn register(&self, name: impl Into<String>, expression: TableExpression) {
        let name = name.into();
        log::debug!("Mapped table '{}' to {:?}", name, expression);
        self.mappings.write().insert(name, expression);
    }

    pub fn is_mapped(&self, name: &str) -> bool {
        self.mappings.read().contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.mappings.read().keys().cloned().collect()
    }
}

impl TableProvider for MappedTableProvider {
    fn table_expression(
        &self,
        name: &str,
        schema: &TableSchema,
    ) -> Result<TableExpression, ProviderError> {
        let mappings = self.mappings.read();
        let Some(expression) = mappings.get(name) else {
            if self.fallback_to_direct {
                return Ok(TableExpression::table(name));
            }
            return Err(ProviderError::UnknownTable(name.to_string()));
        };
        if let TableExpression::Mapped { columns, .. } = expression {
            if let Some(missing) = schema.column_names().find(|c| !columns.contains_key(*c)) {
                return Err(ProviderError::MissingColumn {
                    table: name.to_string(),
                    column: missing.to_string(),
                });
            }
        }
        Ok(expression.clone())
    }

    fn name(&self) -> &str {
        "mapped"
    }
}
