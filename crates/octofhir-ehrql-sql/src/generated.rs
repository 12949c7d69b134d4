//! Intermediate tables created while running a dataset
//!
//! A `GeneratedTable` is a named relation defined by a query or by literal rows.
//! Its `ReifyMode` decides whether it becomes a real table (with setup and
//! cleanup statements) or is inlined into whatever reads it.

use octofhir_ehrql_types::{EhrqlType, PATIENT_ID, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::sql_ast::{Query, TableRef};

/// How an intermediate result is made available to later queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReifyMode {
    /// Session-scoped temporary table
    TempTable,
    /// Ordinary table with a globally unique name, visible to other sessions
    CreateTableAs,
    /// Named `WITH` clause on every statement that reads it
    Cte,
    /// Inline derived table
    Subquery,
}

impl ReifyMode {
    /// Whether the mode needs create/drop statements
    pub fn is_materialized(&self) -> bool {
        matches!(self, Self::TempTable | Self::CreateTableAs)
    }
}

impl fmt::Display for ReifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TempTable => write!(f, "temporary table"),
            Self::CreateTableAs => write!(f, "CREATE TABLE AS"),
            Self::Cte => write!(f, "common table expression"),
            Self::Subquery => write!(f, "subquery"),
        }
    }
}

/// Contents of a generated table
#[derive(Debug, Clone, PartialEq)]
pub enum TableDefinition {
    Query(Query),
    /// Literal rows, one value per declared column
    Rows(Vec<Vec<Value>>),
}

#[derive(Debug)]
pub struct GeneratedTable {
    name: String,
    /// Name as printed in DDL and FROM clauses, e.g. `#tmp_1` on SQL Server
    physical_name: String,
    schema: Option<String>,
    columns: Vec<(String, EhrqlType)>,
    definition: TableDefinition,
    mode: ReifyMode,
}

impl GeneratedTable {
    pub fn new(
        name: impl Into<String>,
        physical_name: impl Into<String>,
        schema: Option<String>,
        columns: Vec<(String, EhrqlType)>,
        definition: TableDefinition,
        mode: ReifyMode,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            physical_name: physical_name.into(),
            schema,
            columns,
            definition,
            mode,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn physical_name(&self) -> &str {
        &self.physical_name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn columns(&self) -> &[(String, EhrqlType)] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    pub fn mode(&self) -> ReifyMode {
        self.mode
    }

    pub fn has_patient_id(&self) -> bool {
        self.column_names().any(|c| c == PATIENT_ID)
    }

    /// Generated tables the definition reads
    pub fn dependencies(&self) -> Vec<Arc<GeneratedTable>> {
        match &self.definition {
            TableDefinition::Query(query) => query
                .referenced_tables()
                .into_iter()
                .filter(|t| t.name() != self.name)
                .collect(),
            TableDefinition::Rows(_) => Vec::new(),
        }
    }

    /// Statements that create and populate the table; empty for inlined modes
    pub fn setup_statements(
        self: &Arc<Self>,
        config: &EngineConfig,
        index_patient_id: bool,
    ) -> Vec<Statement> {
        if !self.mode.is_materialized() {
            return Vec::new();
        }
        let mut statements = match &self.definition {
            TableDefinition::Query(query) => vec![Statement::CreateTableAs {
                table: self.clone(),
                query: query.clone(),
            }],
            TableDefinition::Rows(rows) => {
                let mut statements = vec![Statement::CreateTable {
                    table: self.clone(),
                }];
                for chunk in rows.chunks(config.insert_batch_size.max(1)) {
                    statements.push(Statement::Insert {
                        table: self.clone(),
                        rows: chunk.to_vec(),
                    });
                }
                statements
            }
        };
        if index_patient_id && self.has_patient_id() {
            statements.push(Statement::CreateIndex {
                table: self.clone(),
                column: PATIENT_ID.to_string(),
            });
        }
        statements
    }

    /// Statements that drop the table; empty for inlined modes
    pub fn cleanup_statements(self: &Arc<Self>) -> Vec<Statement> {
        if self.mode.is_materialized() {
            vec![Statement::DropTable { table: self.clone() }]
        } else {
            Vec::new()
        }
    }

    pub fn to_ref(self: &Arc<Self>) -> TableRef {
        TableRef::Generated(self.clone())
    }
}

// Names are unique per engine, so they identify the table
impl PartialEq for GeneratedTable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for GeneratedTable {}

impl Hash for GeneratedTable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// A statement sent to the database
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTableAs {
        table: Arc<GeneratedTable>,
        query: Query,
    },
    CreateTable {
        table: Arc<GeneratedTable>,
    },
    Insert {
        table: Arc<GeneratedTable>,
        rows: Vec<Vec<Value>>,
    },
    CreateIndex {
        table: Arc<GeneratedTable>,
        column: String,
    },
    DropTable {
        table: Arc<GeneratedTable>,
    },
    Query(Query),
}

impl Statement {
    /// Every generated table the statement touches, including a DDL target
    pub fn referenced_tables(&self) -> Vec<Arc<GeneratedTable>> {
        match self {
            Self::CreateTableAs { table, query } => {
                let mut tables = vec![table.clone()];
                for dependency in query.referenced_tables() {
                    if !tables.contains(&dependency) {
                        tables.push(dependency);
                    }
                }
                tables
            }
            Self::CreateTable { table }
            | Self::Insert { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropTable { table } => vec![table.clone()],
            Self::Query(query) => query.referenced_tables(),
        }
    }

    /// Query whose rows the statement returns or stores
    pub fn query(&self) -> Option<&Query> {
        match self {
            Self::CreateTableAs { query, .. } | Self::Query(query) => Some(query),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn inline(mode: ReifyMode, rows: usize) -> Arc<GeneratedTable> {
        GeneratedTable::new(
            "tmp_1",
            "tmp_1",
            None,
            vec![
                (PATIENT_ID.to_string(), EhrqlType::Int),
                ("value".to_string(), EhrqlType::Str),
            ],
            TableDefinition::Rows(
                (0..rows)
                    .map(|i| vec![Value::Int(i as i64), Value::str("x")])
                    .collect(),
            ),
            mode,
        )
    }

    #[test]
    fn test_rows_are_inserted_in_batches() {
        let config = EngineConfig {
            insert_batch_size: 2,
            ..EngineConfig::default()
        };
        let statements = inline(ReifyMode::TempTable, 5).setup_statements(&config, true);
        let inserts = statements
            .iter()
            .filter(|s| matches!(s, Statement::Insert { .. }))
            .count();
        assert_eq!(inserts, 3);
        assert!(matches!(statements[0], Statement::CreateTable { .. }));
        assert!(matches!(statements.last(), Some(Statement::CreateIndex { .. })));
    }

    #[test]
    fn test_inlined_modes_have_no_ddl() {
        let table = inline(ReifyMode::Cte, 2);
        assert!(table.setup_statements(&EngineConfig::default(), true).is_empty());
        assert!(table.cleanup_statements().is_empty());
    }

    #[test]
    fn test_insert_references_its_own_table() {
        let table = inline(ReifyMode::TempTable, 1);
        let statements = table.setup_statements(&EngineConfig::default(), false);
        for statement in &statements {
            assert_eq!(statement.referenced_tables(), vec![table.clone()]);
        }
        assert!(table.dependencies().is_empty());
    }
}
