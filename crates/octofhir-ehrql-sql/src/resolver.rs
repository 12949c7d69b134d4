//! Orders the setup and cleanup of generated tables around statements
//!
//! Generated tables form a DAG: each table depends on the tables its
//! definition reads. A table is created after everything it depends on and
//! dropped before anything it depends on. Depth is the longest path from a
//! statement to the table; a table reached along several paths takes the
//! deepest.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::generated::{GeneratedTable, ReifyMode, Statement};
use crate::sql_ast::Query;

struct DepthMap {
    depths: IndexMap<String, (Arc<GeneratedTable>, usize)>,
    /// Only descend into tables with these modes
    follow: fn(ReifyMode) -> bool,
}

impl DepthMap {
    fn new(follow: fn(ReifyMode) -> bool) -> Self {
        Self {
            depths: IndexMap::new(),
            follow,
        }
    }

    fn visit(&mut self, table: &Arc<GeneratedTable>, depth: usize, path: &mut HashSet<String>) {
        if let Some((_, known)) = self.depths.get(table.name()) {
            if *known >= depth {
                return;
            }
        }
        // a table never depends on itself; guard against any other cycle too
        if !path.insert(table.name().to_string()) {
            return;
        }
        self.depths
            .insert(table.name().to_string(), (table.clone(), depth));
        if (self.follow)(table.mode()) {
            for dependency in table.dependencies() {
                self.visit(&dependency, depth + 1, path);
            }
        }
        path.remove(table.name());
    }

    /// Tables sorted deepest first; ties keep discovery order
    fn deepest_first(&self) -> Vec<Arc<GeneratedTable>> {
        let mut tables: Vec<_> = self.depths.values().cloned().collect();
        tables.sort_by(|a, b| b.1.cmp(&a.1));
        tables.into_iter().map(|(table, _)| table).collect()
    }
}

/// Wrap statements with the setup and cleanup of every table they need.
///
/// Statements already present in the input are not added again, so resolving
/// an already resolved list is a no-op.
pub fn resolve(
    statements: Vec<Statement>,
    config: &EngineConfig,
    index_patient_id: bool,
) -> Vec<Statement> {
    let mut depths = DepthMap::new(|_| true);
    for statement in &statements {
        for table in statement.referenced_tables() {
            depths.visit(&table, 0, &mut HashSet::new());
        }
    }
    let order = depths.deepest_first();

    let setup: Vec<Statement> = order
        .iter()
        .flat_map(|table| table.setup_statements(config, index_patient_id))
        .filter(|s| !statements.contains(s))
        .collect();
    let cleanup: Vec<Statement> = order
        .iter()
        .rev()
        .flat_map(|table| table.cleanup_statements())
        .filter(|s| !statements.contains(s))
        .collect();
    log::debug!(
        "Resolved {} generated tables: {} setup, {} cleanup statements",
        order.len(),
        setup.len(),
        cleanup.len()
    );

    let mut resolved = setup;
    resolved.extend(statements);
    resolved.extend(cleanup);
    resolved
}

/// CTE-mode tables a query needs, each defined after the tables it reads.
///
/// Materialized tables are not looked through; they already exist when the
/// query runs.
pub fn cte_tables(query: &Query) -> Vec<Arc<GeneratedTable>> {
    let mut depths = DepthMap::new(|mode| !mode.is_materialized());
    for table in query.referenced_tables() {
        depths.visit(&table, 0, &mut HashSet::new());
    }
    depths
        .deepest_first()
        .into_iter()
        .filter(|table| table.mode() == ReifyMode::Cte)
        .collect()
}

/// Split a resolved list into setup, main and cleanup parts around `main`
pub fn split_around<'s>(
    statements: &'s [Statement],
    main: &Statement,
) -> Option<(&'s [Statement], &'s Statement, &'s [Statement])> {
    let index = statements.iter().position(|s| s == main)?;
    Some((
        &statements[..index],
        &statements[index],
        &statements[index + 1..],
    ))
}
