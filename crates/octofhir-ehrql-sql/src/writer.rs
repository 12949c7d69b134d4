//! Renders the SQL tree as text for one dialect

use octofhir_ehrql_model::TableExpression;
use octofhir_ehrql_types::{PATIENT_ID, Value};
use std::sync::Arc;

use crate::dialect::Dialect;
use crate::error::{CompileResult, SqlError};
use crate::generated::{GeneratedTable, ReifyMode, Statement, TableDefinition};
use crate::resolver::cte_tables;
use crate::sql_ast::{Expr, JoinKind, OrderBy, Query, Select, SqlType, TableRef};

/// Render one statement
pub fn statement_to_sql(dialect: &dyn Dialect, statement: &Statement) -> CompileResult<String> {
    let mut writer = SqlWriter::new(dialect);
    writer.statement(statement)?;
    Ok(writer.finish())
}

/// Render a standalone query, with any CTEs it needs
pub fn query_to_sql(dialect: &dyn Dialect, query: &Query) -> CompileResult<String> {
    let mut writer = SqlWriter::new(dialect);
    writer.ctes(query)?;
    writer.query(query)?;
    Ok(writer.finish())
}

pub struct SqlWriter<'a> {
    dialect: &'a dyn Dialect,
    out: String,
    /// Primary table alias of each select being written, innermost last
    scopes: Vec<String>,
}

impl<'a> SqlWriter<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            out: String::new(),
            scopes: Vec::new(),
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    pub fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub fn ident(&mut self, name: &str) {
        let quoted = self.dialect.quote(name);
        self.out.push_str(&quoted);
    }

    /// Schema-qualified physical name of a generated table
    pub fn table_name(&mut self, table: &GeneratedTable) {
        if let Some(schema) = table.schema() {
            self.ident(schema);
            self.push(".");
        }
        self.ident(table.physical_name());
    }

    pub fn literal(&mut self, value: &Value) -> CompileResult<()> {
        self.dialect.write_literal(&mut self.out, value)
    }

    pub fn type_name(&mut self, ty: SqlType) {
        self.push(self.dialect.type_name(ty));
    }

    /// Comma separated list written by `each`
    pub fn list<T>(
        &mut self,
        items: &[T],
        mut each: impl FnMut(&mut Self, &T) -> CompileResult<()>,
    ) -> CompileResult<()> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            each(self, item)?;
        }
        Ok(())
    }

    // === Statements ===

    pub fn statement(&mut self, statement: &Statement) -> CompileResult<()> {
        match statement {
            Statement::CreateTableAs { table, query } => {
                let dialect = self.dialect;
                dialect.write_create_table_as(self, table, query)
            }
            Statement::CreateTable { table } => {
                self.push("CREATE ");
                if table.mode() == ReifyMode::TempTable {
                    self.push(self.dialect.temporary_keyword());
                }
                self.push("TABLE ");
                self.table_name(table);
                self.push(" (");
                self.list(table.columns(), |w, (name, ty)| {
                    w.ident(name);
                    w.push(" ");
                    w.type_name(SqlType::for_type(ty));
                    Ok(())
                })?;
                self.push(")");
                Ok(())
            }
            Statement::Insert { table, rows } => {
                self.push("INSERT INTO ");
                self.table_name(table);
                self.push(" (");
                let names: Vec<&str> = table.column_names().collect();
                self.list(&names, |w, name| {
                    w.ident(name);
                    Ok(())
                })?;
                self.push(") VALUES ");
                self.list(rows, |w, row| {
                    w.push("(");
                    w.list(row, |w, value| w.literal(value))?;
                    w.push(")");
                    Ok(())
                })
            }
            Statement::CreateIndex { table, column } => {
                self.push("CREATE ");
                self.push(self.dialect.index_keyword());
                self.push("INDEX ");
                self.ident(&format!("ix_{}_{}", table.name(), column));
                self.push(" ON ");
                self.table_name(table);
                self.push(" (");
                self.ident(column);
                self.push(")");
                Ok(())
            }
            Statement::DropTable { table } => {
                self.push("DROP TABLE IF EXISTS ");
                self.table_name(table);
                Ok(())
            }
            Statement::Query(query) => {
                self.ctes(query)?;
                self.query(query)
            }
        }
    }

    /// `WITH` prefix for every CTE-mode table the query needs
    pub fn ctes(&mut self, query: &Query) -> CompileResult<()> {
        let tables = cte_tables(query);
        if tables.is_empty() {
            return Ok(());
        }
        self.push("WITH ");
        self.list(&tables, |w, table| {
            w.ident(table.name());
            w.push(" AS (");
            w.definition(table)?;
            w.push(")");
            Ok(())
        })?;
        self.push(" ");
        Ok(())
    }

    // === Queries ===

    pub fn query(&mut self, query: &Query) -> CompileResult<()> {
        match query {
            Query::Select(select) => self.select(select),
            Query::Union { all, selects } => {
                for (i, select) in selects.iter().enumerate() {
                    if i > 0 {
                        self.push(if *all { " UNION ALL " } else { " UNION " });
                    }
                    self.select(select)?;
                }
                Ok(())
            }
        }
    }

    pub fn select(&mut self, select: &Select) -> CompileResult<()> {
        self.push("SELECT ");
        if select.distinct {
            self.push("DISTINCT ");
        }
        if let (Some(limit), true) = (select.limit, self.dialect.uses_top()) {
            self.push(&format!("TOP {limit} "));
        }
        let scope = select.from.as_ref().map(|t| t.alias().to_string());
        if let Some(alias) = &scope {
            self.scopes.push(alias.clone());
        }
        let result = self.select_body(select);
        if scope.is_some() {
            self.scopes.pop();
        }
        result?;
        if let (Some(limit), false) = (select.limit, self.dialect.uses_top()) {
            self.push(&format!(" LIMIT {limit}"));
        }
        Ok(())
    }

    fn select_body(&mut self, select: &Select) -> CompileResult<()> {
        self.list(&select.columns, |w, item| {
            w.expr(&item.expr)?;
            w.push(" AS ");
            w.ident(&item.alias);
            Ok(())
        })?;
        if let Some(from) = &select.from {
            self.push(" FROM ");
            self.table_source(from)?;
            for join in &select.joins {
                self.push(match join.kind {
                    JoinKind::Left => " LEFT JOIN ",
                    JoinKind::Inner => " JOIN ",
                });
                self.table_source(&join.table)?;
                self.push(" ON ");
                self.expr(&join.table.patient_id())?;
                self.push(" = ");
                self.expr(&from.patient_id())?;
            }
        }
        if let Some(predicate) = &select.where_clause {
            self.push(" WHERE ");
            self.expr(predicate)?;
        }
        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            self.list(&select.group_by, |w, e| w.expr(e))?;
        }
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            self.list(&select.order_by, |w, o| w.order_by(o))?;
        }
        Ok(())
    }

    fn order_by(&mut self, order: &OrderBy) -> CompileResult<()> {
        self.expr(&order.expr)?;
        if order.descending {
            self.push(" DESC");
        }
        Ok(())
    }

    /// A FROM/JOIN item under the table's own alias
    pub fn table_source(&mut self, table: &TableRef) -> CompileResult<()> {
        let alias = table.alias().to_string();
        self.table_source_as(table, &alias)
    }

    pub fn table_source_as(&mut self, table: &TableRef, alias: &str) -> CompileResult<()> {
        match table {
            TableRef::Base(base) => match &base.expression {
                TableExpression::Table { schema, name } => {
                    if let Some(schema) = schema {
                        self.ident(schema);
                        self.push(".");
                    }
                    self.ident(name);
                }
                TableExpression::Mapped {
                    schema,
                    name,
                    patient_id,
                    columns,
                } => {
                    self.push("(SELECT ");
                    self.ident(patient_id);
                    self.push(" AS ");
                    self.ident(PATIENT_ID);
                    for (logical, physical) in columns {
                        self.push(", ");
                        self.ident(physical);
                        self.push(" AS ");
                        self.ident(logical);
                    }
                    self.push(" FROM ");
                    if let Some(schema) = schema {
                        self.ident(schema);
                        self.push(".");
                    }
                    self.ident(name);
                    self.push(")");
                }
                TableExpression::Query { sql } => {
                    self.push("(");
                    self.push(sql);
                    self.push(")");
                }
            },
            TableRef::Generated(generated) => match generated.mode() {
                ReifyMode::Subquery => {
                    self.push("(");
                    self.definition(generated)?;
                    self.push(")");
                }
                ReifyMode::Cte => self.ident(generated.name()),
                ReifyMode::TempTable | ReifyMode::CreateTableAs => self.table_name(generated),
            },
        }
        self.push(" AS ");
        self.ident(alias);
        Ok(())
    }

    /// The query or literal rows defining a generated table
    pub fn definition(&mut self, table: &Arc<GeneratedTable>) -> CompileResult<()> {
        match table.definition() {
            TableDefinition::Query(query) => self.query(query),
            TableDefinition::Rows(rows) if rows.is_empty() => {
                self.push("SELECT ");
                self.list(table.columns(), |w, (name, ty)| {
                    w.push("CAST(NULL AS ");
                    w.type_name(SqlType::for_type(ty));
                    w.push(") AS ");
                    w.ident(name);
                    Ok(())
                })?;
                self.push(" WHERE 1 = 0");
                Ok(())
            }
            TableDefinition::Rows(rows) => {
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        self.push(" UNION ALL ");
                    }
                    self.push("SELECT ");
                    let cells: Vec<_> = table.columns().iter().zip(row).collect();
                    self.list(&cells, |w, ((name, ty), value)| {
                        w.push("CAST(");
                        w.literal(value)?;
                        w.push(" AS ");
                        w.type_name(SqlType::for_type(ty));
                        w.push(") AS ");
                        w.ident(name);
                        Ok(())
                    })?;
                }
                Ok(())
            }
        }
    }

    // === Expressions ===

    pub fn expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Column { table, name } => {
                self.ident(table.alias());
                self.push(".");
                self.ident(name);
            }
            Expr::Literal(value) => self.literal(value)?,
            Expr::Null => self.push("NULL"),
            Expr::Star => self.push("*"),
            Expr::Keyword(keyword) => self.push(keyword),
            Expr::Binary { op, lhs, rhs } => {
                self.push("(");
                self.expr(lhs)?;
                self.push(" ");
                self.push(op.as_str());
                self.push(" ");
                self.expr(rhs)?;
                self.push(")");
            }
            Expr::Not(inner) => {
                self.push("NOT ");
                self.wrapped(inner)?;
            }
            Expr::Negate(inner) => {
                self.push("-");
                self.wrapped(inner)?;
            }
            Expr::IsNull(inner) => {
                self.wrapped(inner)?;
                self.push(" IS NULL");
            }
            Expr::IsNotNull(inner) => {
                self.wrapped(inner)?;
                self.push(" IS NOT NULL");
            }
            Expr::Function {
                name,
                args,
                distinct,
            } => {
                self.push(name);
                self.push("(");
                if *distinct {
                    self.push("DISTINCT ");
                }
                self.list(args, |w, arg| w.expr(arg))?;
                self.push(")");
            }
            Expr::Cast { expr, ty } => {
                self.push("CAST(");
                self.expr(expr)?;
                self.push(" AS ");
                self.type_name(*ty);
                self.push(")");
            }
            Expr::Case { cases, default } => {
                self.push("CASE");
                for (condition, value) in cases {
                    self.push(" WHEN ");
                    self.expr(condition)?;
                    self.push(" THEN ");
                    self.expr(value)?;
                }
                if let Some(default) = default {
                    self.push(" ELSE ");
                    self.expr(default)?;
                }
                self.push(" END");
            }
            Expr::InList { expr, list } => {
                self.wrapped(expr)?;
                self.push(" IN (");
                self.list(list, |w, item| w.expr(item))?;
                self.push(")");
            }
            Expr::InTable {
                expr,
                table,
                column,
            } => {
                self.wrapped(expr)?;
                self.push(" IN (SELECT ");
                let alias = format!("_in{}", self.scopes.len());
                self.ident(&alias);
                self.push(".");
                self.ident(column);
                self.push(" FROM ");
                self.table_source_as(table, &alias)?;
                self.push(")");
            }
            Expr::ExistsInTable { table, value } => {
                let Some(outer) = self.scopes.last().cloned() else {
                    return Err(SqlError::internal(
                        "membership test outside of a select with a FROM clause",
                    ));
                };
                let alias = format!("_m{}", self.scopes.len());
                self.push("EXISTS (SELECT 1 FROM ");
                self.table_source_as(table, &alias)?;
                self.push(" WHERE ");
                self.ident(&alias);
                self.push(".");
                self.ident(PATIENT_ID);
                self.push(" = ");
                self.ident(&outer);
                self.push(".");
                self.ident(PATIENT_ID);
                self.push(" AND ");
                self.ident(&alias);
                self.push(".");
                self.ident("value");
                self.push(" = ");
                self.scopes.push(alias);
                let result = self.wrapped(value);
                self.scopes.pop();
                result?;
                self.push(")");
            }
            Expr::Horizontal { function, args } => {
                let dialect = self.dialect;
                dialect.write_horizontal(self, *function, args)?;
            }
            Expr::Window {
                function,
                partition_by,
                order_by,
            } => {
                self.expr(function)?;
                self.push(" OVER (");
                if !partition_by.is_empty() {
                    self.push("PARTITION BY ");
                    self.list(partition_by, |w, e| w.expr(e))?;
                }
                if !order_by.is_empty() {
                    if !partition_by.is_empty() {
                        self.push(" ");
                    }
                    self.push("ORDER BY ");
                    self.list(order_by, |w, o| w.order_by(o))?;
                }
                self.push(")");
            }
            Expr::Like {
                expr,
                pattern,
                escape,
            } => {
                self.wrapped(expr)?;
                self.push(" LIKE ");
                self.wrapped(pattern)?;
                self.push(&format!(" ESCAPE '{escape}'"));
            }
        }
        Ok(())
    }

    /// Expression in parentheses
    pub fn wrapped(&mut self, expr: &Expr) -> CompileResult<()> {
        self.push("(");
        self.expr(expr)?;
        self.push(")");
        Ok(())
    }
}
