//! SQL dialects
//!
//! A dialect decides how literals and identifiers are spelled, which
//! reification mechanisms exist, and how functions without a portable SQL
//! spelling (date arithmetic, string search) are expressed. Date functions
//! have no portable form, so the trait defaults report them as unsupported and
//! every dialect provides its own.

mod mssql;
mod sqlite;
mod trino;

pub use mssql::MssqlDialect;
pub use sqlite::SqliteDialect;
pub use trino::TrinoDialect;

use chrono::NaiveDate;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use octofhir_ehrql_types::Value;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::error::{CompileResult, SqlError};
use crate::generated::{GeneratedTable, ReifyMode};
use crate::sql_ast::{BinaryOperator, Expr, HorizontalFunction, Query, SqlType};
use crate::writer::SqlWriter;

pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn type_name(&self, ty: SqlType) -> &'static str;

    // === Literals ===

    fn write_literal(&self, out: &mut String, value: &Value) -> CompileResult<()> {
        match value {
            Value::Null => out.push_str("NULL"),
            Value::Bool(b) => self.write_bool(out, *b),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&float_literal(*f)),
            Value::Str(s) => self.write_string(out, s),
            Value::Code(code) => self.write_string(out, &code.code),
            Value::Date(d) => self.write_date(out, *d),
            Value::Set(_) => {
                return Err(SqlError::internal("set values have no literal form"));
            }
        }
        Ok(())
    }

    fn write_bool(&self, out: &mut String, value: bool) {
        out.push_str(if value { "TRUE" } else { "FALSE" });
    }

    fn write_string(&self, out: &mut String, value: &str) {
        out.push('\'');
        out.push_str(&value.replace('\'', "''"));
        out.push('\'');
    }

    fn write_date(&self, out: &mut String, value: NaiveDate) {
        self.write_string(out, &value.format("%Y-%m-%d").to_string());
    }

    // === Reification ===

    fn default_reify_mode(&self) -> ReifyMode {
        ReifyMode::TempTable
    }

    fn supports_reify_mode(&self, _mode: ReifyMode) -> bool {
        true
    }

    /// Name printed in DDL and FROM clauses for a generated table
    fn physical_table_name(&self, name: &str, _mode: ReifyMode) -> String {
        name.to_string()
    }

    /// Keyword between CREATE and TABLE for temporary tables
    fn temporary_keyword(&self) -> &'static str {
        "TEMPORARY "
    }

    /// Keyword between CREATE and INDEX
    fn index_keyword(&self) -> &'static str {
        ""
    }

    /// Whether materialized tables get an index on patient id
    fn index_generated_tables(&self) -> bool {
        false
    }

    fn write_create_table_as(
        &self,
        w: &mut SqlWriter<'_>,
        table: &GeneratedTable,
        query: &Query,
    ) -> CompileResult<()> {
        w.push("CREATE ");
        if table.mode() == ReifyMode::TempTable {
            w.push(self.temporary_keyword());
        }
        w.push("TABLE ");
        w.table_name(table);
        w.push(" AS ");
        w.ctes(query)?;
        w.query(query)
    }

    /// Whether row limits are written as `SELECT TOP n` rather than `LIMIT n`
    fn uses_top(&self) -> bool {
        false
    }

    // === Booleans ===

    /// Predicate that holds when a boolean value is true
    fn bool_is_true(&self, value: Expr) -> Expr {
        Expr::eq(value, Expr::literal(true))
    }

    // === Dates ===

    fn year(&self, _date: Expr) -> CompileResult<Expr> {
        Err(SqlError::unsupported(self.name(), "year"))
    }

    fn month(&self, _date: Expr) -> CompileResult<Expr> {
        Err(SqlError::unsupported(self.name(), "month"))
    }

    fn day(&self, _date: Expr) -> CompileResult<Expr> {
        Err(SqlError::unsupported(self.name(), "day"))
    }

    fn to_first_of_year(&self, _date: Expr) -> CompileResult<Expr> {
        Err(SqlError::unsupported(self.name(), "to_first_of_year"))
    }

    fn to_first_of_month(&self, _date: Expr) -> CompileResult<Expr> {
        Err(SqlError::unsupported(self.name(), "to_first_of_month"))
    }

    fn add_days(&self, _date: Expr, _days: Expr) -> CompileResult<Expr> {
        Err(SqlError::unsupported(self.name(), "add_days"))
    }

    /// Add months, rolling a day past the end of the month over to the 1st of the
    /// following month
    fn add_months(&self, _date: Expr, _months: Expr) -> CompileResult<Expr> {
        Err(SqlError::unsupported(self.name(), "add_months"))
    }

    fn add_years(&self, date: Expr, years: Expr) -> CompileResult<Expr> {
        let months = Expr::binary(BinaryOperator::Multiply, years, Expr::literal(12i64));
        self.add_months(date, months)
    }

    fn days_between(&self, _start: Expr, _end: Expr) -> CompileResult<Expr> {
        Err(SqlError::unsupported(self.name(), "difference_in_days"))
    }

    /// Whole months from start to end
    fn months_between(&self, start: Expr, end: Expr) -> CompileResult<Expr> {
        let years = Expr::binary(
            BinaryOperator::Subtract,
            self.year(end.clone())?,
            self.year(start.clone())?,
        );
        let months = Expr::binary(
            BinaryOperator::Add,
            Expr::binary(BinaryOperator::Multiply, years, Expr::literal(12i64)),
            Expr::binary(
                BinaryOperator::Subtract,
                self.month(end.clone())?,
                self.month(start.clone())?,
            ),
        );
        let incomplete = Expr::binary(BinaryOperator::Lt, self.day(end)?, self.day(start)?);
        Ok(Expr::binary(
            BinaryOperator::Subtract,
            months,
            one_if(incomplete),
        ))
    }

    /// Whole years from start to end
    fn years_between(&self, start: Expr, end: Expr) -> CompileResult<Expr> {
        let years = Expr::binary(
            BinaryOperator::Subtract,
            self.year(end.clone())?,
            self.year(start.clone())?,
        );
        let (end_month, start_month) = (self.month(end.clone())?, self.month(start.clone())?);
        let incomplete = Expr::binary(
            BinaryOperator::Or,
            Expr::binary(BinaryOperator::Lt, end_month.clone(), start_month.clone()),
            Expr::binary(
                BinaryOperator::And,
                Expr::eq(end_month, start_month),
                Expr::binary(BinaryOperator::Lt, self.day(end)?, self.day(start)?),
            ),
        );
        Ok(Expr::binary(
            BinaryOperator::Subtract,
            years,
            one_if(incomplete),
        ))
    }

    // === Strings ===

    fn string_contains(&self, _haystack: Expr, _needle: Expr) -> CompileResult<Expr> {
        Err(SqlError::unsupported(self.name(), "contains"))
    }

    // === Numbers ===

    fn cast_to_int(&self, value: Expr) -> CompileResult<Expr> {
        Ok(Expr::cast(value, SqlType::Integer))
    }

    fn cast_to_float(&self, value: Expr) -> CompileResult<Expr> {
        Ok(Expr::cast(value, SqlType::Float))
    }

    /// Float division; null when the divisor is zero
    fn true_divide(&self, lhs: Expr, rhs: Expr) -> CompileResult<Expr> {
        Ok(Expr::binary(
            BinaryOperator::Divide,
            Expr::cast(lhs, SqlType::Float),
            Expr::null_if(rhs, Expr::literal(0i64)),
        ))
    }

    /// Division rounded towards negative infinity; null when the divisor is zero
    fn floor_divide(&self, lhs: Expr, rhs: Expr) -> CompileResult<Expr> {
        let quotient = self.true_divide(lhs, rhs)?;
        Ok(Expr::cast(
            Expr::function("FLOOR", vec![quotient]),
            SqlType::Integer,
        ))
    }

    fn mean(&self, value: Expr) -> CompileResult<Expr> {
        Ok(Expr::function("AVG", vec![Expr::cast(value, SqlType::Float)]))
    }

    // === Row-wise aggregation ===

    /// Largest/smallest non-null argument, via an aggregate over a table
    /// value constructor
    fn write_horizontal(
        &self,
        w: &mut SqlWriter<'_>,
        function: HorizontalFunction,
        args: &[Expr],
    ) -> CompileResult<()> {
        w.push("(SELECT ");
        w.push(function.as_str());
        w.push("(");
        w.ident("v");
        w.push(") FROM (VALUES ");
        w.list(args, |w, arg| {
            w.push("(");
            w.expr(arg)?;
            w.push(")");
            Ok(())
        })?;
        w.push(") AS ");
        w.ident("t");
        w.push("(");
        w.ident("v");
        w.push("))");
        Ok(())
    }
}

/// `CASE WHEN condition THEN 1 ELSE 0 END`
pub(crate) fn one_if(condition: Expr) -> Expr {
    Expr::case(
        vec![(condition, Expr::literal(1i64))],
        Some(Expr::literal(0i64)),
    )
}

/// Float literal that always reads back as a float
pub(crate) fn float_literal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value:?}")
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Process-wide dialect lookup by name
pub struct DialectRegistry {
    dialects: RwLock<IndexMap<String, Arc<dyn Dialect>>>,
}

impl DialectRegistry {
    fn with_builtins() -> Self {
        let registry = Self {
            dialects: RwLock::new(IndexMap::new()),
        };
        let mssql: Arc<dyn Dialect> = Arc::new(MssqlDialect);
        registry.register("sqlite", Arc::new(SqliteDialect));
        registry.register("mssql", mssql.clone());
        registry.register("sqlserver", mssql);
        registry.register("trino", Arc::new(TrinoDialect));
        registry
    }

    /// Register (or replace) a dialect under a name
    pub fn register(&self, name: impl Into<String>, dialect: Arc<dyn Dialect>) {
        let name = name.into().to_ascii_lowercase();
        log::debug!("Registered SQL dialect '{}' ({})", name, dialect.name());
        self.dialects.write().insert(name, dialect);
    }

    pub fn get(&self, name: &str) -> CompileResult<Arc<dyn Dialect>> {
        self.dialects
            .read()
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| SqlError::UnknownDialect(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.dialects.read().keys().cloned().collect()
    }
}

static REGISTRY: Lazy<DialectRegistry> = Lazy::new(DialectRegistry::with_builtins);

pub fn dialect_registry() -> &'static DialectRegistry {
    &REGISTRY
}

/// Look up a registered dialect
pub fn get_dialect(name: &str) -> CompileResult<Arc<dyn Dialect>> {
    REGISTRY.get(name)
}
