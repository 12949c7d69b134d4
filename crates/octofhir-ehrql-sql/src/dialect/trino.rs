//! Trino
//!
//! Trino has no session temporary tables, so intermediate results default to
//! uniquely named tables (optionally in a scratch schema).

use chrono::NaiveDate;

use crate::error::CompileResult;
use crate::generated::ReifyMode;
use crate::sql_ast::{BinaryOperator, Expr, HorizontalFunction, SqlType};
use crate::writer::SqlWriter;

use super::Dialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct TrinoDialect;

fn date_add(unit: &'static str, amount: Expr, date: Expr) -> Expr {
    Expr::function("date_add", vec![Expr::literal(unit), amount, date])
}

impl Dialect for TrinoDialect {
    fn name(&self) -> &'static str {
        "trino"
    }

    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Integer => "BIGINT",
            SqlType::Float => "DOUBLE",
            SqlType::Text => "VARCHAR",
            SqlType::Date => "DATE",
            SqlType::Boolean => "BOOLEAN",
        }
    }

    fn write_date(&self, out: &mut String, value: NaiveDate) {
        out.push_str(&format!("DATE '{}'", value.format("%Y-%m-%d")));
    }

    fn default_reify_mode(&self) -> ReifyMode {
        ReifyMode::CreateTableAs
    }

    fn supports_reify_mode(&self, mode: ReifyMode) -> bool {
        mode != ReifyMode::TempTable
    }

    fn year(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function("year", vec![date]))
    }

    fn month(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function("month", vec![date]))
    }

    fn day(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function("day", vec![date]))
    }

    fn to_first_of_year(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function("date_trunc", vec![Expr::literal("year"), date]))
    }

    fn to_first_of_month(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function("date_trunc", vec![Expr::literal("month"), date]))
    }

    fn add_days(&self, date: Expr, days: Expr) -> CompileResult<Expr> {
        Ok(date_add("day", days, date))
    }

    fn add_months(&self, date: Expr, months: Expr) -> CompileResult<Expr> {
        // date_add clamps to the last day of the month
        let shifted = date_add("month", months, date.clone());
        let clamped = Expr::binary(
            BinaryOperator::Ne,
            self.day(shifted.clone())?,
            self.day(date)?,
        );
        let next_day = date_add("day", Expr::literal(1i64), shifted.clone());
        Ok(Expr::case(vec![(clamped, next_day)], Some(shifted)))
    }

    fn days_between(&self, start: Expr, end: Expr) -> CompileResult<Expr> {
        Ok(Expr::function(
            "date_diff",
            vec![Expr::literal("day"), start, end],
        ))
    }

    fn string_contains(&self, haystack: Expr, needle: Expr) -> CompileResult<Expr> {
        Ok(Expr::binary(
            BinaryOperator::Gt,
            Expr::function("strpos", vec![haystack, needle]),
            Expr::literal(0i64),
        ))
    }

    fn cast_to_int(&self, value: Expr) -> CompileResult<Expr> {
        // CAST rounds doubles; truncate first
        Ok(Expr::cast(
            Expr::function("truncate", vec![Expr::cast(value, SqlType::Float)]),
            SqlType::Integer,
        ))
    }

    fn write_horizontal(
        &self,
        w: &mut SqlWriter<'_>,
        function: HorizontalFunction,
        args: &[Expr],
    ) -> CompileResult<()> {
        w.push(match function {
            HorizontalFunction::Max => "array_max(filter(ARRAY[",
            HorizontalFunction::Min => "array_min(filter(ARRAY[",
        });
        w.list(args, |w, arg| w.expr(arg))?;
        w.push("], x -> x IS NOT NULL))");
        Ok(())
    }
}
