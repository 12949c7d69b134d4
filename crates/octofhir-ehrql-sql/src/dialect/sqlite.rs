//! SQLite
//!
//! Dates are stored as `YYYY-MM-DD` text and booleans as 0/1 integers.

use crate::error::CompileResult;
use crate::sql_ast::{BinaryOperator, Expr, HorizontalFunction, SqlType};
use crate::writer::SqlWriter;

use super::Dialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

fn strftime(format: &str, date: Expr) -> Expr {
    Expr::function("strftime", vec![Expr::literal(format), date])
}

fn date_part(format: &str, date: Expr) -> Expr {
    Expr::cast(strftime(format, date), SqlType::Integer)
}

/// `printf('%+d <unit>', n)`, a date modifier such as `+3 months`
fn modifier(unit: &str, amount: Expr) -> Expr {
    Expr::function(
        "printf",
        vec![Expr::literal(format!("%+d {unit}").as_str()), amount],
    )
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Integer | SqlType::Boolean => "INTEGER",
            SqlType::Float => "REAL",
            SqlType::Text | SqlType::Date => "TEXT",
        }
    }

    fn year(&self, date: Expr) -> CompileResult<Expr> {
        Ok(date_part("%Y", date))
    }

    fn month(&self, date: Expr) -> CompileResult<Expr> {
        Ok(date_part("%m", date))
    }

    fn day(&self, date: Expr) -> CompileResult<Expr> {
        Ok(date_part("%d", date))
    }

    fn to_first_of_year(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function(
            "date",
            vec![date, Expr::literal("start of year")],
        ))
    }

    fn to_first_of_month(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function(
            "date",
            vec![date, Expr::literal("start of month")],
        ))
    }

    fn add_days(&self, date: Expr, days: Expr) -> CompileResult<Expr> {
        Ok(Expr::function("date", vec![date, modifier("days", days)]))
    }

    fn add_months(&self, date: Expr, months: Expr) -> CompileResult<Expr> {
        // SQLite normalises 2021-02-31 to 2021-03-03; when the day of month
        // changed, step back to the first of that month instead
        let shifted = Expr::function("date", vec![date.clone(), modifier("months", months.clone())]);
        let rolled_over = Expr::binary(
            BinaryOperator::Ne,
            self.day(shifted.clone())?,
            self.day(date.clone())?,
        );
        let first_of_next = Expr::function(
            "date",
            vec![
                date,
                modifier("months", months),
                Expr::literal("start of month"),
            ],
        );
        Ok(Expr::case(vec![(rolled_over, first_of_next)], Some(shifted)))
    }

    fn days_between(&self, start: Expr, end: Expr) -> CompileResult<Expr> {
        Ok(Expr::cast(
            Expr::binary(
                BinaryOperator::Subtract,
                Expr::function("julianday", vec![end]),
                Expr::function("julianday", vec![start]),
            ),
            SqlType::Integer,
        ))
    }

    fn string_contains(&self, haystack: Expr, needle: Expr) -> CompileResult<Expr> {
        Ok(Expr::binary(
            BinaryOperator::Gt,
            Expr::function("instr", vec![haystack, needle]),
            Expr::literal(0i64),
        ))
    }

    fn floor_divide(&self, lhs: Expr, rhs: Expr) -> CompileResult<Expr> {
        // FLOOR is only present when SQLite is built with math functions
        let quotient = self.true_divide(lhs, rhs)?;
        let truncated = Expr::cast(quotient.clone(), SqlType::Integer);
        Ok(Expr::binary(
            BinaryOperator::Subtract,
            truncated.clone(),
            super::one_if(Expr::binary(BinaryOperator::Lt, quotient, truncated)),
        ))
    }

    fn write_horizontal(
        &self,
        w: &mut SqlWriter<'_>,
        function: HorizontalFunction,
        args: &[Expr],
    ) -> CompileResult<()> {
        // SQLite names VALUES columns column1, column2, ...
        w.push("(SELECT ");
        w.push(function.as_str());
        w.push("(");
        w.ident("column1");
        w.push(") FROM (VALUES ");
        w.list(args, |w, arg| {
            w.push("(");
            w.expr(arg)?;
            w.push(")");
            Ok(())
        })?;
        w.push("))");
        Ok(())
    }
}
