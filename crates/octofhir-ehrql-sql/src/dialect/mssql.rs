//! Microsoft SQL Server

use chrono::NaiveDate;

use crate::error::CompileResult;
use crate::generated::{GeneratedTable, ReifyMode};
use crate::sql_ast::{BinaryOperator, Expr, Query, SqlType};
use crate::writer::SqlWriter;

use super::Dialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

/// Roll `shifted` forward one day when DATEADD clamped it to the end of a month
fn roll_over_clamped(date: Expr, shifted: Expr) -> Expr {
    let clamped = Expr::binary(
        BinaryOperator::Ne,
        Expr::function("DAY", vec![shifted.clone()]),
        Expr::function("DAY", vec![date]),
    );
    let next_day = Expr::function(
        "DATEADD",
        vec![Expr::Keyword("day"), Expr::literal(1i64), shifted.clone()],
    );
    Expr::case(vec![(clamped, next_day)], Some(shifted))
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Integer => "BIGINT",
            SqlType::Float => "FLOAT",
            SqlType::Text => "NVARCHAR(4000)",
            SqlType::Date => "DATE",
            SqlType::Boolean => "BIT",
        }
    }

    fn write_bool(&self, out: &mut String, value: bool) {
        out.push_str(if value { "1" } else { "0" });
    }

    fn write_string(&self, out: &mut String, value: &str) {
        out.push_str("N'");
        out.push_str(&value.replace('\'', "''"));
        out.push('\'');
    }

    fn write_date(&self, out: &mut String, value: NaiveDate) {
        out.push_str(&format!("CAST('{}' AS DATE)", value.format("%Y-%m-%d")));
    }

    fn physical_table_name(&self, name: &str, mode: ReifyMode) -> String {
        match mode {
            ReifyMode::TempTable => format!("#{name}"),
            _ => name.to_string(),
        }
    }

    fn temporary_keyword(&self) -> &'static str {
        // temporary tables are marked by the # prefix
        ""
    }

    fn index_keyword(&self) -> &'static str {
        "CLUSTERED "
    }

    fn index_generated_tables(&self) -> bool {
        true
    }

    fn write_create_table_as(
        &self,
        w: &mut SqlWriter<'_>,
        table: &GeneratedTable,
        query: &Query,
    ) -> CompileResult<()> {
        w.ctes(query)?;
        w.push("SELECT * INTO ");
        w.table_name(table);
        w.push(" FROM (");
        w.query(query)?;
        w.push(") AS ");
        w.ident("_source");
        Ok(())
    }

    fn uses_top(&self) -> bool {
        true
    }

    fn year(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function("YEAR", vec![date]))
    }

    fn month(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function("MONTH", vec![date]))
    }

    fn day(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function("DAY", vec![date]))
    }

    fn to_first_of_year(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function(
            "DATEFROMPARTS",
            vec![self.year(date)?, Expr::literal(1i64), Expr::literal(1i64)],
        ))
    }

    fn to_first_of_month(&self, date: Expr) -> CompileResult<Expr> {
        Ok(Expr::function(
            "DATEFROMPARTS",
            vec![self.year(date.clone())?, self.month(date)?, Expr::literal(1i64)],
        ))
    }

    fn add_days(&self, date: Expr, days: Expr) -> CompileResult<Expr> {
        Ok(Expr::function(
            "DATEADD",
            vec![Expr::Keyword("day"), days, date],
        ))
    }

    fn add_months(&self, date: Expr, months: Expr) -> CompileResult<Expr> {
        let shifted = Expr::function(
            "DATEADD",
            vec![Expr::Keyword("month"), months, date.clone()],
        );
        Ok(roll_over_clamped(date, shifted))
    }

    fn days_between(&self, start: Expr, end: Expr) -> CompileResult<Expr> {
        Ok(Expr::function(
            "DATEDIFF",
            vec![Expr::Keyword("day"), start, end],
        ))
    }

    fn string_contains(&self, haystack: Expr, needle: Expr) -> CompileResult<Expr> {
        // escape LIKE wildcards in the needle, using ! as the escape character
        let mut escaped = needle;
        for special in ["!", "%", "_", "["] {
            escaped = Expr::function(
                "REPLACE",
                vec![
                    escaped,
                    Expr::literal(special),
                    Expr::literal(format!("!{special}").as_str()),
                ],
            );
        }
        let pattern = Expr::function(
            "CONCAT",
            vec![Expr::literal("%"), escaped, Expr::literal("%")],
        );
        Ok(Expr::Like {
            expr: Box::new(haystack),
            pattern: Box::new(pattern),
            escape: '!',
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::SqlWriter;
    use octofhir_ehrql_types::Value;
    use pretty_assertions::assert_eq;

    fn render(expr: &Expr) -> String {
        let mut w = SqlWriter::new(&MssqlDialect);
        w.expr(expr).unwrap();
        w.finish()
    }

    #[test]
    fn test_bool_is_true_compares_with_bit() {
        let column = Expr::literal(true);
        assert_eq!(render(&MssqlDialect.bool_is_true(column)), "(1 = 1)");
    }

    #[test]
    fn test_add_months_rolls_over_clamped_days() {
        let date = Expr::Literal(Value::date(2021, 1, 31));
        let expr = MssqlDialect.add_months(date, Expr::literal(1i64)).unwrap();
        let sql = render(&expr);
        assert!(sql.starts_with("CASE WHEN (DAY(DATEADD(month, 1, CAST('2021-01-31' AS DATE)))"));
        assert!(sql.contains("THEN DATEADD(day, 1, DATEADD(month, 1,"));
    }

    #[test]
    fn test_contains_escapes_wildcards() {
        let expr = MssqlDialect
            .string_contains(Expr::literal("a%b"), Expr::literal("%"))
            .unwrap();
        let sql = render(&expr);
        assert!(sql.starts_with("(N'a%b') LIKE (CONCAT(N'%', REPLACE(REPLACE(REPLACE(REPLACE(N'%', N'!', N'!!')"));
        assert!(sql.ends_with("ESCAPE '!'"));
    }
}
