//! Date operators
//!
//! Implements: year, month, day, to_first_of_year, to_first_of_month,
//! add_years, add_months, add_days and the three date differences.
//!
//! Shifting by months or years never produces an invalid day: a day-of-month
//! the target month lacks rolls to the 1st of the following month. A result
//! outside the representable date range is null.

use chrono::{Datelike, NaiveDate};
use octofhir_ehrql_ir::{BinaryFn, UnaryFn};
use octofhir_ehrql_types::{Value, dates};

use super::mismatch;
use crate::error::{EvalError, EvalResult};

pub fn apply_unary(op: UnaryFn, operand: &Value) -> EvalResult<Value> {
    let date = match operand {
        Value::Null => return Ok(Value::Null),
        Value::Date(date) => *date,
        other => {
            return Err(EvalError::type_mismatch(op.name(), "date", other.type_name()));
        }
    };
    Ok(match op {
        UnaryFn::YearFromDate => Value::Int(i64::from(date.year())),
        UnaryFn::MonthFromDate => Value::Int(i64::from(date.month())),
        UnaryFn::DayFromDate => Value::Int(i64::from(date.day())),
        UnaryFn::ToFirstOfYear => Value::Date(dates::first_of_year(date)),
        UnaryFn::ToFirstOfMonth => Value::Date(dates::first_of_month(date)),
        other => {
            return Err(EvalError::internal(format!(
                "{} is not a date operator",
                other.name()
            )));
        }
    })
}

pub fn apply_binary(op: BinaryFn, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (op, lhs, rhs) {
        (_, Value::Null, _) | (_, _, Value::Null) => Ok(Value::Null),
        (
            BinaryFn::DateAddYears | BinaryFn::DateAddMonths | BinaryFn::DateAddDays,
            Value::Date(date),
            Value::Int(amount),
        ) => {
            let shifted = match op {
                BinaryFn::DateAddYears => dates::add_years(*date, *amount),
                BinaryFn::DateAddMonths => dates::add_months(*date, *amount),
                _ => dates::add_days(*date, *amount),
            };
            Ok(shifted.map_or(Value::Null, Value::Date))
        }
        (
            BinaryFn::DateDifferenceInYears
            | BinaryFn::DateDifferenceInMonths
            | BinaryFn::DateDifferenceInDays,
            Value::Date(start),
            Value::Date(end),
        ) => Ok(Value::Int(difference(op, *start, *end))),
        _ => Err(mismatch(op.name(), "(date, int) or (date, date)", lhs, rhs)),
    }
}

/// Whole units from `start` to `end`
fn difference(op: BinaryFn, start: NaiveDate, end: NaiveDate) -> i64 {
    match op {
        BinaryFn::DateDifferenceInYears => dates::years_between(start, end),
        BinaryFn::DateDifferenceInMonths => dates::months_between(start, end),
        _ => dates::days_between(start, end),
    }
}
