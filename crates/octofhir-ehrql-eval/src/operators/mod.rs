//! Scalar operator implementations
//!
//! Every operator takes already-evaluated values and follows the query model's
//! null rules: nulls propagate unless the operator says otherwise (`and`/`or`
//! use three-valued logic, `is_null` never returns null, aggregates skip nulls).
//!
//! - Logical operators (and, or, not, is_null)
//! - Comparison operators (==, !=, <, <=, >, >=, maximum_of, minimum_of)
//! - Arithmetic operators (+, -, *, /, //, negate, casts)
//! - Date operators (parts, truncation, shifting, differences)
//! - String and set operators (contains, membership)
//! - Aggregates over one patient's values

pub mod aggregate;
pub mod arithmetic;
pub mod comparison;
pub mod datetime;
pub mod logical;
pub mod string;

use octofhir_ehrql_ir::{BinaryFn, UnaryFn};
use octofhir_ehrql_types::Value;

use crate::error::{EvalError, EvalResult};

/// Mismatch error for a binary operator
pub(crate) fn mismatch(operation: &str, expected: &str, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::type_mismatch(
        operation,
        expected,
        format!("({}, {})", lhs.type_name(), rhs.type_name()),
    )
}

/// Apply a unary operator
pub fn apply_unary(op: UnaryFn, operand: &Value) -> EvalResult<Value> {
    match op {
        UnaryFn::Not => logical::not(operand),
        UnaryFn::IsNull => Ok(Value::Bool(operand.is_null())),
        UnaryFn::Negate => arithmetic::negate(operand),
        UnaryFn::CastToInt => arithmetic::cast_to_int(operand),
        UnaryFn::CastToFloat => arithmetic::cast_to_float(operand),
        UnaryFn::YearFromDate
        | UnaryFn::MonthFromDate
        | UnaryFn::DayFromDate
        | UnaryFn::ToFirstOfYear
        | UnaryFn::ToFirstOfMonth => datetime::apply_unary(op, operand),
    }
}

/// Apply a binary operator
pub fn apply_binary(op: BinaryFn, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match op {
        BinaryFn::Eq
        | BinaryFn::Ne
        | BinaryFn::Lt
        | BinaryFn::Le
        | BinaryFn::Gt
        | BinaryFn::Ge => comparison::compare(op, lhs, rhs),
        BinaryFn::And => logical::and(lhs, rhs),
        BinaryFn::Or => logical::or(lhs, rhs),
        BinaryFn::Add => arithmetic::add(lhs, rhs),
        BinaryFn::Subtract => arithmetic::subtract(lhs, rhs),
        BinaryFn::Multiply => arithmetic::multiply(lhs, rhs),
        BinaryFn::TrueDivide => arithmetic::true_divide(lhs, rhs),
        BinaryFn::FloorDivide => arithmetic::floor_divide(lhs, rhs),
        BinaryFn::DateAddYears
        | BinaryFn::DateAddMonths
        | BinaryFn::DateAddDays
        | BinaryFn::DateDifferenceInYears
        | BinaryFn::DateDifferenceInMonths
        | BinaryFn::DateDifferenceInDays => datetime::apply_binary(op, lhs, rhs),
        BinaryFn::StringContains => string::contains(lhs, rhs),
        BinaryFn::In => string::is_in(lhs, rhs),
    }
}
