//! Logical operators
//!
//! Implements: and, or, not. All three use three-valued logic.

use octofhir_ehrql_types::Value;

use super::mismatch;
use crate::error::{EvalError, EvalResult};

/// Three-valued conjunction
///
/// Truth table:
/// | A     | B     | A and B |
/// |-------|-------|---------|
/// | true  | true  | true    |
/// | true  | false | false   |
/// | true  | null  | null    |
/// | false | true  | false   |
/// | false | false | false   |
/// | false | null  | false   |
/// | null  | true  | null    |
/// | null  | false | false   |
/// | null  | null  | null    |
pub fn and(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        // If either is false, result is false
        (Value::Bool(false), _) | (_, Value::Bool(false)) => Ok(Value::Bool(false)),
        (Value::Bool(true), Value::Bool(true)) => Ok(Value::Bool(true)),
        (Value::Null | Value::Bool(true), Value::Null | Value::Bool(true)) => Ok(Value::Null),
        _ => Err(mismatch("and", "(bool, bool)", lhs, rhs)),
    }
}

/// Three-valued disjunction
///
/// Truth table:
/// | A     | B     | A or B  |
/// |-------|-------|---------|
/// | true  | true  | true    |
/// | true  | false | true    |
/// | true  | null  | true    |
/// | false | true  | true    |
/// | false | false | false   |
/// | false | null  | null    |
/// | null  | true  | true    |
/// | null  | false | null    |
/// | null  | null  | null    |
pub fn or(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Bool(true), _) | (_, Value::Bool(true)) => Ok(Value::Bool(true)),
        (Value::Bool(false), Value::Bool(false)) => Ok(Value::Bool(false)),
        (Value::Null | Value::Bool(false), Value::Null | Value::Bool(false)) => Ok(Value::Null),
        _ => Err(mismatch("or", "(bool, bool)", lhs, rhs)),
    }
}

/// Negation; null stays null
pub fn not(operand: &Value) -> EvalResult<Value> {
    match operand {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(EvalError::type_mismatch("not", "bool", other.type_name())),
    }
}
