//! Arithmetic operators
//!
//! Implements: +, -, *, /, //, negate, as_int, as_float
//!
//! Integer overflow and division by zero both produce null rather than an error,
//! matching what the SQL engines return for the same inputs.

use octofhir_ehrql_types::Value;

use super::mismatch;
use crate::error::{EvalError, EvalResult};

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn checked(
    operation: &str,
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => Ok(int_op(*a, *b).map_or(Value::Null, Value::Int)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        _ => Err(mismatch(operation, "two values of the same numeric type", lhs, rhs)),
    }
}

pub fn add(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    checked("+", lhs, rhs, i64::checked_add, |a, b| a + b)
}

pub fn subtract(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    checked("-", lhs, rhs, i64::checked_sub, |a, b| a - b)
}

pub fn multiply(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    checked("*", lhs, rhs, i64::checked_mul, |a, b| a * b)
}

/// Division with a float result; dividing by zero gives null
pub fn true_divide(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    let (Some(a), Some(b)) = (numeric(lhs), numeric(rhs)) else {
        return Err(mismatch("/", "(numeric, numeric)", lhs, rhs));
    };
    if b == 0.0 {
        return Ok(Value::Null);
    }
    Ok(Value::Float(a / b))
}

/// Division rounded towards negative infinity; dividing by zero gives null
pub fn floor_divide(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Ok(Value::Null);
            }
            let Some(quotient) = a.checked_div(*b) else {
                return Ok(Value::Null);
            };
            let floored = if a % b != 0 && ((*a < 0) != (*b < 0)) {
                quotient - 1
            } else {
                quotient
            };
            Ok(Value::Int(floored))
        }
        _ => {
            let (Some(a), Some(b)) = (numeric(lhs), numeric(rhs)) else {
                return Err(mismatch("//", "(numeric, numeric)", lhs, rhs));
            };
            if b == 0.0 {
                return Ok(Value::Null);
            }
            Ok(float_to_int((a / b).floor()))
        }
    }
}

pub fn negate(operand: &Value) -> EvalResult<Value> {
    match operand {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(i.checked_neg().map_or(Value::Null, Value::Int)),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(EvalError::type_mismatch("negate", "numeric", other.type_name())),
    }
}

/// Truncating conversion; out-of-range floats give null
fn float_to_int(value: f64) -> Value {
    let truncated = value.trunc();
    if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
        Value::Int(truncated as i64)
    } else {
        Value::Null
    }
}

/// Convert to an integer, truncating floats towards zero
pub fn cast_to_int(operand: &Value) -> EvalResult<Value> {
    match operand {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => Ok(float_to_int(*f)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        other => Err(EvalError::type_mismatch("as_int", "int, float or bool", other.type_name())),
    }
}

pub fn cast_to_float(operand: &Value) -> EvalResult<Value> {
    match operand {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        other => Err(EvalError::type_mismatch(
            "as_float",
            "int, float or bool",
            other.type_name(),
        )),
    }
}
