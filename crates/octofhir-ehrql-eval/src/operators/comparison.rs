//! Comparison operators
//!
//! Implements: ==, !=, <, <=, >, >=, maximum_of, minimum_of

use octofhir_ehrql_ir::BinaryFn;
use octofhir_ehrql_types::Value;
use std::cmp::Ordering;
use std::mem::discriminant;

use super::mismatch;
use crate::error::{EvalError, EvalResult};

/// Order two non-null values of the same type
fn order(operation: &str, lhs: &Value, rhs: &Value) -> EvalResult<Ordering> {
    if discriminant(lhs) != discriminant(rhs) {
        return Err(mismatch(operation, "two values of the same type", lhs, rhs));
    }
    match (lhs, rhs) {
        // numeric rather than total order, so 0.0 == -0.0
        (Value::Float(a), Value::Float(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| EvalError::internal(format!("cannot compare {a} with {b}"))),
        _ => Ok(lhs.cmp(rhs)),
    }
}

/// Compare two values; null if either side is null
pub fn compare(op: BinaryFn, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    let ordering = order(op.name(), lhs, rhs)?;
    let result = match op {
        BinaryFn::Eq => ordering == Ordering::Equal,
        BinaryFn::Ne => ordering != Ordering::Equal,
        BinaryFn::Lt => ordering == Ordering::Less,
        BinaryFn::Le => ordering != Ordering::Greater,
        BinaryFn::Gt => ordering == Ordering::Greater,
        BinaryFn::Ge => ordering != Ordering::Less,
        other => {
            return Err(EvalError::internal(format!(
                "{} is not a comparison",
                other.name()
            )));
        }
    };
    Ok(Value::Bool(result))
}

/// Largest non-null argument; null only when every argument is null
pub fn maximum_of(args: &[Value]) -> EvalResult<Value> {
    extreme("maximum_of", args, Ordering::Greater)
}

/// Smallest non-null argument; null only when every argument is null
pub fn minimum_of(args: &[Value]) -> EvalResult<Value> {
    extreme("minimum_of", args, Ordering::Less)
}

fn extreme(operation: &str, args: &[Value], wanted: Ordering) -> EvalResult<Value> {
    let mut best: Option<&Value> = None;
    for arg in args.iter().filter(|v| !v.is_null()) {
        best = match best {
            Some(current) if order(operation, arg, current)? != wanted => Some(current),
            _ => Some(arg),
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BinaryFn::Eq, Value::Int(1), Value::Int(1), Value::Bool(true))]
    #[case(BinaryFn::Ne, Value::str("a"), Value::str("b"), Value::Bool(true))]
    #[case(BinaryFn::Lt, Value::date(2020, 1, 1), Value::date(2020, 1, 2), Value::Bool(true))]
    #[case(BinaryFn::Ge, Value::Float(1.5), Value::Float(2.0), Value::Bool(false))]
    #[case(BinaryFn::Eq, Value::Float(0.0), Value::Float(-0.0), Value::Bool(true))]
    #[case(BinaryFn::Eq, Value::Null, Value::Null, Value::Null)]
    #[case(BinaryFn::Le, Value::Int(3), Value::Null, Value::Null)]
    fn test_compare(
        #[case] op: BinaryFn,
        #[case] lhs: Value,
        #[case] rhs: Value,
        #[case] expected: Value,
    ) {
        assert_eq!(compare(op, &lhs, &rhs).unwrap(), expected);
    }

    #[test]
    fn test_compare_rejects_mixed_types() {
        assert!(compare(BinaryFn::Eq, &Value::Int(1), &Value::str("1")).is_err());
    }

    #[test]
    fn test_extremes_skip_nulls() {
        let args = [Value::Null, Value::Int(4), Value::Int(9), Value::Null];
        assert_eq!(maximum_of(&args).unwrap(), Value::Int(9));
        assert_eq!(minimum_of(&args).unwrap(), Value::Int(4));
        assert_eq!(maximum_of(&[Value::Null, Value::Null]).unwrap(), Value::Null);
    }
}
