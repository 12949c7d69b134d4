//! String and set operators
//!
//! Implements: contains, is_in

use octofhir_ehrql_types::Value;

use super::mismatch;
use crate::error::EvalResult;

/// Case-sensitive substring test
pub fn contains(haystack: &Value, needle: &Value) -> EvalResult<Value> {
    match (haystack, needle) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Str(haystack), Value::Str(needle)) => {
            Ok(Value::Bool(haystack.contains(needle.as_str())))
        }
        _ => Err(mismatch("contains", "(str, str)", haystack, needle)),
    }
}

/// Set membership; a null value is never known to be in or out of a set
pub fn is_in(value: &Value, set: &Value) -> EvalResult<Value> {
    match (value, set) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (value, Value::Set(set)) => Ok(Value::Bool(set.contains(value))),
        _ => Err(mismatch("is_in", "(value, set)", value, set)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_ehrql_types::{EhrqlType, TypedSet};

    fn codes() -> Value {
        Value::Set(
            TypedSet::new(
                EhrqlType::code("snomedct"),
                [Value::code("snomedct", "1"), Value::code("snomedct", "2")],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_contains() {
        let text = Value::str("Type 2 diabetes");
        assert_eq!(contains(&text, &Value::str("diabetes")).unwrap(), Value::Bool(true));
        assert_eq!(contains(&text, &Value::str("Diabetes")).unwrap(), Value::Bool(false));
        assert_eq!(contains(&Value::Null, &Value::str("x")).unwrap(), Value::Null);
    }

    #[test]
    fn test_is_in() {
        assert_eq!(
            is_in(&Value::code("snomedct", "2"), &codes()).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            is_in(&Value::code("snomedct", "3"), &codes()).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(is_in(&Value::Null, &codes()).unwrap(), Value::Null);
        let empty = Value::Set(TypedSet::empty(EhrqlType::Int));
        assert_eq!(is_in(&Value::Int(1), &empty).unwrap(), Value::Bool(false));
        assert!(is_in(&Value::Int(1), &Value::Int(1)).is_err());
    }
}
