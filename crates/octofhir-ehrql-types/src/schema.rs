//! Table schemas
//!
//! A schema maps column names to declared types plus validation constraints.
//! Constraints are checked when data is loaded into a database; the compilers only
//! look at the types.

use chrono::Datelike;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use crate::{EhrqlType, SchemaError, SchemaResult, Value};

/// Name of the implicit patient identifier column present in every table
pub const PATIENT_ID: &str = "patient_id";

/// Validation constraint on a column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// Value may not be null
    NotNull,
    /// Value must be one of a fixed list
    Categorical { values: Vec<Value> },
    /// Date must fall on the first day of a month
    FirstOfMonth,
    /// String must fully match the pattern
    Regex { pattern: String },
    /// Integer must lie in `[minimum, maximum]` and be a multiple of `step` from the minimum
    ClosedRange {
        minimum: i64,
        maximum: i64,
        step: i64,
    },
}

impl Constraint {
    pub fn categorical(values: impl IntoIterator<Item = Value>) -> Self {
        Self::Categorical {
            values: values.into_iter().collect(),
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::Regex {
            pattern: pattern.into(),
        }
    }

    pub fn range(minimum: i64, maximum: i64) -> Self {
        Self::ClosedRange {
            minimum,
            maximum,
            step: 1,
        }
    }

    /// Check one non-null value, returning a description of the violation
    fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (Self::NotNull, Value::Null) => Err("must not be null".to_string()),
            (_, Value::Null) | (Self::NotNull, _) => Ok(()),
            (Self::Categorical { values }, v) => {
                if values.contains(v) {
                    Ok(())
                } else {
                    Err(format!("{v} is not one of the allowed categories"))
                }
            }
            (Self::FirstOfMonth, Value::Date(d)) => {
                if d.day() == 1 {
                    Ok(())
                } else {
                    Err(format!("{} is not the first of a month", value))
                }
            }
            (Self::Regex { pattern }, v) => {
                let Some(text) = v.as_str() else {
                    return Err(format!("{v} is not a string"));
                };
                let re = Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;
                if re.is_match(text) {
                    Ok(())
                } else {
                    Err(format!("'{text}' does not match /{pattern}/"))
                }
            }
            (
                Self::ClosedRange {
                    minimum,
                    maximum,
                    step,
                },
                Value::Int(i),
            ) => {
                if i < minimum || i > maximum {
                    Err(format!("{i} is outside [{minimum}, {maximum}]"))
                } else if *step > 1 && (i - minimum) % step != 0 {
                    Err(format!("{i} is not a multiple of {step} from {minimum}"))
                } else {
                    Ok(())
                }
            }
            (constraint, v) => Err(format!("{constraint:?} cannot apply to {}", v.type_name())),
        }
    }
}

/// A declared column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub ty: EhrqlType,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Column {
    pub fn new(ty: EhrqlType) -> Self {
        Self {
            ty,
            constraints: Vec::new(),
        }
    }

    /// Add a constraint
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Whether values may be null
    pub fn nullable(&self) -> bool {
        !self.constraints.contains(&Constraint::NotNull)
    }

    /// Validate a value against the type and every constraint
    pub fn validate(&self, name: &str, value: &Value) -> SchemaResult<()> {
        value.check_type(&self.ty)?;
        for constraint in &self.constraints {
            constraint
                .check(value)
                .map_err(|message| SchemaError::constraint(name, message))?;
        }
        Ok(())
    }
}

/// Ordered column declarations of a table, excluding `patient_id`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    columns: IndexMap<String, Column>,
}

impl TableSchema {
    /// Build a schema, rejecting duplicate or reserved column names
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = (S, Column)>) -> SchemaResult<Self> {
        let mut map = IndexMap::new();
        for (name, column) in columns {
            let name = name.into();
            if name == PATIENT_ID {
                return Err(SchemaError::InvalidSchema(format!(
                    "'{PATIENT_ID}' is implicit and may not be declared"
                )));
            }
            if column.ty.is_set() {
                return Err(SchemaError::InvalidSchema(format!(
                    "column '{name}' may not have a set type"
                )));
            }
            if map.insert(name.clone(), column).is_some() {
                return Err(SchemaError::InvalidSchema(format!("duplicate column '{name}'")));
            }
        }
        Ok(Self { columns: map })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Validate a row given in declaration order
    pub fn validate_row(&self, values: &[Value]) -> SchemaResult<()> {
        if values.len() != self.columns.len() {
            return Err(SchemaError::InvalidRow {
                expected: self.columns.len(),
                found: values.len(),
            });
        }
        for ((name, column), value) in self.columns.iter().zip(values) {
            column.validate(name, value)?;
        }
        Ok(())
    }
}

impl PartialEq for TableSchema {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len() && self.columns.iter().eq(other.columns.iter())
    }
}

impl Eq for TableSchema {}

impl Hash for TableSchema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.columns.len().hash(state);
        for (name, column) in &self.columns {
            name.hash(state);
            column.hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn events_schema() -> TableSchema {
        TableSchema::new([
            ("date", Column::new(EhrqlType::Date)),
            (
                "value",
                Column::new(EhrqlType::Int).with_constraint(Constraint::range(0, 100)),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_schema_preserves_order() {
        let schema = events_schema();
        assert_eq!(schema.column_names().collect::<Vec<_>>(), vec!["date", "value"]);
        assert_eq!(schema.column("value").unwrap().ty, EhrqlType::Int);
        assert!(schema.column("missing").is_none());
    }

    #[test]
    fn test_schema_rejects_patient_id_and_duplicates() {
        let err = TableSchema::new([(PATIENT_ID, Column::new(EhrqlType::Int))]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidSchema(_)));

        let err = TableSchema::new([
            ("a", Column::new(EhrqlType::Int)),
            ("a", Column::new(EhrqlType::Str)),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidSchema(_)));
    }

    #[test]
    fn test_column_order_is_significant_for_equality() {
        let a = TableSchema::new([
            ("x", Column::new(EhrqlType::Int)),
            ("y", Column::new(EhrqlType::Int)),
        ])
        .unwrap();
        let b = TableSchema::new([
            ("y", Column::new(EhrqlType::Int)),
            ("x", Column::new(EhrqlType::Int)),
        ])
        .unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[rstest]
    #[case(Constraint::NotNull, Value::Null, false)]
    #[case(Constraint::NotNull, Value::str("x"), true)]
    #[case(Constraint::categorical([Value::str("M"), Value::str("F")]), Value::str("F"), true)]
    #[case(Constraint::categorical([Value::str("M"), Value::str("F")]), Value::str("X"), false)]
    #[case(Constraint::categorical([Value::str("M")]), Value::Null, true)]
    #[case(Constraint::regex("E[0-9]{3}"), Value::str("E123"), true)]
    #[case(Constraint::regex("E[0-9]{3}"), Value::str("E1234"), false)]
    #[case(Constraint::ClosedRange { minimum: 0, maximum: 10, step: 5 }, Value::Int(5), true)]
    #[case(Constraint::ClosedRange { minimum: 0, maximum: 10, step: 5 }, Value::Int(6), false)]
    #[case(Constraint::range(0, 10), Value::Int(11), false)]
    fn test_constraints(#[case] constraint: Constraint, #[case] value: Value, #[case] ok: bool) {
        let ty = match &value {
            Value::Int(_) => EhrqlType::Int,
            _ => EhrqlType::Str,
        };
        let column = Column::new(ty).with_constraint(constraint);
        assert_eq!(column.validate("c", &value).is_ok(), ok);
    }

    #[test]
    fn test_first_of_month() {
        let column = Column::new(EhrqlType::Date).with_constraint(Constraint::FirstOfMonth);
        assert!(column.validate("d", &Value::date(2021, 3, 1)).is_ok());
        let err = column.validate("d", &Value::date(2021, 3, 2)).unwrap_err();
        assert!(matches!(err, SchemaError::ConstraintViolation { ref column, .. } if column == "d"));
    }

    #[test]
    fn test_validate_row() {
        let schema = events_schema();
        assert!(schema.validate_row(&[Value::date(2020, 1, 1), Value::Int(5)]).is_ok());
        assert!(matches!(
            schema.validate_row(&[Value::Int(5)]),
            Err(SchemaError::InvalidRow { expected: 2, found: 1 })
        ));
        assert!(matches!(
            schema.validate_row(&[Value::Int(5), Value::Int(5)]),
            Err(SchemaError::TypeMismatch { .. })
        ));
        assert!(schema.validate_row(&[Value::Null, Value::Int(500)]).is_err());
    }

    #[test]
    fn test_nullable() {
        assert!(Column::new(EhrqlType::Int).nullable());
        assert!(!Column::new(EhrqlType::Int).with_constraint(Constraint::NotNull).nullable());
    }
}
