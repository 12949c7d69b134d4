//! ehrQL Value types - runtime representation of series values
//!
//! Values are shared by literal IR nodes, the in-memory engine and SQL result
//! decoding. Equality, ordering and hashing are structural and type-strict:
//! `Bool(true)` never equals `Int(1)`, and two sets are equal only when their
//! declared element types are equal too.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{EhrqlType, SchemaError, SchemaResult};

/// The primary value type for ehrQL runtime values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Missing value
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    Code(Code),
    Set(TypedSet),
}

impl Value {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn code(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Code(Code::new(system, code))
    }

    /// Build a date value, panicking on an invalid calendar date. Intended for fixtures.
    pub fn date(year: i32, month: u32, day: u32) -> Self {
        match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => Self::Date(date),
            None => panic!("invalid date {year}-{month}-{day}"),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of Int or Float values
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Code(c) => Some(&c.code),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&TypedSet> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value may be stored in a series of the given type.
    ///
    /// Null conforms to every type.
    pub fn conforms_to(&self, ty: &EhrqlType) -> bool {
        match (self, ty) {
            (Self::Null, _) => true,
            (Self::Bool(_), EhrqlType::Bool) => true,
            (Self::Int(_), EhrqlType::Int) => true,
            (Self::Float(_), EhrqlType::Float) => true,
            (Self::Str(_), EhrqlType::Str) => true,
            (Self::Date(_), EhrqlType::Date) => true,
            (Self::Code(code), EhrqlType::Code(system)) => &code.system == system,
            (Self::Set(set), EhrqlType::Set(element)) => set.element_type() == element.as_ref(),
            _ => false,
        }
    }

    /// Check conformance, returning a type mismatch error on failure
    pub fn check_type(&self, ty: &EhrqlType) -> SchemaResult<()> {
        if self.conforms_to(ty) {
            Ok(())
        } else {
            Err(SchemaError::type_mismatch(ty.to_string(), self.type_name()))
        }
    }

    /// Name of this value's type, for error messages
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(_) => "bool".to_string(),
            Self::Int(_) => "int".to_string(),
            Self::Float(_) => "float".to_string(),
            Self::Str(_) => "str".to_string(),
            Self::Date(_) => "date".to_string(),
            Self::Code(code) => format!("code<{}>", code.system),
            Self::Set(set) => format!("set<{}>", set.element_type()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Str(_) => 4,
            Self::Date(_) => 5,
            Self::Code(_) => 6,
            Self::Set(_) => 7,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order used for sorting and tie-breaking: NULL sorts before everything,
/// values of different types order by type, floats use IEEE total ordering.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Code(a), Self::Code(b)) => a.cmp(b),
            (Self::Set(a), Self::Set(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
            Self::Date(d) => d.hash(state),
            Self::Code(c) => c.hash(state),
            Self::Set(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Code(c) => write!(f, "{c}"),
            Self::Set(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Codes
// ============================================================================

/// Code from a coding system. The system is part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Code {
    pub system: String,
    pub code: String,
}

impl Code {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            code: code.into(),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.system, self.code)
    }
}

// ============================================================================
// Typed sets
// ============================================================================

/// A set literal that remembers its declared element type.
///
/// Elements are kept sorted and de-duplicated so structurally equal sets have
/// identical representations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypedSet {
    element_type: EhrqlType,
    values: Vec<Value>,
}

impl TypedSet {
    /// Create a set, checking every element against the element type.
    pub fn new(
        element_type: EhrqlType,
        values: impl IntoIterator<Item = Value>,
    ) -> SchemaResult<Self> {
        if element_type.is_set() {
            return Err(SchemaError::InvalidLiteral(
                "sets of sets are not supported".to_string(),
            ));
        }
        let mut values: Vec<Value> = values.into_iter().collect();
        for value in &values {
            if value.is_null() {
                return Err(SchemaError::InvalidLiteral(
                    "sets may not contain null".to_string(),
                ));
            }
            value.check_type(&element_type)?;
        }
        values.sort();
        values.dedup();
        Ok(Self {
            element_type,
            values,
        })
    }

    pub fn empty(element_type: EhrqlType) -> Self {
        Self {
            element_type,
            values: Vec::new(),
        }
    }

    pub fn element_type(&self) -> &EhrqlType {
        &self.element_type
    }

    /// Type of the set itself
    pub fn set_type(&self) -> EhrqlType {
        EhrqlType::set_of(self.element_type.clone())
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.values.binary_search(value).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

impl fmt::Display for TypedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, "}}")
    }
}

// ============================================================================
// Results
// ============================================================================

/// One output row of a dataset: the patient and one value per variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub patient_id: i64,
    pub values: IndexMap<String, Value>,
}

impl ResultRow {
    pub fn new(patient_id: i64) -> Self {
        Self {
            patient_id,
            values: IndexMap::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Value of a variable, or None if the row has no such variable
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}
