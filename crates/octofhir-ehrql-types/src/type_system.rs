//! ehrQL Type System
//!
//! Every series carries exactly one of these types. There is deliberately no
//! top type: operations must always declare a concrete result type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The complete ehrQL type representation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "of")]
pub enum EhrqlType {
    /// Boolean (true/false/null)
    Bool,
    /// 64-bit signed integer
    Int,
    /// Double precision float
    Float,
    /// Unicode string
    Str,
    /// Calendar date
    Date,
    /// Code from the named coding system; codes from different systems never compare
    Code(String),
    /// Set of values of a single element type
    Set(Box<EhrqlType>),
}

impl EhrqlType {
    /// Create a code type for a coding system
    pub fn code(system: impl Into<String>) -> Self {
        Self::Code(system.into())
    }

    /// Create a set type
    pub fn set_of(element: EhrqlType) -> Self {
        Self::Set(Box::new(element))
    }

    /// Types usable as sort keys and in min/max
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            Self::Int | Self::Float | Self::Str | Self::Date | Self::Code(_)
        )
    }

    /// Int or Float
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }

    /// Element type of a set type
    pub fn element_type(&self) -> Option<&EhrqlType> {
        match self {
            Self::Set(inner) => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Display for EhrqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Str => write!(f, "str"),
            Self::Date => write!(f, "date"),
            Self::Code(system) => write!(f, "code<{system}>"),
            Self::Set(inner) => write!(f, "set<{inner}>"),
        }
    }
}
