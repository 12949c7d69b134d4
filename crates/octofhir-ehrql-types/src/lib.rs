//! ehrQL type system
//!
//! This crate defines the types shared by the query model and both engines:
//! - `EhrqlType`: the closed set of series value types
//! - `Value`: runtime values, including type-strict literal sets
//! - `TableSchema`: column declarations with validation constraints
//! - `dates`: calendar arithmetic with the month-overflow rule

pub mod dates;
pub mod error;
pub mod schema;
pub mod type_system;
pub mod value;

pub use error::{SchemaError, SchemaResult};
pub use schema::{Column, Constraint, PATIENT_ID, TableSchema};
pub use type_system::EhrqlType;
pub use value::{Code, ResultRow, TypedSet, Value};
