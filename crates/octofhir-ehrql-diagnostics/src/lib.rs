//! ehrQL diagnostics and error handling
//!
//! This crate provides the shared error infrastructure for the query model, the SQL
//! engine and the in-memory engine: stable error codes and an umbrella error type that
//! every layer converts into.

mod error;
mod error_code;

pub use error::*;
pub use error_code::*;

/// Result type for ehrQL operations
pub type Result<T> = std::result::Result<T, EhrqlError>;
