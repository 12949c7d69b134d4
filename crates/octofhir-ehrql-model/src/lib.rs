//! ehrQL backend data model
//!
//! This crate provides:
//! - The `TableProvider` trait the compilers use to locate backend tables
//! - `TableExpression`, the backend construct a logical table resolves to
//! - A direct provider (logical name = physical table) and a mapped provider
//!   configured from JSON or at runtime

pub mod provider;
pub mod registry;

pub use provider::*;
pub use registry::*;
