//! ehrQL query engine for Rust
//!
//! This crate re-exports the whole workspace:
//! - `types`: the value and type system, table schemas, calendar arithmetic
//! - `ir`: the query model (frames, series, datasets) with construction-time validation
//! - `model`: mapping logical tables onto backend tables
//! - `sql`: compilation to SQLite, MSSQL and Trino plus result retrieval
//! - `eval`: the in-memory reference engine
//!
//! # Example
//!
//! ```ignore
//! use octofhir_ehrql::{Catalog, Dataset, EngineConfig, SqlEngine, SqliteConnection};
//!
//! let mut catalog = Catalog::new();
//! let events = catalog.register_event_table("events", schema)?;
//!
//! let dataset = Dataset::new(events.exists_for_patient()?)?
//!     .with_variable("n", events.count_for_patient()?)?;
//!
//! let engine = SqlEngine::for_dialect("sqlite", provider, EngineConfig::new())?;
//! let rows = engine.get_results(&dataset, &mut SqliteConnection::open("data.db")?)?;
//! ```

// Re-export all public APIs from internal crates
pub use octofhir_ehrql_diagnostics as diagnostics;
pub use octofhir_ehrql_eval as eval;
pub use octofhir_ehrql_ir as ir;
pub use octofhir_ehrql_model as model;
pub use octofhir_ehrql_sql as sql;
pub use octofhir_ehrql_types as types;

// Convenience re-exports
pub use octofhir_ehrql_diagnostics::{EhrqlError, ErrorCode};
pub use octofhir_ehrql_eval::{InMemoryDatabase, InMemoryEngine};
pub use octofhir_ehrql_ir::{
    Aggregate, BinaryFn, Catalog, Dataset, Domain, Frame, Function, InlineRow, Position,
    QueryModelError, Series, UnaryFn,
};
pub use octofhir_ehrql_model::{DirectTableProvider, MappedTableProvider, TableProvider};
pub use octofhir_ehrql_sql::{EngineConfig, ReifyMode, SqlEngine, SqliteConnection};
pub use octofhir_ehrql_types::{Column, EhrqlType, ResultRow, TableSchema, Value};
