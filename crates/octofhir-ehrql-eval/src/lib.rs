//! ehrQL in-memory engine
//!
//! This crate evaluates query-model datasets against data held in memory. It is
//! the reference semantics for every SQL dialect: given the same rows, a SQL
//! engine must return exactly what this engine returns.
//!
//! - **Logical operators**: and, or, not with three-valued logic
//! - **Comparison operators**: ==, !=, <, <=, >, >=, maximum_of, minimum_of
//! - **Arithmetic operators**: +, -, *, /, //, negation and casts
//! - **Date operators**: parts, truncation, shifting and differences
//! - **Aggregates**: exists, count, min, max, sum, mean, count_distinct,
//!   combine_as_set and count_episodes
//!
//! # Example
//!
//! ```ignore
//! use octofhir_ehrql_eval::{InMemoryDatabase, InMemoryEngine};
//!
//! let mut db = InMemoryDatabase::new();
//! db.add_table(&events)?;
//! db.insert("events", 1, [Value::date(2020, 1, 1)])?;
//!
//! let rows = InMemoryEngine::new(&db).get_results(&dataset)?;
//! ```
//!
//! # Three-Valued Logic
//!
//! - `and`: false dominates (null and false = false)
//! - `or`: true dominates (null or true = true)
//! - Only rows whose condition is exactly true survive a filter, and only
//!   patients whose population value is exactly true appear in the results

pub mod database;
pub mod engine;
pub mod error;
pub mod operators;

pub use database::{InMemoryDatabase, TableData, TableRow};
pub use engine::InMemoryEngine;
pub use error::{EvalError, EvalResult};
