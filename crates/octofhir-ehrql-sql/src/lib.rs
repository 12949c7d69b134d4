//! ehrQL SQL engine
//!
//! Compiles a [`Dataset`](octofhir_ehrql_ir::Dataset) into a sequence of SQL
//! statements for one dialect and runs them over a [`Connection`]:
//!
//! - [`compiler`] turns query-model nodes into a small SQL tree ([`sql_ast`]),
//!   reifying aggregates and picks as intermediate tables ([`generated`])
//! - [`resolver`] orders the setup and cleanup of those tables
//! - [`writer`] and [`dialect`] render the tree as SQL text
//! - [`retrieval`] executes the statements with retries and batching

pub mod compiler;
pub mod config;
pub mod dialect;
pub mod error;
pub mod generated;
pub mod resolver;
pub mod retrieval;
pub mod sql_ast;
pub mod sqlite;
pub mod writer;

pub use compiler::{CompiledDataset, SqlEngine};
pub use config::EngineConfig;
pub use dialect::{Dialect, MssqlDialect, SqliteDialect, TrinoDialect, dialect_registry, get_dialect};
pub use error::{
    CompileResult, DatabaseError, DatabaseErrorKind, ExecResult, ExecutionError, SqlError,
};
pub use generated::{GeneratedTable, ReifyMode, Statement, TableDefinition};
pub use retrieval::{BatchFetcher, Connection, RawValue, RetryPolicy, execute};
pub use sqlite::SqliteConnection;
