//! ehrQL query model
//!
//! This crate defines the intermediate representation shared by every engine:
//! table-shaped [`Frame`] nodes and column-shaped [`Series`] nodes. Nodes are
//! immutable, reference counted and structurally compared, so identical sub-graphs
//! built independently are interchangeable (and compile once).
//!
//! All domain and type rules are enforced when a node is built. An invalid graph
//! can't be constructed, so engines treat any violation they encounter as an
//! internal error rather than a user error.

mod aggregate;
mod dataset;
mod domain;
mod error;
mod function;
pub mod graph;
mod node;
pub mod transform;

pub use aggregate::*;
pub use dataset::*;
pub use domain::*;
pub use error::*;
pub use function::*;
pub use node::*;

pub use octofhir_ehrql_types as types;
