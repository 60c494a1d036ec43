//! Core data model for the comfypool workspace.
//!
//! Workflow-graph types in the server wire shape, node port schemas, the
//! node-bypass transformer, and the flat job-error taxonomy.
//!
//! This crate has zero internal dependencies so that both the client and
//! the scheduler crates can build on it.

pub mod bypass;
pub mod error;
pub mod graph;
pub mod schema;

pub use bypass::{bypass_nodes, BypassError};
pub use error::JobError;
pub use graph::{InputValue, NodeSpec, WorkflowGraph};
pub use schema::{PortDecl, PortSchema, SchemaCache};
