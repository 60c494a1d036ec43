//! Workflow-graph node bypass.
//!
//! [`bypass_nodes`] elides a set of nodes from a graph while preserving
//! downstream data flow: each output port of a bypassed node is paired
//! with a same-typed input on that node, and every downstream reference
//! to the port is rewritten to that input's value. References to ports
//! with no typed match are deleted.
//!
//! The transform works on a clone; callers keep their original graph.
//! Schemas are looked up in a prefetched [`SchemaCache`] so the transform
//! itself never touches the network.

use crate::error::JobError;
use crate::graph::{InputValue, WorkflowGraph};
use crate::schema::{PortDecl, SchemaCache};

/// Errors from the bypass transform.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BypassError {
    /// A bypass target id does not exist in the graph.
    #[error("Node {0} not present in the workflow graph")]
    MissingNode(String),

    /// No schema was provided for a bypass target's node class.
    #[error("No port schema for node class {0}")]
    MissingSchema(String),
}

impl From<BypassError> for JobError {
    fn from(err: BypassError) -> Self {
        match err {
            BypassError::MissingNode(id) => JobError::MissingNode(id),
            BypassError::MissingSchema(class) => JobError::MissingNode(class),
        }
    }
}

/// Remove `targets` from a clone of `graph`, rewiring downstream links.
///
/// Targets are processed in caller order, so bypassing a chain works
/// transitively: once `B` is gone, a later bypass of `C` sees `C`'s
/// already-rewritten inputs.
///
/// Any unresolved target id or missing class schema aborts the whole
/// transformation.
pub fn bypass_nodes(
    graph: &WorkflowGraph,
    targets: &[String],
    schemas: &SchemaCache,
) -> Result<WorkflowGraph, BypassError> {
    let mut out = graph.clone();
    for target in targets {
        bypass_one(&mut out, target, schemas)?;
    }
    Ok(out)
}

fn bypass_one(
    graph: &mut WorkflowGraph,
    target: &str,
    schemas: &SchemaCache,
) -> Result<(), BypassError> {
    let (class_type, inputs) = match graph.nodes.get(target) {
        Some(node) => (node.class_type.clone(), node.inputs.clone()),
        None => return Err(BypassError::MissingNode(target.to_string())),
    };
    let schema = schemas
        .get(&class_type)
        .ok_or_else(|| BypassError::MissingSchema(class_type.clone()))?;

    // Pair each output port, in declared order, with the first
    // not-yet-consumed same-typed input (required decls before optional).
    let decls: Vec<&PortDecl> = schema.input_decls().collect();
    let mut consumed = vec![false; decls.len()];
    let passthrough: Vec<Option<InputValue>> = schema
        .outputs
        .iter()
        .map(|output_type| {
            let matched = decls.iter().enumerate().find(|(i, decl)| {
                !consumed[*i]
                    && decl.type_name == *output_type
                    && inputs.contains_key(&decl.name)
            });
            matched.map(|(i, decl)| {
                consumed[i] = true;
                inputs[&decl.name].clone()
            })
        })
        .collect();

    // Rewrite or drop every downstream reference to the bypassed node.
    for (id, spec) in graph.nodes.iter_mut() {
        if id == target {
            continue;
        }
        let mut rewrites: Vec<(String, Option<InputValue>)> = Vec::new();
        for (name, value) in spec.inputs.iter() {
            if let InputValue::Link { node, port } = value {
                if node == target {
                    let replacement =
                        passthrough.get(*port as usize).and_then(Clone::clone);
                    rewrites.push((name.clone(), replacement));
                }
            }
        }
        for (name, replacement) in rewrites {
            match replacement {
                Some(value) => {
                    spec.inputs.insert(name, value);
                }
                None => {
                    spec.inputs.remove(&name);
                }
            }
        }
    }

    graph.nodes.remove(target);
    Ok(())
}
