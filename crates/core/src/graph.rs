//! Workflow-graph types in the server wire shape.
//!
//! A workflow is a JSON object mapping node ids to node specs:
//!
//! ```json
//! {
//!   "4": {
//!     "class_type": "KSampler",
//!     "inputs": {"seed": 42, "model": ["1", 0]}
//!   }
//! }
//! ```
//!
//! An input value is either a literal or a link to another node's output
//! port. On the wire a link is a two-element `[node_id, port_index]`
//! array; that shape is reserved by the backend, so any other JSON value
//! is a literal.

use std::collections::BTreeMap;

use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A workflow graph: a DAG of node specs keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    pub nodes: BTreeMap<String, NodeSpec>,
}

impl WorkflowGraph {
    /// Look up a node spec by id.
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    /// Insert a node spec, replacing any existing node with the same id.
    pub fn insert(&mut self, id: impl Into<String>, spec: NodeSpec) {
        self.nodes.insert(id.into(), spec);
    }
}

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Server-side node class, e.g. `"KSampler"`.
    pub class_type: String,
    /// Named inputs: literals or links to upstream outputs.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,
}

impl NodeSpec {
    /// Create a node spec with no inputs.
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: BTreeMap::new(),
        }
    }

    /// Builder-style helper to attach an input.
    pub fn with_input(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }
}

/// The value of one node input.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// A plain JSON literal (number, string, object, ...).
    Literal(serde_json::Value),
    /// A reference to output `port` of node `node`.
    Link { node: String, port: u32 },
}

impl InputValue {
    /// Shorthand for a literal input.
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Shorthand for a link input.
    pub fn link(node: impl Into<String>, port: u32) -> Self {
        Self::Link {
            node: node.into(),
            port,
        }
    }

    fn from_wire(value: serde_json::Value) -> Self {
        if let serde_json::Value::Array(items) = &value {
            if items.len() == 2 {
                if let (serde_json::Value::String(node), Some(port)) =
                    (&items[0], items[1].as_u64())
                {
                    return Self::Link {
                        node: node.clone(),
                        port: port as u32,
                    };
                }
            }
        }
        Self::Literal(value)
    }
}

impl Serialize for InputValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Literal(value) => value.serialize(serializer),
            Self::Link { node, port } => {
                let mut tuple = serializer.serialize_tuple(2)?;
                tuple.serialize_element(node)?;
                tuple.serialize_element(port)?;
                tuple.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for InputValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_wire(value))
    }
}
