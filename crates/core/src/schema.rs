//! Node class port schemas.
//!
//! A schema describes the declared input and output ports of one node
//! class, in declared order. The bypass transformer uses schemas to pair
//! output ports with same-typed inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One declared input port: its name and data type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDecl {
    pub name: String,
    /// Declared data type, e.g. `"IMAGE"` or `"LATENT"`.
    pub type_name: String,
}

impl PortDecl {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// The port schema of one node class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSchema {
    /// Required inputs, in declared order.
    #[serde(default)]
    pub required: Vec<PortDecl>,
    /// Optional inputs, in declared order.
    #[serde(default)]
    pub optional: Vec<PortDecl>,
    /// Output port data types, in declared order.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl PortSchema {
    /// All input declarations, required first, then optional.
    pub fn input_decls(&self) -> impl Iterator<Item = &PortDecl> {
        self.required.iter().chain(self.optional.iter())
    }
}

/// Schemas keyed by node class type.
///
/// Run-scoped: the correlator prefetches the classes a bypass pass needs
/// and discards the cache with the run.
pub type SchemaCache = BTreeMap<String, PortSchema>;
