//! Output-key to node-id mapping for one job.
//!
//! Built once per run from caller-supplied pairs and validated up front:
//! mapping problems are the only synchronous failures a run can have.

/// Malformed caller-supplied output mapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// The mapping has no entries.
    #[error("Output mapping is empty")]
    Empty,

    /// The same logical key appears twice.
    #[error("Duplicate output key: {0}")]
    DuplicateKey(String),

    /// The same node id is claimed by two logical keys. Unsupported:
    /// flagged to the caller rather than resolved last-write-wins.
    #[error("Node {0} is mapped by more than one output key")]
    SharedNode(String),
}

/// An ordered `logical key -> output node id` table.
#[derive(Debug, Clone)]
pub struct OutputMapping {
    entries: Vec<(String, String)>,
}

impl OutputMapping {
    /// Validate and build a mapping from `(key, node_id)` pairs.
    pub fn new<I, K, N>(pairs: I) -> Result<Self, MappingError>
    where
        I: IntoIterator<Item = (K, N)>,
        K: Into<String>,
        N: Into<String>,
    {
        let entries: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(key, node)| (key.into(), node.into()))
            .collect();

        if entries.is_empty() {
            return Err(MappingError::Empty);
        }
        for (i, (key, node)) in entries.iter().enumerate() {
            for (other_key, other_node) in &entries[..i] {
                if key == other_key {
                    return Err(MappingError::DuplicateKey(key.clone()));
                }
                if node == other_node {
                    return Err(MappingError::SharedNode(node.clone()));
                }
            }
        }

        Ok(Self { entries })
    }

    /// Number of requested outputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(key, node_id)` pairs in caller order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, n)| (k.as_str(), n.as_str()))
    }

    /// The node ids the caller wants outputs from.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, n)| n.as_str())
    }

    /// The logical key a node id is mapped under, if any.
    pub fn key_for(&self, node: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, n)| n == node)
            .map(|(k, _)| k.as_str())
    }
}
