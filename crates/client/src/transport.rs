//! The transport contract consumed by the correlator and the pool.
//!
//! A [`Transport`] wraps one backend instance: workflow submission,
//! history and queue-snapshot retrieval, node class schemas, interrupt,
//! and a push-event stream. Connection lifecycle (framing, reconnection
//! backoff) lives behind this trait and is not this workspace's concern.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use comfypool_core::{PortSchema, WorkflowGraph};

use crate::push::PushEvent;

/// Response to a successful workflow submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i32,
}

/// One prompt's history entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Whether the server marked the execution completed.
    pub completed: bool,
    /// Outputs keyed by node id.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

/// Pending and running prompt ids, as reported by the server queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub pending: Vec<String>,
    #[serde(default)]
    pub running: Vec<String>,
}

impl QueueSnapshot {
    /// Whether the prompt appears in either queue section.
    pub fn contains(&self, prompt_id: &str) -> bool {
        self.pending.iter().any(|id| id == prompt_id)
            || self.running.iter().any(|id| id == prompt_id)
    }
}

/// Errors from the transport layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The request itself failed (network, DNS, TLS, etc.).
    #[error("Request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("Backend error ({status}): {body}")]
    Api {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// One backend instance, as seen by the correlator and the pool.
///
/// Push events arrive pre-decoded on a broadcast channel; one receiver
/// per job gives each run its own independently torn down subscription.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue a workflow for execution.
    async fn submit(&self, graph: &WorkflowGraph) -> Result<SubmitReceipt, TransportError>;

    /// Fetch the history entry for a prompt, if the server has one.
    async fn fetch_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryRecord>, TransportError>;

    /// Fetch the current pending/running queue snapshot.
    async fn fetch_queue_snapshot(&self) -> Result<QueueSnapshot, TransportError>;

    /// Fetch the port schema of a node class, if the server knows it.
    async fn fetch_port_schema(
        &self,
        class_type: &str,
    ) -> Result<Option<PortSchema>, TransportError>;

    /// Subscribe to this instance's push events.
    fn subscribe(&self) -> broadcast::Receiver<PushEvent>;

    /// Interrupt whatever is executing right now on this instance.
    ///
    /// Never invoked automatically by the pool or the correlator.
    async fn interrupt(&self) -> Result<(), TransportError>;
}
