//! Typed push notifications and their wire parser.
//!
//! The backend sends JSON messages over its push channel with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`PushEvent`] enum. The `Connected`,
//! `Disconnected` and `PreviewFrame` variants never appear on the JSON
//! wire; the transport injects them for connection lifecycle changes and
//! binary preview frames.

use serde::{Deserialize, Serialize};

/// All push notifications a transport can deliver.
///
/// Deserialized via the internally-tagged `"type"` field with associated
/// `"data"` content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// Server status broadcast (queue depth, etc.). Job-independent.
    Status(StatusData),

    /// A specific node is executing (or the prompt finished when `node`
    /// is `None`). Signals a live, uncached run.
    Executing(ExecutingData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// Step-level progress from a long-running node.
    Progress(ProgressData),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// The whole prompt finished successfully.
    ExecutionSuccess(ExecutionSuccessData),

    /// Execution failed with a server-side error.
    ExecutionError(ExecutionErrorData),

    /// Execution was interrupted on the server.
    ExecutionInterrupted(ExecutionInterruptedData),

    /// A binary preview frame arrived (payload dropped by the transport).
    PreviewFrame,

    /// The transport connection is up and the server is ready.
    Connected,

    /// The transport connection dropped.
    Disconnected,
}

/// Queue status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: u32,
}

/// Payload for `executing` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutingData {
    pub prompt_id: String,
    /// `None` means execution of the prompt has completed.
    pub node: Option<String>,
}

/// Payload for `executed` events (one node's output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedData {
    pub prompt_id: String,
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    pub output: serde_json::Value,
}

/// Payload for `progress` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: u32,
    /// Total number of steps.
    pub max: u32,
    /// Not sent by older servers.
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_cached` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node ids whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `execution_success` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSuccessData {
    pub prompt_id: String,
}

/// Payload for `execution_error` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_type: String,
    pub exception_message: String,
}

/// Payload for `execution_interrupted` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInterruptedData {
    pub prompt_id: String,
}

impl PushEvent {
    /// Build a `Status` event; shorthand for the nested wire shape.
    pub fn status(queue_remaining: u32) -> Self {
        Self::Status(StatusData {
            status: QueueStatus {
                exec_info: ExecInfo { queue_remaining },
            },
        })
    }

    /// The reported queue depth, for `Status` events.
    pub fn queue_remaining(&self) -> Option<u32> {
        match self {
            Self::Status(data) => Some(data.status.exec_info.queue_remaining),
            _ => None,
        }
    }
}

/// Parse a push-channel text frame into a typed event.
///
/// Returns `Err` for malformed JSON or unknown `type` values. Callers
/// should log unknown types and continue.
pub fn parse_push(text: &str) -> Result<PushEvent, serde_json::Error> {
    serde_json::from_str(text)
}
