//! The flat job-error taxonomy.
//!
//! Every way a submitted job can fail terminally maps to exactly one
//! [`JobError`] variant. The correlator reports these through its outcome
//! and event channel; it never panics on them.

/// Terminal failure reasons for one submitted job.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    /// The workflow submission call itself failed.
    #[error("Workflow submission failed: {0}")]
    SubmitFailed(String),

    /// A bypass target id or its node class schema could not be resolved.
    #[error("Unknown node or node class: {0}")]
    MissingNode(String),

    /// The transport connection dropped while the job was in flight.
    #[error("Transport connection lost")]
    Disconnected,

    /// The job vanished from the server queue without completing.
    #[error("Job left the server queue without completing")]
    WentMissing,

    /// The server reported a cache hit but no completed history record.
    #[error("Cached execution has no completed history record")]
    FailedCache,

    /// Execution finished without producing the expected outputs.
    #[error("Execution finished without the expected outputs")]
    ExecutionFailed,

    /// The server reported an execution error; carries its raw payload.
    #[error("Server reported an execution error")]
    ServerReported(serde_json::Value),

    /// Execution was interrupted on the server.
    #[error("Execution was interrupted on the server")]
    Interrupted,
}

impl JobError {
    /// Stable short name, for structured logs and notices.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubmitFailed(_) => "submit_failed",
            Self::MissingNode(_) => "missing_node",
            Self::Disconnected => "disconnected",
            Self::WentMissing => "went_missing",
            Self::FailedCache => "failed_cache",
            Self::ExecutionFailed => "execution_failed",
            Self::ServerReported(_) => "server_reported",
            Self::Interrupted => "interrupted",
        }
    }
}
