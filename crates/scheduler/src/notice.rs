//! Pool observability notices.
//!
//! Every state transition the pool makes is mirrored onto a broadcast
//! channel as a timestamped [`PoolNotice`]. Consumers subscribe via
//! `ClientPool::subscribe`; dropping the receiver is the unsubscribe.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    ClientAdded,
    ClientRemoved,
    ModeChanged,
    JobEnqueued,
    JobExecuting,
    JobExecuted,
    JobFailed,
    ClientConnected,
    ClientDisconnected,
    ClientReconnected,
    HaveWork,
    Idle,
    /// Reserved for resource monitoring; never emitted by the pool
    /// itself.
    ResourceSample,
}

/// One pool state transition.
#[derive(Debug, Clone, Serialize)]
pub struct PoolNotice {
    pub kind: NoticeKind,
    /// Position in registration order, for client-scoped notices.
    pub client_index: Option<usize>,
    pub client_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl PoolNotice {
    pub(crate) fn new(kind: NoticeKind) -> Self {
        Self {
            kind,
            client_index: None,
            client_id: None,
            at: Utc::now(),
        }
    }

    pub(crate) fn for_client(kind: NoticeKind, index: usize, id: &str) -> Self {
        Self {
            kind,
            client_index: Some(index),
            client_id: Some(id.to_string()),
            at: Utc::now(),
        }
    }
}
