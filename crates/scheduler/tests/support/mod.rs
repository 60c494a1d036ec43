//! In-memory transport fake and pool test helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::timeout;

use comfypool_client::push::{ExecutedData, ExecutionSuccessData};
use comfypool_client::{
    HistoryRecord, PushEvent, QueueSnapshot, SubmitReceipt, Transport, TransportError,
};
use comfypool_core::{PortSchema, WorkflowGraph};
use comfypool_scheduler::{ClientPool, NoticeKind, PoolNotice};

/// A scripted in-memory [`Transport`] standing in for one backend.
pub struct FakeTransport {
    prompt_id: String,
    push_tx: broadcast::Sender<PushEvent>,
    submits: Mutex<usize>,
    history: Mutex<HashMap<String, HistoryRecord>>,
}

impl FakeTransport {
    pub fn new(prompt_id: &str) -> Arc<Self> {
        let (push_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            prompt_id: prompt_id.to_string(),
            push_tx,
            submits: Mutex::new(0),
            history: Mutex::new(HashMap::new()),
        })
    }

    pub fn emit(&self, event: PushEvent) {
        let _ = self.push_tx.send(event);
    }

    pub fn submit_count(&self) -> usize {
        *self.submits.lock().unwrap()
    }

    pub async fn wait_for_submit(&self) {
        for _ in 0..500 {
            if self.submit_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("submit was never called");
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn submit(&self, _graph: &WorkflowGraph) -> Result<SubmitReceipt, TransportError> {
        *self.submits.lock().unwrap() += 1;
        Ok(SubmitReceipt {
            prompt_id: self.prompt_id.clone(),
            number: 0,
        })
    }

    async fn fetch_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryRecord>, TransportError> {
        Ok(self.history.lock().unwrap().get(prompt_id).cloned())
    }

    async fn fetch_queue_snapshot(&self) -> Result<QueueSnapshot, TransportError> {
        // Submitted prompts stay visible so correlator watchdog rounds
        // never mistake them for lost jobs.
        let running = if self.submit_count() > 0 {
            vec![self.prompt_id.clone()]
        } else {
            Vec::new()
        };
        Ok(QueueSnapshot {
            pending: Vec::new(),
            running,
        })
    }

    async fn fetch_port_schema(
        &self,
        _class_type: &str,
    ) -> Result<Option<PortSchema>, TransportError> {
        Ok(None)
    }

    fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.push_tx.subscribe()
    }

    async fn interrupt(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

// ---- push constructors ----

/// A completion push; the pool unlocks on it regardless of prompt id.
pub fn success() -> PushEvent {
    PushEvent::ExecutionSuccess(ExecutionSuccessData {
        prompt_id: "job".to_string(),
    })
}

pub fn executed(prompt_id: &str, node: &str, output: serde_json::Value) -> PushEvent {
    PushEvent::Executed(ExecutedData {
        prompt_id: prompt_id.to_string(),
        node: node.to_string(),
        output,
    })
}

// ---- polling helpers ----

/// Keep emitting status pushes until the watcher marks the client
/// online with the wanted queue depth.
pub async fn report_depth(pool: &ClientPool, fake: &Arc<FakeTransport>, id: &str, depth: u32) {
    for _ in 0..500 {
        fake.emit(PushEvent::status(depth));
        tokio::time::sleep(Duration::from_millis(2)).await;
        let seen = pool.client_states().iter().any(|(client_id, state)| {
            client_id == id && state.online && state.queue_remaining == depth
        });
        if seen {
            return;
        }
    }
    panic!("client {id} never reported depth {depth}");
}

pub async fn bring_online(pool: &ClientPool, fake: &Arc<FakeTransport>, id: &str) {
    report_depth(pool, fake, id, 0).await;
}

/// Wait for the next notice of the given kind, skipping others.
pub async fn next_notice(
    rx: &mut broadcast::Receiver<PoolNotice>,
    kind: NoticeKind,
) -> PoolNotice {
    timeout(Duration::from_secs(2), async {
        loop {
            let notice = rx.recv().await.expect("notice channel closed");
            if notice.kind == kind {
                return notice;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("notice {kind:?} never arrived"))
}
