//! In-memory transport fake for correlator tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use comfypool_client::push::{
    ExecutedData, ExecutingData, ExecutionCachedData, ExecutionErrorData,
    ExecutionInterruptedData, ExecutionSuccessData,
};
use comfypool_client::{
    HistoryRecord, PushEvent, QueueSnapshot, SubmitReceipt, Transport, TransportError,
};
use comfypool_core::{PortSchema, WorkflowGraph};

/// A scripted in-memory [`Transport`].
///
/// Tests drive it by calling [`FakeTransport::emit`] after the run under
/// test has submitted (see [`FakeTransport::wait_for_submit`]).
pub struct FakeTransport {
    prompt_id: String,
    push_tx: broadcast::Sender<PushEvent>,
    submit_error: Mutex<Option<TransportError>>,
    submitted: Mutex<Vec<WorkflowGraph>>,
    history: Mutex<HashMap<String, HistoryRecord>>,
    snapshot: Mutex<QueueSnapshot>,
    schemas: Mutex<HashMap<String, PortSchema>>,
}

impl FakeTransport {
    pub fn new(prompt_id: &str) -> Arc<Self> {
        let (push_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            prompt_id: prompt_id.to_string(),
            push_tx,
            submit_error: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            snapshot: Mutex::new(QueueSnapshot::default()),
            schemas: Mutex::new(HashMap::new()),
        })
    }

    /// Deliver a push to every live subscriber.
    pub fn emit(&self, event: PushEvent) {
        let _ = self.push_tx.send(event);
    }

    pub fn fail_submit(&self, err: TransportError) {
        *self.submit_error.lock().unwrap() = Some(err);
    }

    pub fn set_history(&self, prompt_id: &str, record: HistoryRecord) {
        self.history
            .lock()
            .unwrap()
            .insert(prompt_id.to_string(), record);
    }

    pub fn set_snapshot(&self, pending: &[&str], running: &[&str]) {
        *self.snapshot.lock().unwrap() = QueueSnapshot {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            running: running.iter().map(|s| s.to_string()).collect(),
        };
    }

    pub fn add_schema(&self, class_type: &str, schema: PortSchema) {
        self.schemas
            .lock()
            .unwrap()
            .insert(class_type.to_string(), schema);
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn last_submitted(&self) -> Option<WorkflowGraph> {
        self.submitted.lock().unwrap().last().cloned()
    }

    /// Block until the run under test has called `submit`.
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
    async fn submit(&self, graph: &WorkflowGraph) -> Result<SubmitReceipt, TransportError> {
        if let Some(err) = self.submit_error.lock().unwrap().clone() {
            self.submitted.lock().unwrap().push(graph.clone());
            return Err(err);
        }
        self.submitted.lock().unwrap().push(graph.clone());
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
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn fetch_port_schema(
        &self,
        class_type: &str,
    ) -> Result<Option<PortSchema>, TransportError> {
        Ok(self.schemas.lock().unwrap().get(class_type).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.push_tx.subscribe()
    }

    async fn interrupt(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

// ---- push constructors ----

pub fn executing(prompt_id: &str, node: Option<&str>) -> PushEvent {
    PushEvent::Executing(ExecutingData {
        prompt_id: prompt_id.to_string(),
        node: node.map(str::to_string),
    })
}

pub fn executed(prompt_id: &str, node: &str, output: serde_json::Value) -> PushEvent {
    PushEvent::Executed(ExecutedData {
        prompt_id: prompt_id.to_string(),
        node: node.to_string(),
        output,
    })
}

pub fn cached(prompt_id: &str, nodes: &[&str]) -> PushEvent {
    PushEvent::ExecutionCached(ExecutionCachedData {
        prompt_id: prompt_id.to_string(),
        nodes: nodes.iter().map(|s| s.to_string()).collect(),
    })
}

pub fn success(prompt_id: &str) -> PushEvent {
    PushEvent::ExecutionSuccess(ExecutionSuccessData {
        prompt_id: prompt_id.to_string(),
    })
}

pub fn server_error(prompt_id: &str, node_id: &str, message: &str) -> PushEvent {
    PushEvent::ExecutionError(ExecutionErrorData {
        prompt_id: prompt_id.to_string(),
        node_id: node_id.to_string(),
        exception_type: "RuntimeError".to_string(),
        exception_message: message.to_string(),
    })
}

pub fn interrupted(prompt_id: &str) -> PushEvent {
    PushEvent::ExecutionInterrupted(ExecutionInterruptedData {
        prompt_id: prompt_id.to_string(),
    })
}

/// A completed history record with outputs for the given node ids.
pub fn completed_history(outputs: &[(&str, serde_json::Value)]) -> HistoryRecord {
    HistoryRecord {
        completed: true,
        outputs: outputs
            .iter()
            .map(|(node, value)| (node.to_string(), value.clone()))
            .collect(),
    }
}
