//! Per-job execution correlator.
//!
//! [`JobRun`] owns the lifecycle of one submitted job: it subscribes to
//! the transport's push stream, applies the bypass transform, submits the
//! workflow, then folds the incoming pushes into a terminal
//! [`RunOutcome`]. The state machine is
//! `INIT -> SUBMITTING -> SUBMITTED -> {CACHE_HIT | LIVE} -> {COMPLETED | FAILED}`;
//! the prompt id is known only after submission succeeds.
//!
//! All push handlers for a job live in one receive loop over a single
//! broadcast receiver, so terminal teardown is one `return`: the receiver
//! drops, and a late push can never double-resolve the job.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use comfypool_core::{bypass_nodes, JobError, SchemaCache, WorkflowGraph};

use crate::mapping::OutputMapping;
use crate::push::PushEvent;
use crate::transport::{HistoryRecord, Transport};

/// Per-run tunables and side channels.
#[derive(Default)]
pub struct JobOptions {
    /// Node ids to elide from the submitted graph, in order.
    pub bypass: Vec<String>,
    /// Optional progress/lifecycle event channel.
    pub events: Option<broadcast::Sender<JobEvent>>,
}

/// Lifecycle notifications for one run, replacing per-job callbacks.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The first `executed` push for this prompt arrived.
    Started { prompt_id: String },

    /// A progress push was relayed (step `value` of `max`).
    Progress {
        prompt_id: Option<String>,
        value: u32,
        max: u32,
    },

    /// The run reached `COMPLETED`.
    Finished { prompt_id: String },

    /// The run reached `FAILED`.
    Failed {
        /// Unknown when submission itself failed.
        prompt_id: Option<String>,
        reason: JobError,
    },
}

/// Terminal result of one run.
///
/// Job-level failures are data, not `Err`: [`JobRun::run`] always returns
/// an outcome, and the typed reason also goes out on the event channel.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every requested output was collected, keyed by logical key.
    Completed(BTreeMap<String, serde_json::Value>),
    /// The job failed terminally.
    Failed(JobError),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The collected outputs, when completed.
    pub fn outputs(&self) -> Option<&BTreeMap<String, serde_json::Value>> {
        match self {
            Self::Completed(outputs) => Some(outputs),
            Self::Failed(_) => None,
        }
    }

    /// The failure reason, when failed.
    pub fn error(&self) -> Option<&JobError> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(err) => Some(err),
        }
    }
}

/// Classification of a submitted prompt.
enum Phase {
    /// Waiting for the `executing` vs `execution_cached` race to settle.
    Submitted,
    /// A live (uncached) run is in progress.
    Live,
}

/// Mutable per-job bookkeeping, created at submission and dropped at the
/// terminal transition.
struct ExecutionContext {
    outputs: BTreeMap<String, serde_json::Value>,
    remaining: usize,
    started: bool,
}

/// One submitted job, from submission to terminal outcome.
pub struct JobRun {
    run_id: uuid::Uuid,
    transport: Arc<dyn Transport>,
    graph: WorkflowGraph,
    mapping: OutputMapping,
    options: JobOptions,
}

impl JobRun {
    pub fn new(
        transport: Arc<dyn Transport>,
        graph: WorkflowGraph,
        mapping: OutputMapping,
        options: JobOptions,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            transport,
            graph,
            mapping,
            options,
        }
    }

    /// Drive the job to its terminal outcome.
    ///
    /// Never panics on job-level failure; the typed reason is returned
    /// and mirrored on the event channel exactly once.
    pub async fn run(self) -> RunOutcome {
        // Subscribe before submitting so no push can slip past.
        let mut pushes = self.transport.subscribe();

        let graph = match self.prepare_graph().await {
            Ok(graph) => graph,
            Err(err) => return self.finish_failed(None, err),
        };

        let receipt = match self.transport.submit(&graph).await {
            Ok(receipt) => receipt,
            Err(err) => {
                return self.finish_failed(None, JobError::SubmitFailed(err.to_string()))
            }
        };
        let prompt_id = receipt.prompt_id;
        tracing::info!(
            run_id = %self.run_id,
            prompt_id = %prompt_id,
            queue_position = receipt.number,
            "Workflow submitted",
        );

        let mut phase = Phase::Submitted;
        let mut ctx = ExecutionContext {
            outputs: BTreeMap::new(),
            remaining: self.mapping.len(),
            started: false,
        };

        loop {
            let event = match pushes.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        run_id = %self.run_id,
                        prompt_id = %prompt_id,
                        skipped,
                        "Push stream lagged",
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return self.finish_failed(Some(&prompt_id), JobError::Disconnected)
                }
            };

            if let Some(outcome) = self.step(&prompt_id, &mut phase, &mut ctx, event).await {
                return outcome;
            }
        }
    }

    // ---- event handling ----

    /// Fold one push into the state machine. `Some` is terminal.
    async fn step(
        &self,
        prompt_id: &str,
        phase: &mut Phase,
        ctx: &mut ExecutionContext,
        event: PushEvent,
    ) -> Option<RunOutcome> {
        match event {
            PushEvent::ExecutionCached(data) if data.prompt_id == prompt_id => {
                if matches!(phase, Phase::Submitted) && self.covers_all_outputs(&data.nodes) {
                    Some(self.resolve_cache_hit(prompt_id).await)
                } else {
                    // Partial cache: a live run will follow.
                    *phase = Phase::Live;
                    None
                }
            }
            PushEvent::Executing(data) if data.prompt_id == prompt_id => {
                *phase = Phase::Live;
                None
            }
            PushEvent::Executed(data) if data.prompt_id == prompt_id => {
                *phase = Phase::Live;
                if !ctx.started {
                    ctx.started = true;
                    self.emit(JobEvent::Started {
                        prompt_id: prompt_id.to_string(),
                    });
                }
                if let Some(key) = self.mapping.key_for(&data.node) {
                    if !ctx.outputs.contains_key(key) {
                        ctx.outputs.insert(key.to_string(), data.output);
                        ctx.remaining -= 1;
                    }
                }
                if ctx.remaining == 0 {
                    let outputs = std::mem::take(&mut ctx.outputs);
                    return Some(self.finish_completed(prompt_id, outputs));
                }
                None
            }
            PushEvent::ExecutionSuccess(data) if data.prompt_id == prompt_id => {
                // Outputs are still outstanding (remaining > 0, or we
                // would already have completed). Reconcile via history.
                tracing::debug!(
                    run_id = %self.run_id,
                    prompt_id = %prompt_id,
                    remaining = ctx.remaining,
                    "Success push before all outputs; reconciling from history",
                );
                match self.fetch_completed_history(prompt_id).await {
                    Some(record) => Some(self.complete_with_record(prompt_id, ctx, &record)),
                    None => Some(self.finish_failed(Some(prompt_id), JobError::ExecutionFailed)),
                }
            }
            PushEvent::Status(_) => self.watchdog(prompt_id, ctx).await,
            PushEvent::Progress(data) => {
                if data.prompt_id.as_deref().map_or(true, |id| id == prompt_id) {
                    self.emit(JobEvent::Progress {
                        prompt_id: data.prompt_id,
                        value: data.value,
                        max: data.max,
                    });
                }
                None
            }
            PushEvent::ExecutionError(data) if data.prompt_id == prompt_id => {
                let payload = serde_json::to_value(&data).unwrap_or(serde_json::Value::Null);
                Some(self.finish_failed(Some(prompt_id), JobError::ServerReported(payload)))
            }
            PushEvent::ExecutionInterrupted(data) if data.prompt_id == prompt_id => {
                Some(self.finish_failed(Some(prompt_id), JobError::Interrupted))
            }
            PushEvent::Disconnected => {
                Some(self.finish_failed(Some(prompt_id), JobError::Disconnected))
            }
            _ => None,
        }
    }

    /// A job-independent status push doubles as a watchdog round: a
    /// prompt that is in neither queue section and has no completed
    /// history has gone missing.
    async fn watchdog(&self, prompt_id: &str, ctx: &mut ExecutionContext) -> Option<RunOutcome> {
        let snapshot = match self.transport.fetch_queue_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(
                    run_id = %self.run_id,
                    prompt_id = %prompt_id,
                    error = %err,
                    "Queue snapshot fetch failed; skipping watchdog round",
                );
                return None;
            }
        };
        if snapshot.contains(prompt_id) {
            return None;
        }
        match self.fetch_completed_history(prompt_id).await {
            Some(record) => Some(self.complete_with_record(prompt_id, ctx, &record)),
            None => Some(self.finish_failed(Some(prompt_id), JobError::WentMissing)),
        }
    }

    /// CACHE_HIT: every requested node was served from cache, so the
    /// history record must already hold the outputs.
    async fn resolve_cache_hit(&self, prompt_id: &str) -> RunOutcome {
        tracing::debug!(
            run_id = %self.run_id,
            prompt_id = %prompt_id,
            "Cache covers all requested outputs",
        );
        let record = match self.fetch_completed_history(prompt_id).await {
            Some(record) => record,
            None => return self.finish_failed(Some(prompt_id), JobError::FailedCache),
        };
        let mut outputs = BTreeMap::new();
        for (key, node) in self.mapping.entries() {
            match record.outputs.get(node) {
                Some(value) => {
                    outputs.insert(key.to_string(), value.clone());
                }
                None => return self.finish_failed(Some(prompt_id), JobError::FailedCache),
            }
        }
        self.finish_completed(prompt_id, outputs)
    }

    /// Merge live-collected outputs with a completed history record;
    /// every mapped node must be covered by one or the other.
    fn complete_with_record(
        &self,
        prompt_id: &str,
        ctx: &mut ExecutionContext,
        record: &HistoryRecord,
    ) -> RunOutcome {
        let mut outputs = std::mem::take(&mut ctx.outputs);
        for (key, node) in self.mapping.entries() {
            if outputs.contains_key(key) {
                continue;
            }
            match record.outputs.get(node) {
                Some(value) => {
                    outputs.insert(key.to_string(), value.clone());
                }
                None => {
                    return self.finish_failed(Some(prompt_id), JobError::ExecutionFailed)
                }
            }
        }
        self.finish_completed(prompt_id, outputs)
    }

    async fn fetch_completed_history(&self, prompt_id: &str) -> Option<HistoryRecord> {
        match self.transport.fetch_history(prompt_id).await {
            Ok(Some(record)) if record.completed => Some(record),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(
                    run_id = %self.run_id,
                    prompt_id = %prompt_id,
                    error = %err,
                    "History fetch failed",
                );
                None
            }
        }
    }

    fn covers_all_outputs(&self, cached_nodes: &[String]) -> bool {
        self.mapping
            .node_ids()
            .all(|node| cached_nodes.iter().any(|cached| cached == node))
    }

    // ---- graph preparation ----

    /// Apply the bypass transform on a private copy of the graph.
    ///
    /// Schemas are prefetched into a run-scoped cache, one fetch per
    /// class type. Any unresolved node id or absent schema aborts before
    /// any submission happens.
    async fn prepare_graph(&self) -> Result<WorkflowGraph, JobError> {
        if self.options.bypass.is_empty() {
            return Ok(self.graph.clone());
        }

        let mut schemas = SchemaCache::new();
        for target in &self.options.bypass {
            let node = self
                .graph
                .node(target)
                .ok_or_else(|| JobError::MissingNode(target.clone()))?;
            if schemas.contains_key(&node.class_type) {
                continue;
            }
            let schema = self
                .transport
                .fetch_port_schema(&node.class_type)
                .await
                .map_err(|err| JobError::SubmitFailed(err.to_string()))?
                .ok_or_else(|| JobError::MissingNode(node.class_type.clone()))?;
            schemas.insert(node.class_type.clone(), schema);
        }

        Ok(bypass_nodes(&self.graph, &self.options.bypass, &schemas)?)
    }

    // ---- terminal transitions ----

    fn finish_completed(
        &self,
        prompt_id: &str,
        outputs: BTreeMap<String, serde_json::Value>,
    ) -> RunOutcome {
        tracing::info!(
            run_id = %self.run_id,
            prompt_id = %prompt_id,
            outputs = outputs.len(),
            "Job completed",
        );
        self.emit(JobEvent::Finished {
            prompt_id: prompt_id.to_string(),
        });
        RunOutcome::Completed(outputs)
    }

    fn finish_failed(&self, prompt_id: Option<&str>, reason: JobError) -> RunOutcome {
        tracing::warn!(
            run_id = %self.run_id,
            prompt_id = prompt_id.unwrap_or("<unsubmitted>"),
            reason = reason.kind(),
            "Job failed",
        );
        self.emit(JobEvent::Failed {
            prompt_id: prompt_id.map(str::to_string),
            reason: reason.clone(),
        });
        RunOutcome::Failed(reason)
    }

    fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.options.events {
            // SendError only means nobody is listening.
            let _ = tx.send(event);
        }
    }
}
