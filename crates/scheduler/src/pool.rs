//! The client pool: registration, watchers, and the dispatch loop.
//!
//! A [`ClientPool`] owns a set of backend clients and a weighted job
//! queue. One dispatch task matches the front job against the eligible
//! clients under the active [`Policy`]; one watcher task per client
//! folds its push stream into the shared state. All state lives behind
//! a single mutex, so watcher updates and dispatch decisions are
//! serialized.
//!
//! Dispatch wakes on a [`Notify`] signalled by every state change, with
//! a short timer as fallback. A dispatched job locks its client; the
//! unlock comes from the client's own push stream (completion pushes,
//! or status pushes under the non-conservative policies), never from
//! task return.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio_util::sync::CancellationToken;

use comfypool_client::{JobOptions, JobRun, OutputMapping, PushEvent, RunOutcome, Transport};
use comfypool_core::WorkflowGraph;

use crate::notice::{NoticeKind, PoolNotice};
use crate::policy::{select, Candidate, ClientFilter, Policy};
use crate::queue::WeightedQueue;

/// Fallback dispatch wakeup when no state change arrives.
const SELECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Capacity of the notice broadcast channel.
const NOTICE_CHANNEL_CAPACITY: usize = 256;

/// Pool-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The task was dropped before it produced a result: it panicked,
    /// or the pool shut down with the job still queued.
    #[error("Task was dropped before completion")]
    TaskDropped,

    /// No registered client has this id.
    #[error("Unknown client: {0}")]
    UnknownClient(String),

    /// Client index out of range.
    #[error("Client index out of range: {0}")]
    BadIndex(usize),
}

/// One backend client as registered with the pool.
pub struct PoolClient {
    pub id: String,
    pub transport: Arc<dyn Transport>,
}

impl PoolClient {
    pub fn new(id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            transport,
        }
    }
}

/// Scheduling-relevant state of one client. Clients start offline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientState {
    /// Server-reported queue depth, from status pushes.
    pub queue_remaining: u32,
    /// A job was dispatched here and has not been released yet.
    pub locked: bool,
    pub online: bool,
}

/// Extra knobs for `submit_with` and `submit_batch`.
#[derive(Default)]
pub struct SubmitOptions {
    /// Explicit queue weight; defaults to the queue length at enqueue.
    pub weight: Option<f64>,
    pub filter: ClientFilter,
}

/// Awaitable result slot for one submitted job.
pub struct JobHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Wait for the task's result.
    ///
    /// `TaskDropped` means the task never produced one: it panicked, or
    /// the pool shut down first.
    pub async fn wait(self) -> Result<T, PoolError> {
        self.rx.await.map_err(|_| PoolError::TaskDropped)
    }
}

/// Await a batch of handles, preserving submission order. The first
/// dropped task fails the whole gather.
pub async fn gather<T>(handles: Vec<JobHandle<T>>) -> Result<Vec<T>, PoolError> {
    futures::future::try_join_all(handles.into_iter().map(JobHandle::wait)).await
}

/// Boxed job body. The bool reports success for the executed/failed
/// notice pair; result delivery goes through the handle's oneshot.
type TaskFn = Box<dyn FnOnce(Arc<PoolClient>) -> BoxFuture<'static, bool> + Send>;

struct QueuedJob {
    filter: ClientFilter,
    task: TaskFn,
}

struct ClientEntry {
    client: Arc<PoolClient>,
    state: ClientState,
    /// Distinguishes `ClientConnected` from `ClientReconnected`.
    ever_online: bool,
    cancel: CancellationToken,
}

struct PoolState {
    clients: Vec<ClientEntry>,
    queue: WeightedQueue<QueuedJob>,
    policy: Policy,
    rr_cursor: usize,
    idle: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    /// Wakes the dispatch loop after a state change.
    wake: Notify,
    notices: broadcast::Sender<PoolNotice>,
    cancel: CancellationToken,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        // A poisoned lock only means a panic elsewhere; the state
        // itself is still consistent (mutations are single assignments).
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notice(&self, notice: PoolNotice) {
        let _ = self.notices.send(notice);
    }

    /// Client-scoped notice, resolving the current index by id.
    fn client_notice(&self, kind: NoticeKind, client_id: &str) {
        let index = self
            .lock_state()
            .clients
            .iter()
            .position(|entry| entry.client.id == client_id);
        match index {
            Some(index) => self.notice(PoolNotice::for_client(kind, index, client_id)),
            // Client was removed in the meantime; drop the index.
            None => self.notice(PoolNotice {
                client_index: None,
                client_id: Some(client_id.to_string()),
                ..PoolNotice::new(kind)
            }),
        }
    }
}

/// A pool of backend clients sharing one weighted job queue.
pub struct ClientPool {
    shared: Arc<Shared>,
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}

impl ClientPool {
    /// Create an empty pool and start its dispatch loop.
    pub fn new(policy: Policy) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                clients: Vec::new(),
                queue: WeightedQueue::new(),
                policy,
                rr_cursor: 0,
                idle: true,
            }),
            wake: Notify::new(),
            notices,
            cancel: CancellationToken::new(),
        });
        tokio::spawn(dispatch_loop(shared.clone()));
        Self { shared }
    }

    // ---- registration ----

    /// Register a client and start watching its push stream.
    ///
    /// The client starts offline; its first status or connected push
    /// brings it into the eligible set. Returns the registration index.
    pub fn add_client(&self, client: PoolClient) -> usize {
        let client = Arc::new(client);
        let cancel = self.shared.cancel.child_token();
        tokio::spawn(watch_client(
            self.shared.clone(),
            client.clone(),
            cancel.clone(),
        ));

        let mut state = self.shared.lock_state();
        let index = state.clients.len();
        tracing::info!(client_id = %client.id, index, "Client added to pool");
        let id = client.id.clone();
        state.clients.push(ClientEntry {
            client,
            state: ClientState::default(),
            ever_online: false,
            cancel,
        });
        drop(state);

        self.shared
            .notice(PoolNotice::for_client(NoticeKind::ClientAdded, index, &id));
        self.shared.wake.notify_one();
        index
    }

    /// Deregister a client by id and stop its watcher.
    ///
    /// A job already running on the client keeps its own handle and is
    /// not cancelled.
    pub fn remove_client(&self, client_id: &str) -> Result<(), PoolError> {
        let mut state = self.shared.lock_state();
        let index = state
            .clients
            .iter()
            .position(|entry| entry.client.id == client_id)
            .ok_or_else(|| PoolError::UnknownClient(client_id.to_string()))?;
        let entry = state.clients.remove(index);
        drop(state);

        entry.cancel.cancel();
        tracing::info!(client_id = %client_id, index, "Client removed from pool");
        self.shared.notice(PoolNotice::for_client(
            NoticeKind::ClientRemoved,
            index,
            client_id,
        ));
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Deregister a client by registration index.
    pub fn remove_client_at(&self, index: usize) -> Result<(), PoolError> {
        let id = {
            let state = self.shared.lock_state();
            state
                .clients
                .get(index)
                .map(|entry| entry.client.id.clone())
                .ok_or(PoolError::BadIndex(index))?
        };
        self.remove_client(&id)
    }

    /// Snapshot of `(id, state)` in registration order.
    pub fn client_states(&self) -> Vec<(String, ClientState)> {
        self.shared
            .lock_state()
            .clients
            .iter()
            .map(|entry| (entry.client.id.clone(), entry.state.clone()))
            .collect()
    }

    // ---- policy / observability ----

    pub fn set_policy(&self, policy: Policy) {
        let mut state = self.shared.lock_state();
        if state.policy == policy {
            return;
        }
        tracing::info!(policy = ?policy, "Pool policy changed");
        state.policy = policy;
        drop(state);
        self.shared.notice(PoolNotice::new(NoticeKind::ModeChanged));
        self.shared.wake.notify_one();
    }

    pub fn policy(&self) -> Policy {
        self.shared.lock_state().policy
    }

    pub fn queue_len(&self) -> usize {
        self.shared.lock_state().queue.len()
    }

    /// Subscribe to pool notices. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolNotice> {
        self.shared.notices.subscribe()
    }

    // ---- submission ----

    /// Queue a task with default weight and no client filter.
    pub fn submit<F, Fut, T>(&self, task: F) -> JobHandle<T>
    where
        F: FnOnce(Arc<PoolClient>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with(task, SubmitOptions::default())
    }

    /// Queue a task with an explicit weight and/or client filter.
    pub fn submit_with<F, Fut, T>(&self, task: F, options: SubmitOptions) -> JobHandle<T>
    where
        F: FnOnce(Arc<PoolClient>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let body: TaskFn = Box::new(move |client| {
            Box::pin(async move {
                match AssertUnwindSafe(async move { task(client).await })
                    .catch_unwind()
                    .await
                {
                    Ok(value) => {
                        let _ = tx.send(value);
                        true
                    }
                    Err(_) => false,
                }
            })
        });
        self.enqueue(options.weight, options.filter, body);
        JobHandle { rx }
    }

    /// Queue a whole workflow run; the task submits the graph to
    /// whichever client gets picked and correlates it to completion.
    pub fn submit_prompt(
        &self,
        graph: WorkflowGraph,
        mapping: OutputMapping,
        job: JobOptions,
        options: SubmitOptions,
    ) -> JobHandle<RunOutcome> {
        let (tx, rx) = oneshot::channel();
        let body: TaskFn = Box::new(move |client| {
            Box::pin(async move {
                let outcome = JobRun::new(client.transport.clone(), graph, mapping, job)
                    .run()
                    .await;
                let completed = outcome.is_completed();
                let _ = tx.send(outcome);
                completed
            })
        });
        self.enqueue(options.weight, options.filter, body);
        JobHandle { rx }
    }

    /// Queue several tasks under one options set, in order.
    pub fn submit_batch<F, Fut, T>(&self, tasks: Vec<F>, options: SubmitOptions) -> Vec<JobHandle<T>>
    where
        F: FnOnce(Arc<PoolClient>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        tasks
            .into_iter()
            .map(|task| {
                self.submit_with(
                    task,
                    SubmitOptions {
                        weight: options.weight,
                        filter: options.filter.clone(),
                    },
                )
            })
            .collect()
    }

    fn enqueue(&self, weight: Option<f64>, filter: ClientFilter, task: TaskFn) {
        let mut state = self.shared.lock_state();
        let weight = weight.unwrap_or(state.queue.len() as f64);
        state.queue.insert(weight, QueuedJob { filter, task });
        let was_idle = std::mem::replace(&mut state.idle, false);
        tracing::debug!(weight, queued = state.queue.len(), "Job enqueued");
        drop(state);

        self.shared.notice(PoolNotice::new(NoticeKind::JobEnqueued));
        if was_idle {
            self.shared.notice(PoolNotice::new(NoticeKind::HaveWork));
        }
        self.shared.wake.notify_one();
    }

    // ---- lifecycle ----

    /// Stop the dispatch loop and all watchers, dropping queued jobs.
    ///
    /// Queued (not yet dispatched) handles resolve to `TaskDropped`;
    /// jobs already running keep going.
    pub fn shutdown(&self) {
        tracing::info!("Pool shutting down");
        self.shared.cancel.cancel();
        let mut state = self.shared.lock_state();
        while state.queue.pop_front().is_some() {}
    }
}

impl Drop for ClientPool {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

// ---- watcher ----

/// Fold one client's push stream into the shared pool state.
async fn watch_client(shared: Arc<Shared>, client: Arc<PoolClient>, cancel: CancellationToken) {
    let mut pushes = client.transport.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = pushes.recv() => event,
        };
        match event {
            Ok(event) => handle_client_event(&shared, &client.id, event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(client_id = %client.id, skipped, "Client push stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                handle_client_event(&shared, &client.id, PushEvent::Disconnected);
                return;
            }
        }
    }
}

fn handle_client_event(shared: &Shared, client_id: &str, event: PushEvent) {
    let mut state = shared.lock_state();
    let policy = state.policy;
    let Some(entry) = state
        .clients
        .iter_mut()
        .find(|entry| entry.client.id == client_id)
    else {
        return;
    };

    let mut notice = None;
    match event {
        PushEvent::Status(data) => {
            entry.state.queue_remaining = data.status.exec_info.queue_remaining;
            entry.state.online = true;
            entry.ever_online = true;
            // ZeroQueue trusts completion pushes only; a status push is
            // not proof the dispatched job left the queue.
            if policy != Policy::ZeroQueue {
                entry.state.locked = false;
            }
        }
        PushEvent::Connected => {
            entry.state.online = true;
            entry.state.locked = false;
            notice = Some(if entry.ever_online {
                NoticeKind::ClientReconnected
            } else {
                NoticeKind::ClientConnected
            });
            entry.ever_online = true;
        }
        PushEvent::Disconnected => {
            tracing::warn!(client_id = %client_id, "Client went offline");
            entry.state.online = false;
            entry.state.locked = false;
            notice = Some(NoticeKind::ClientDisconnected);
        }
        PushEvent::ExecutionSuccess(_)
        | PushEvent::ExecutionError(_)
        | PushEvent::ExecutionInterrupted(_) => {
            entry.state.locked = false;
        }
        _ => return,
    }
    drop(state);

    if let Some(kind) = notice {
        shared.client_notice(kind, client_id);
    }
    shared.wake.notify_one();
}

// ---- dispatch ----

async fn dispatch_loop(shared: Arc<Shared>) {
    loop {
        if shared.cancel.is_cancelled() {
            return;
        }
        if try_dispatch(&shared) {
            continue;
        }
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = shared.wake.notified() => {}
            _ = tokio::time::sleep(SELECT_RETRY_INTERVAL) => {}
        }
    }
}

/// One dispatch round. True when a job was handed to a client.
fn try_dispatch(shared: &Arc<Shared>) -> bool {
    let mut state = shared.lock_state();

    let filter = match state.queue.front() {
        Some(job) => job.filter.clone(),
        None => {
            if !state.idle {
                state.idle = true;
                drop(state);
                shared.notice(PoolNotice::new(NoticeKind::Idle));
            }
            return false;
        }
    };

    let eligible: Vec<Candidate> = state
        .clients
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.state.online && filter.allows(&entry.client.id))
        .map(|(index, entry)| Candidate {
            index,
            locked: entry.state.locked,
            queue_remaining: entry.state.queue_remaining,
        })
        .collect();

    let policy = state.policy;
    let Some(pick) = select(policy, &mut state.rr_cursor, &eligible) else {
        return false;
    };
    let Some((_, job)) = state.queue.pop_front() else {
        return false;
    };
    state.clients[pick].state.locked = true;
    let client = state.clients[pick].client.clone();
    drop(state);

    tracing::debug!(client_id = %client.id, index = pick, "Dispatching job");
    shared.notice(PoolNotice::for_client(
        NoticeKind::JobExecuting,
        pick,
        &client.id,
    ));

    let shared = shared.clone();
    tokio::spawn(async move {
        let succeeded = (job.task)(client.clone()).await;
        let kind = if succeeded {
            NoticeKind::JobExecuted
        } else {
            tracing::warn!(client_id = %client.id, "Dispatched task failed");
            NoticeKind::JobFailed
        };
        shared.client_notice(kind, &client.id);
        shared.wake.notify_one();
    });
    true
}
