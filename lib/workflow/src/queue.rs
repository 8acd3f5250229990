//! Work queue contract and the in-process queue.
//!
//! Two logical queues carry jobs:
//! - `workflow-execution-queue`: `{executionId}`, asks the engine to bootstrap
//!   or re-evaluate an execution
//! - `node-execution-queue`: `{executionId, nodeId, input, triggeredBy}`, one
//!   job per node dispatch
//!
//! Delivery is at-least-once. Producers attach an idempotency key per
//! `(executionId, nodeId, triggeredBy)` so a queue can drop repeated enqueues
//! of the same dispatch; consumers must still tolerate redelivery.

use crate::node::NodeId;
use async_trait::async_trait;
use lantern_core::ExecutionId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// How long the in-process queue remembers a node job's idempotency key.
///
/// Matches the default JetStream duplicate window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(120);

/// The two logical queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Workflow,
    Node,
}

impl QueueKind {
    /// Returns the queue name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow-execution-queue",
            Self::Node => "node-execution-queue",
        }
    }
}

/// Asks the engine to bootstrap or re-evaluate an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowJob {
    pub execution_id: ExecutionId,
}

/// Asks the engine to run one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeJob {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub input: JsonValue,
    /// The completed node whose edge produced this job; `None` for start nodes.
    #[serde(default)]
    pub triggered_by: Option<NodeId>,
}

impl NodeJob {
    /// Identifies this dispatch for queue-level deduplication.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        let source = self
            .triggered_by
            .as_ref()
            .map_or("start", NodeId::as_str);
        format!("{}:{}:{}", self.execution_id, self.node_id, source)
    }
}

/// A job on either queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "queue", rename_all = "snake_case")]
pub enum Job {
    Workflow(WorkflowJob),
    Node(NodeJob),
}

impl Job {
    #[must_use]
    pub fn kind(&self) -> QueueKind {
        match self {
            Self::Workflow(_) => QueueKind::Workflow,
            Self::Node(_) => QueueKind::Node,
        }
    }

    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            Self::Workflow(job) => job.execution_id,
            Self::Node(job) => job.execution_id,
        }
    }

    /// Deduplication key; `None` for jobs that may be repeated freely.
    ///
    /// Workflow jobs are re-evaluations and must never be dropped.
    #[must_use]
    pub fn idempotency_key(&self) -> Option<String> {
        match self {
            Self::Workflow(_) => None,
            Self::Node(job) => Some(job.idempotency_key()),
        }
    }
}

/// Errors from queue operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Failed to connect to the queue.
    ConnectionFailed { message: String },
    /// Failed to publish a job.
    PublishFailed { message: String },
    /// Failed to receive a job.
    ReceiveFailed { message: String },
    /// Failed to acknowledge a job.
    AckFailed { message: String },
    /// A received message could not be decoded.
    Decode { message: String },
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "queue connection failed: {message}")
            }
            Self::PublishFailed { message } => write!(f, "job publish failed: {message}"),
            Self::ReceiveFailed { message } => write!(f, "job receive failed: {message}"),
            Self::AckFailed { message } => write!(f, "job ack failed: {message}"),
            Self::Decode { message } => write!(f, "job decode failed: {message}"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Producer side of the work queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueues a job.
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    /// Enqueues a workflow job.
    async fn enqueue_workflow(&self, job: WorkflowJob) -> Result<(), QueueError> {
        self.enqueue(Job::Workflow(job)).await
    }

    /// Enqueues a node job.
    async fn enqueue_node(&self, job: NodeJob) -> Result<(), QueueError> {
        self.enqueue(Job::Node(job)).await
    }
}

/// Settles a delivered job.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Marks the job done.
    async fn ack(&self) -> Result<(), QueueError>;

    /// Returns the job to the queue for redelivery.
    async fn nack(&self) -> Result<(), QueueError>;
}

/// A job received from a queue.
pub struct Delivery {
    pub job: Job,
    pub acker: Box<dyn Acknowledge>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery").field("job", &self.job).finish_non_exhaustive()
    }
}

/// Consumer side of the work queue.
#[async_trait]
pub trait JobStream: Send + Sync {
    /// Waits for the next job.
    ///
    /// Returns `Ok(None)` when the stream is closed.
    async fn next_delivery(&self) -> Result<Option<Delivery>, QueueError>;
}

/// Idempotency keys seen within the dedup window, oldest first.
#[derive(Debug, Default)]
struct RecentKeys {
    keys: HashSet<String>,
    order: VecDeque<(Instant, String)>,
}

impl RecentKeys {
    /// Records `key`, returning false if it was seen within `window`.
    fn insert(&mut self, key: String, window: Duration, now: Instant) -> bool {
        while let Some((seen_at, _)) = self.order.front() {
            if now.duration_since(*seen_at) < window {
                break;
            }
            if let Some((_, expired)) = self.order.pop_front() {
                self.keys.remove(&expired);
            }
        }
        if !self.keys.insert(key.clone()) {
            return false;
        }
        self.order.push_back((now, key));
        true
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Job>,
    seen: RecentKeys,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    dedup_window: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the queue half-updated.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn push(&self, job: Job) {
        self.lock().pending.push_back(job);
        self.notify.notify_one();
    }
}

/// In-process work queue.
///
/// Jobs from both logical queues share one FIFO. Node jobs are deduplicated
/// by idempotency key within a sliding window, [`DEFAULT_DEDUP_WINDOW`]
/// unless configured otherwise.
#[derive(Debug, Clone)]
pub struct InMemoryWorkQueue {
    shared: Arc<Shared>,
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::with_dedup_window(DEFAULT_DEDUP_WINDOW)
    }
}

impl InMemoryWorkQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue that forgets idempotency keys after `window`.
    #[must_use]
    pub fn with_dedup_window(window: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                dedup_window: window,
            }),
        }
    }

    /// Pops the next job without waiting.
    #[must_use]
    pub fn try_next(&self) -> Option<Job> {
        self.shared.lock().pending.pop_front()
    }

    /// Returns the number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops consumers once the queue drains.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_waiters();
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(QueueError::PublishFailed {
                    message: "queue is closed".to_string(),
                });
            }
            if let Some(key) = job.idempotency_key() {
                if !state.seen.insert(key, self.shared.dedup_window, Instant::now()) {
                    tracing::debug!(job = ?job, "dropping duplicate job");
                    return Ok(());
                }
            }
            state.pending.push_back(job);
        }
        self.shared.notify.notify_one();
        Ok(())
    }
}

struct InMemoryAcker {
    shared: Arc<Shared>,
    job: Job,
}

#[async_trait]
impl Acknowledge for InMemoryAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn nack(&self) -> Result<(), QueueError> {
        self.shared.push(self.job.clone());
        Ok(())
    }
}

#[async_trait]
impl JobStream for InMemoryWorkQueue {
    async fn next_delivery(&self) -> Result<Option<Delivery>, QueueError> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.lock();
                if let Some(job) = state.pending.pop_front() {
                    let acker = InMemoryAcker {
                        shared: self.shared.clone(),
                        job: job.clone(),
                    };
                    return Ok(Some(Delivery {
                        job,
                        acker: Box::new(acker),
                    }));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }
}
