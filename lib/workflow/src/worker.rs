//! Queue worker.
//!
//! A worker pulls jobs from one [`JobStream`] and hands them to the
//! [`Engine`]. Workers are stateless and interchangeable; run as many as the
//! deployment needs, against either queue.
//!
//! Settlement:
//! - success, stale job or node failure: ack
//! - non-retryable engine error (unknown execution, malformed job): ack,
//!   since redelivery cannot fix it
//! - infrastructure error: nack, so the queue redelivers the job

use crate::engine::Engine;
use crate::queue::{Delivery, JobStream};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a nack or a receive failure.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Nacked,
}

/// Pulls jobs from a stream and processes them with the engine.
pub struct Worker<S: JobStream> {
    name: String,
    engine: Engine,
    jobs: S,
    retry_delay: Duration,
}

impl<S: JobStream> Worker<S> {
    /// Creates a new worker.
    pub fn new(name: impl Into<String>, engine: Engine, jobs: S) -> Self {
        Self {
            name: name.into(),
            engine,
            jobs,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Sets the pause after a nack or receive failure.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Processes jobs until `shutdown` fires or the stream closes.
    ///
    /// A job in progress when `shutdown` fires is finished and settled first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker = %self.name, "worker started");
        loop {
            let received = tokio::select! {
                () = shutdown.cancelled() => break,
                received = self.jobs.next_delivery() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    if self.handle(delivery).await == Settlement::Nacked {
                        self.pause(&shutdown).await;
                    }
                }
                Ok(None) => {
                    info!(worker = %self.name, "job stream closed");
                    break;
                }
                Err(e) => {
                    warn!(worker = %self.name, error = %e, "failed to receive job");
                    self.pause(&shutdown).await;
                }
            }
        }
        info!(worker = %self.name, "worker stopped");
    }

    /// Processes one delivery and settles it.
    pub async fn handle(&self, delivery: Delivery) -> Settlement {
        let Delivery { job, acker } = delivery;
        let kind = job.kind();
        let execution_id = job.execution_id();

        let settlement = match self.engine.process_job(job).await {
            Ok(()) => Settlement::Acked,
            Err(e) if e.is_retryable() => {
                warn!(
                    worker = %self.name,
                    queue = kind.name(),
                    execution_id = %execution_id,
                    error = %e,
                    "job failed, leaving it for redelivery"
                );
                Settlement::Nacked
            }
            Err(e) => {
                error!(
                    worker = %self.name,
                    queue = kind.name(),
                    execution_id = %execution_id,
                    error = %e,
                    "dropping job that cannot succeed"
                );
                Settlement::Acked
            }
        };

        let settled = match settlement {
            Settlement::Acked => acker.ack().await,
            Settlement::Nacked => acker.nack().await,
        };
        if let Err(e) = settled {
            // The broker redelivers unsettled jobs after its ack timeout.
            warn!(worker = %self.name, error = %e, "failed to settle job");
        } else {
            debug!(worker = %self.name, ?settlement, "job settled");
        }
        settlement
    }

    async fn pause(&self, shutdown: &CancellationToken) {
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = tokio::time::sleep(self.retry_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::engine::EngineConfig;
    use crate::execution::{Execution, ExecutionStatus, ExecutionSummary};
    use crate::executor::NodeRegistry;
    use crate::graph::WorkflowGraph;
    use crate::node::{Node, NodeId};
    use crate::queue::{InMemoryWorkQueue, Job, NodeJob, WorkQueue, WorkflowJob};
    use crate::store::{ExecutionFilter, ExecutionStore, InMemoryExecutionStore, StoreError};
    use async_trait::async_trait;
    use lantern_core::{ExecutionId, WorkflowId};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store that can be switched offline.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryExecutionStore,
        offline: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable {
                    message: "connection refused".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ExecutionStore for FlakyStore {
        async fn create(&self, execution: &Execution) -> Result<(), StoreError> {
            self.check()?;
            self.inner.create(execution).await
        }

        async fn get(&self, id: ExecutionId) -> Result<Execution, StoreError> {
            self.check()?;
            self.inner.get(id).await
        }

        async fn save(&self, execution: &Execution) -> Result<Execution, StoreError> {
            self.check()?;
            self.inner.save(execution).await
        }

        async fn list(
            &self,
            filter: ExecutionFilter,
        ) -> Result<Vec<ExecutionSummary>, StoreError> {
            self.check()?;
            self.inner.list(filter).await
        }
    }

    fn setup() -> (Arc<FlakyStore>, InMemoryWorkQueue, Engine) {
        let store = Arc::new(FlakyStore::default());
        let queue = InMemoryWorkQueue::new();
        let engine = Engine::new(
            store.clone(),
            Arc::new(queue.clone()),
            Arc::new(NodeRegistry::with_builtins()),
            EngineConfig::default(),
        );
        (store, queue, engine)
    }

    fn graph() -> WorkflowGraph {
        WorkflowGraph::from_parts(
            [Node::new("1", "trigger"), Node::new("2", "transform")],
            [Edge::new("1", "2")],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn worker_runs_execution_to_completion() {
        let (store, queue, engine) = setup();
        let execution = engine
            .start_execution(WorkflowId::new(), graph(), json!({}))
            .await
            .unwrap();

        let worker = Worker::new("test", engine, queue.clone());
        let shutdown = CancellationToken::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        };

        let mut status = ExecutionStatus::Pending;
        for _ in 0..100 {
            status = store.inner.get(execution.id).await.unwrap().status;
            if status == ExecutionStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, ExecutionStatus::Completed);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn infrastructure_error_nacks() {
        let (store, queue, engine) = setup();
        let execution = engine
            .start_execution(WorkflowId::new(), graph(), json!({}))
            .await
            .unwrap();
        store.offline.store(true, Ordering::SeqCst);

        let worker = Worker::new("test", engine, queue.clone());
        let delivery = queue.next_delivery().await.unwrap().unwrap();
        assert_eq!(worker.handle(delivery).await, Settlement::Nacked);

        // The job is back on the queue and succeeds once the store recovers.
        store.offline.store(false, Ordering::SeqCst);
        let delivery = queue.next_delivery().await.unwrap().unwrap();
        assert!(matches!(&delivery.job, Job::Node(job) if job.node_id.as_str() == "1"));
        assert_eq!(worker.handle(delivery).await, Settlement::Acked);
        assert!(
            store
                .inner
                .get(execution.id)
                .await
                .unwrap()
                .step("1")
                .unwrap()
                .is_completed()
        );
    }

    #[tokio::test]
    async fn unknown_execution_is_acked() {
        let (_store, queue, engine) = setup();
        queue
            .enqueue_workflow(WorkflowJob {
                execution_id: ExecutionId::new(),
            })
            .await
            .unwrap();

        let worker = Worker::new("test", engine, queue.clone());
        let delivery = queue.next_delivery().await.unwrap().unwrap();
        assert_eq!(worker.handle(delivery).await, Settlement::Acked);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn job_for_missing_node_is_acked() {
        let (_store, queue, engine) = setup();
        let execution = engine
            .start_execution(WorkflowId::new(), graph(), json!({}))
            .await
            .unwrap();
        while queue.try_next().is_some() {}
        queue
            .enqueue_node(NodeJob {
                execution_id: execution.id,
                node_id: NodeId::from("ghost"),
                input: json!({}),
                triggered_by: None,
            })
            .await
            .unwrap();

        let worker = Worker::new("test", engine, queue.clone());
        let delivery = queue.next_delivery().await.unwrap().unwrap();
        assert_eq!(worker.handle(delivery).await, Settlement::Acked);
    }

    #[tokio::test]
    async fn closed_stream_stops_worker() {
        let (_store, queue, engine) = setup();
        queue.close();

        let worker = Worker::new("test", engine, queue);
        tokio::time::timeout(Duration::from_secs(1), worker.run(CancellationToken::new()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_idle_worker() {
        let (_store, queue, engine) = setup();
        let worker = Worker::new("test", engine, queue).with_retry_delay(Duration::from_millis(5));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), worker.run(shutdown))
            .await
            .unwrap();
    }
}
