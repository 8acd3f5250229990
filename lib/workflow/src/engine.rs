//! Workflow execution engine.
//!
//! The engine drives executions one queue job at a time. It holds no
//! per-execution state in memory: every job reloads the execution, so any
//! number of workers can process jobs for the same execution concurrently.
//!
//! Node job:
//! 1. Claim: skip stale jobs (terminal execution, completed or suspended
//!    step), otherwise mark the step running
//! 2. Run the node executor outside any lock
//! 3. Record the outcome: completed, suspended, or failed
//! 4. Enqueue eligible children and mark them dispatched
//! 5. Complete the execution once no reachable work is left
//!
//! Workflow job: bootstrap a pending execution, or re-dispatch children that
//! a crashed worker never enqueued and re-run completion detection.
//!
//! Every mutation is a compare-and-swap on the execution version, retried
//! against a fresh copy when another worker wins the race.

use crate::error::{EngineError, GraphError, NodeExecutionError};
use crate::execution::{
    CONDITION_RESULT_KEY, Execution, ExecutionProgress, ExecutionStatus, ExecutionSummary, Output,
    StepStatus,
};
use crate::executor::{NodeContext, NodeExecutionArgs, NodeOutcome, NodeRegistry};
use crate::graph::WorkflowGraph;
use crate::node::{Node, NodeId};
use crate::queue::{Job, NodeJob, WorkQueue, WorkflowJob};
use crate::routing;
use crate::store::{ExecutionFilter, ExecutionStore, StoreError};
use futures::FutureExt;
use lantern_core::{ExecutionId, WorkflowId};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Compare-and-swap attempts before a job gives up with `Contention`.
    pub max_update_attempts: u32,
    /// Per-node execution timeout; unlimited when unset.
    pub node_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_update_attempts: 8,
            node_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_secs.map(Duration::from_secs)
    }
}

/// Result of a mutation closure passed to [`Engine::update`].
enum Update<T> {
    /// Persist the mutated execution.
    Save(T),
    /// Leave the stored execution as it is.
    Skip(T),
}

/// What a node job should do after claiming.
enum Claim {
    Run { node: Node, context: NodeContext },
    Redispatch,
    Skip(&'static str),
}

/// How a node outcome was recorded.
enum Recorded {
    Completed,
    Suspended,
    Failed,
    Stale,
}

/// The workflow execution engine.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn ExecutionStore>,
    queue: Arc<dyn WorkQueue>,
    registry: Arc<NodeRegistry>,
    config: EngineConfig,
}

impl Engine {
    /// Creates a new engine.
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        queue: Arc<dyn WorkQueue>,
        registry: Arc<NodeRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            config,
        }
    }

    /// Creates an execution and enqueues its start nodes.
    ///
    /// An execution whose start nodes cannot be enqueued is marked failed so
    /// it is never left pending without a job to drive it.
    ///
    /// # Errors
    ///
    /// Returns `Graph` for an unrunnable graph, in which case no execution is
    /// created, or an infrastructure error.
    #[instrument(skip(self, graph, input), fields(workflow_id = %workflow_id))]
    pub async fn start_execution(
        &self,
        workflow_id: WorkflowId,
        graph: WorkflowGraph,
        input: JsonValue,
    ) -> Result<Execution, EngineError> {
        graph.validate()?;

        let execution = Execution::new(workflow_id, graph, input);
        self.store.create(&execution).await?;
        if let Err(e) = self.enqueue_start_nodes(&execution).await {
            warn!(execution_id = %execution.id, error = %e, "could not schedule execution");
            self.abandon(execution.id, format!("execution could not be scheduled: {e}"))
                .await;
            return Err(e);
        }

        info!(execution_id = %execution.id, "execution created");
        Ok(execution)
    }

    /// Processes a job from either queue.
    ///
    /// # Errors
    ///
    /// Returns an error the caller must settle: retryable errors leave the
    /// job for redelivery, the rest acknowledge it.
    pub async fn process_job(&self, job: Job) -> Result<(), EngineError> {
        match job {
            Job::Workflow(job) => self.process_workflow_job(job).await,
            Job::Node(job) => self.process_node_job(job).await,
        }
    }

    /// Runs one node.
    ///
    /// # Errors
    ///
    /// Node failures are recorded on the execution and are not errors.
    /// Errors are infrastructure failures or a job naming a node the graph
    /// does not have.
    #[instrument(skip(self, job), fields(execution_id = %job.execution_id, node_id = %job.node_id))]
    pub async fn process_node_job(&self, job: NodeJob) -> Result<(), EngineError> {
        let execution_id = job.execution_id;
        let node_id = job.node_id.clone();

        let (_, claim) = self
            .update(execution_id, |execution| {
                if execution.status.is_terminal() {
                    return Ok(Update::Skip(Claim::Skip("execution is terminal")));
                }
                let Some(node) = execution.graph.get_node(node_id.as_str()).cloned() else {
                    return Err(GraphError::NodeNotFound {
                        node_id: node_id.clone(),
                    }
                    .into());
                };
                match execution.step(node_id.as_str()).map(|s| (s.status, s.children_dispatched)) {
                    Some((StepStatus::Completed, true)) => {
                        return Ok(Update::Skip(Claim::Skip("node already completed")));
                    }
                    Some((StepStatus::Completed, false)) => {
                        return Ok(Update::Skip(Claim::Redispatch));
                    }
                    Some((StepStatus::Suspended, _)) => {
                        return Ok(Update::Skip(Claim::Skip("node awaiting resume")));
                    }
                    _ => {}
                }

                let context = NodeContext {
                    workflow_id: execution.workflow_id,
                    execution_id: execution.id,
                    execution: execution.context(),
                };
                execution.start();
                execution.begin_step(&node_id, job.input.clone());
                Ok(Update::Save(Claim::Run { node, context }))
            })
            .await?;

        let (node, context) = match claim {
            Claim::Skip(reason) => {
                debug!(reason, "skipping stale node job");
                return Ok(());
            }
            Claim::Redispatch => {
                debug!("re-dispatching children of completed node");
                self.dispatch_children(execution_id, &node_id).await?;
                return self.evaluate_completion(execution_id).await;
            }
            Claim::Run { node, context } => (node, context),
        };

        let outcome = self.invoke(node, job.input, context).await;

        let (_, recorded) = self
            .update(execution_id, |execution| {
                if execution.status.is_terminal() {
                    return Ok(Update::Skip(Recorded::Stale));
                }
                let Some(step) = execution.step_mut(node_id.as_str()) else {
                    return Ok(Update::Skip(Recorded::Stale));
                };
                if step.status != StepStatus::Running {
                    return Ok(Update::Skip(Recorded::Stale));
                }
                match &outcome {
                    NodeOutcome::Success { output } => {
                        step.complete(output.clone());
                        Ok(Update::Save(Recorded::Completed))
                    }
                    NodeOutcome::Suspended { output } => {
                        step.suspend(output.clone());
                        execution.suspend_at(&node_id);
                        Ok(Update::Save(Recorded::Suspended))
                    }
                    NodeOutcome::Error { error } => {
                        step.fail(error.clone());
                        execution.fail(format!("node {node_id} failed: {error}"));
                        Ok(Update::Save(Recorded::Failed))
                    }
                }
            })
            .await?;

        match recorded {
            Recorded::Completed => {
                self.dispatch_children(execution_id, &node_id).await?;
                self.evaluate_completion(execution_id).await
            }
            Recorded::Suspended => {
                info!("execution suspended");
                Ok(())
            }
            Recorded::Failed => {
                if let NodeOutcome::Error { error } = &outcome {
                    warn!(error = %error, "node failed, execution failed");
                }
                Ok(())
            }
            Recorded::Stale => {
                debug!("discarding outcome for a step that moved on");
                Ok(())
            }
        }
    }

    /// Bootstraps or re-evaluates an execution.
    ///
    /// # Errors
    ///
    /// Returns infrastructure errors or `ExecutionNotFound`.
    #[instrument(skip(self, job), fields(execution_id = %job.execution_id))]
    pub async fn process_workflow_job(&self, job: WorkflowJob) -> Result<(), EngineError> {
        let execution_id = job.execution_id;
        let execution = self.load(execution_id).await?;

        if execution.status == ExecutionStatus::Pending {
            let (execution, bootstrapped) = self
                .update(execution_id, |execution| {
                    if execution.status != ExecutionStatus::Pending {
                        return Ok(Update::Skip(false));
                    }
                    execution.start();
                    Ok(Update::Save(true))
                })
                .await?;
            if bootstrapped {
                info!("bootstrapping execution");
                self.enqueue_start_nodes(&execution).await?;
            }
            return Ok(());
        }

        if execution.status.is_terminal() {
            debug!(status = %execution.status, "nothing to evaluate");
            return Ok(());
        }

        let undispatched: Vec<NodeId> = execution
            .steps_in_order()
            .into_iter()
            .filter(|step| step.is_completed() && !step.children_dispatched)
            .map(|step| step.node_id.clone())
            .collect();
        for node_id in &undispatched {
            debug!(node_id = %node_id, "re-dispatching children");
            self.dispatch_children(execution_id, node_id).await?;
        }

        self.evaluate_completion(execution_id).await
    }

    /// Completes the suspended node with client data and continues traversal.
    ///
    /// `client_data` keys are merged into the suspended node's output along
    /// with `_resumedAt`. A workflow job is enqueued before the children: it
    /// runs completion detection and re-dispatches the children if enqueuing
    /// them fails here. If the workflow job itself cannot be enqueued the
    /// suspension is restored, so the resume can be retried.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` without touching the execution unless it is
    /// suspended, or `Queue` when the execution stays suspended because the
    /// queue is unavailable.
    #[instrument(skip(self, client_data), fields(execution_id = %execution_id))]
    pub async fn resume(
        &self,
        execution_id: ExecutionId,
        client_data: Output,
    ) -> Result<Execution, EngineError> {
        let invalid = |execution: &Execution| EngineError::InvalidState {
            execution_id,
            status: execution.status,
            expected: "suspended",
        };

        let (_, (node_id, suspended_output)) = self
            .update(execution_id, |execution| {
                if execution.status != ExecutionStatus::Suspended {
                    return Err(invalid(execution));
                }
                let Some(node_id) = execution.suspended_node_id.clone() else {
                    return Err(invalid(execution));
                };
                let Some(step) = execution.step_mut(node_id.as_str()) else {
                    return Err(invalid(execution));
                };
                let suspended_output = step.output.clone();
                step.resume(client_data.clone());
                execution.clear_suspension();
                Ok(Update::Save((node_id, suspended_output)))
            })
            .await?;

        if let Err(e) = self
            .queue
            .enqueue_workflow(WorkflowJob { execution_id })
            .await
        {
            warn!(node_id = %node_id, error = %e, "could not schedule resumed execution");
            if let Err(restore) = self
                .restore_suspension(execution_id, &node_id, suspended_output)
                .await
            {
                warn!(error = %restore, "could not restore suspension");
            }
            return Err(e.into());
        }

        info!(node_id = %node_id, "execution resumed");

        if let Err(e) = self.dispatch_children(execution_id, &node_id).await {
            warn!(error = %e, "children not dispatched, leaving them to the workflow job");
        }

        self.load(execution_id).await
    }

    /// Fails a non-terminal execution with error `cancelled`.
    ///
    /// Jobs still in flight are dropped by the terminal check when they are
    /// processed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the execution already finished.
    #[instrument(skip(self), fields(execution_id = %execution_id))]
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<Execution, EngineError> {
        let (execution, ()) = self
            .update(execution_id, |execution| {
                if execution.status.is_terminal() {
                    return Err(EngineError::InvalidState {
                        execution_id,
                        status: execution.status,
                        expected: "pending, running or suspended",
                    });
                }
                execution.fail("cancelled");
                Ok(Update::Save(()))
            })
            .await?;

        info!("execution cancelled");
        Ok(execution)
    }

    /// Loads an execution.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionNotFound` for an unknown ID.
    pub async fn get_execution(&self, execution_id: ExecutionId) -> Result<Execution, EngineError> {
        self.load(execution_id).await
    }

    /// Returns an execution's status and progress.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionNotFound` for an unknown ID.
    pub async fn execution_status(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionProgress, EngineError> {
        let execution = self.load(execution_id).await?;
        Ok(ExecutionProgress {
            status: execution.status,
            progress: routing::progress(&execution),
        })
    }

    /// Lists executions, newest first.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn list_executions(
        &self,
        filter: ExecutionFilter,
    ) -> Result<Vec<ExecutionSummary>, EngineError> {
        Ok(self.store.list(filter).await?)
    }

    async fn load(&self, execution_id: ExecutionId) -> Result<Execution, EngineError> {
        self.store.get(execution_id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => EngineError::ExecutionNotFound { execution_id },
            other => other.into(),
        })
    }

    /// Applies `mutate` to a fresh copy of the execution and saves it.
    ///
    /// `mutate` runs once per attempt and must be free of side effects other
    /// than on the execution it is handed.
    async fn update<T, F>(
        &self,
        execution_id: ExecutionId,
        mut mutate: F,
    ) -> Result<(Execution, T), EngineError>
    where
        F: FnMut(&mut Execution) -> Result<Update<T>, EngineError> + Send,
        T: Send,
    {
        let attempts = self.config.max_update_attempts.max(1);
        for attempt in 1..=attempts {
            let mut execution = self.load(execution_id).await?;
            match mutate(&mut execution)? {
                Update::Skip(value) => return Ok((execution, value)),
                Update::Save(value) => match self.store.save(&execution).await {
                    Ok(saved) => return Ok((saved, value)),
                    Err(StoreError::VersionConflict { expected, actual }) => {
                        debug!(attempt, expected, actual, "lost update race, retrying");
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
        Err(EngineError::Contention {
            execution_id,
            attempts,
        })
    }

    /// Puts a resumed step back into suspension.
    ///
    /// Only applies while the step is still completed with undispatched
    /// children, i.e. nothing has acted on the resume yet.
    async fn restore_suspension(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        output: Output,
    ) -> Result<(), EngineError> {
        self.update(execution_id, |execution| {
            if execution.status.is_terminal() {
                return Ok(Update::Skip(()));
            }
            let Some(step) = execution.step_mut(node_id.as_str()) else {
                return Ok(Update::Skip(()));
            };
            if !step.is_completed() || step.children_dispatched {
                return Ok(Update::Skip(()));
            }
            step.suspend(output.clone());
            execution.suspended_node_id = Some(node_id.clone());
            execution.status = ExecutionStatus::Suspended;
            Ok(Update::Save(()))
        })
        .await?;
        info!(node_id = %node_id, "suspension restored");
        Ok(())
    }

    /// Fails an execution that nothing will drive, logging if that fails too.
    async fn abandon(&self, execution_id: ExecutionId, reason: String) {
        let result = self
            .update(execution_id, |execution| {
                if execution.status.is_terminal() {
                    return Ok(Update::Skip(()));
                }
                execution.fail(reason.clone());
                Ok(Update::Save(()))
            })
            .await;
        if let Err(e) = result {
            warn!(execution_id = %execution_id, error = %e, "could not fail unscheduled execution");
        }
    }

    async fn enqueue_start_nodes(&self, execution: &Execution) -> Result<(), EngineError> {
        for node in execution.graph.entry_nodes() {
            self.queue
                .enqueue_node(NodeJob {
                    execution_id: execution.id,
                    node_id: node.id.clone(),
                    input: execution.input.clone(),
                    triggered_by: None,
                })
                .await?;
        }
        Ok(())
    }

    /// Runs the executor, turning lookup failures, panics and timeouts into
    /// node errors.
    ///
    /// Client nodes always wait for a resume: a success from a client node's
    /// executor is recorded as a suspension with the same output.
    async fn invoke(&self, node: Node, input: JsonValue, context: NodeContext) -> NodeOutcome {
        let node_id = node.id.clone();
        let is_condition = node.is_condition();
        let is_client = node.is_client();

        let executor = match self.registry.resolve(&node) {
            Ok(executor) => executor,
            Err(e) => return NodeOutcome::error(e.to_string()),
        };

        let args = NodeExecutionArgs {
            node,
            input,
            context,
        };
        let run = AssertUnwindSafe(executor.execute(args)).catch_unwind();
        let result = match self.config.node_timeout() {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    return NodeOutcome::error(NodeExecutionError::Timeout { node_id }.to_string());
                }
            },
            None => run.await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => {
                return NodeOutcome::error(NodeExecutionError::Panicked { node_id }.to_string());
            }
        };

        match outcome {
            NodeOutcome::Success { ref output }
                if is_condition
                    && !output
                        .get(CONDITION_RESULT_KEY)
                        .is_some_and(JsonValue::is_boolean) =>
            {
                NodeOutcome::error(NodeExecutionError::MissingConditionResult { node_id }.to_string())
            }
            NodeOutcome::Success { output } if is_client => NodeOutcome::suspended(output),
            other => other,
        }
    }

    /// Enqueues the eligible children of a completed step and marks it
    /// dispatched.
    ///
    /// Targets that already have a completed or running step are skipped:
    /// joins are OR joins, so one satisfied incoming edge is enough.
    async fn dispatch_children(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
    ) -> Result<(), EngineError> {
        let execution = self.load(execution_id).await?;
        let Some(step) = execution.step(node_id.as_str()) else {
            return Ok(());
        };
        if !step.is_completed() || step.children_dispatched {
            return Ok(());
        }
        let node = execution
            .graph
            .get_node(node_id.as_str())
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.clone(),
            })?;

        let targets = routing::eligible_targets(&execution.graph, node, &step.output);
        let input = JsonValue::Object(execution.context().all_outputs_flattened());
        for target in targets {
            let status = execution.step(target.as_str()).map(|s| s.status);
            if matches!(status, Some(StepStatus::Completed | StepStatus::Running)) {
                debug!(target = %target, "target already satisfied, not enqueuing");
                continue;
            }
            debug!(target = %target, "enqueuing child");
            self.queue
                .enqueue_node(NodeJob {
                    execution_id,
                    node_id: target,
                    input: input.clone(),
                    triggered_by: Some(node_id.clone()),
                })
                .await?;
        }

        self.update(execution_id, |execution| {
            let Some(step) = execution.step_mut(node_id.as_str()) else {
                return Ok(Update::Skip(()));
            };
            if !step.is_completed() || step.children_dispatched {
                return Ok(Update::Skip(()));
            }
            step.children_dispatched = true;
            Ok(Update::Save(()))
        })
        .await?;
        Ok(())
    }

    /// Marks a running execution completed once no reachable work is left.
    async fn evaluate_completion(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        let (_, completed) = self
            .update(execution_id, |execution| {
                if execution.status != ExecutionStatus::Running
                    || !routing::is_finished(execution)
                {
                    return Ok(Update::Skip(false));
                }
                execution.complete();
                Ok(Update::Save(true))
            })
            .await?;
        if completed {
            info!(execution_id = %execution_id, "execution completed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
