//! Execution state.
//!
//! An [`Execution`] is one run of a workflow graph. It carries a snapshot of
//! the graph, one [`ExecutionStep`] per node that has been dispatched, and the
//! lifecycle status:
//!
//! ```text
//! pending -> running -> { suspended <-> running } -> { completed | failed }
//! ```
//!
//! Steps are keyed by node ID. Re-executing a node overwrites its step rather
//! than appending a second one, so at-least-once delivery never produces
//! duplicate rows.

use crate::context::ExecutionContext;
use crate::graph::WorkflowGraph;
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use lantern_core::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Output key holding a condition node's boolean result.
pub const CONDITION_RESULT_KEY: &str = "_conditionResult";
/// Output key set on a step completed through resume.
pub const RESUMED_AT_KEY: &str = "_resumedAt";
/// Output key carrying the message a client node shows to the user.
pub const CLIENT_MESSAGE_KEY: &str = "_clientMessage";

/// Output mapping produced by a node.
pub type Output = Map<String, JsonValue>;

/// The overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, waiting for its first job.
    Pending,
    /// Nodes are being dispatched.
    Running,
    /// Halted at a node until resume.
    Suspended,
    /// Every reachable node completed.
    Completed,
    /// A node failed or the execution was cancelled.
    Failed,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "suspended" => Ok(Self::Suspended),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// The status of a single node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Suspended,
}

/// The authoritative record of a node's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub node_id: NodeId,
    pub status: StepStatus,
    /// Input the node was invoked with.
    #[serde(default)]
    pub input: JsonValue,
    #[serde(default)]
    pub output: Output,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Execution order; reassigned each time the node (re)starts.
    pub sequence: u64,
    /// How many times the node has been started.
    pub attempts: u32,
    /// Whether the eligible children of this completed step were enqueued.
    #[serde(default)]
    pub children_dispatched: bool,
}

impl ExecutionStep {
    /// Creates a step for a node that is starting now.
    #[must_use]
    pub fn running(node_id: NodeId, input: JsonValue, sequence: u64) -> Self {
        Self {
            node_id,
            status: StepStatus::Running,
            input,
            output: Output::new(),
            error: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            sequence,
            attempts: 1,
            children_dispatched: false,
        }
    }

    /// Restarts the step, discarding the previous attempt's result.
    pub fn restart(&mut self, input: JsonValue, sequence: u64) {
        self.status = StepStatus::Running;
        self.input = input;
        self.output = Output::new();
        self.error = None;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.sequence = sequence;
        self.attempts += 1;
        self.children_dispatched = false;
    }

    /// Marks the step completed with the node's output.
    pub fn complete(&mut self, output: Output) {
        self.status = StepStatus::Completed;
        self.output = output;
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    /// Marks the step suspended with the node's partial output.
    pub fn suspend(&mut self, output: Output) {
        self.status = StepStatus::Suspended;
        self.output = output;
        self.completed_at = None;
    }

    /// Marks the step failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Completes a suspended step with client-submitted data.
    ///
    /// Keys of `client_data` are merged over the suspended output, and
    /// `_resumedAt` records when the merge happened.
    pub fn resume(&mut self, client_data: Output) {
        let now = Utc::now();
        let mut output = std::mem::take(&mut self.output);
        output.extend(client_data);
        output.insert(
            RESUMED_AT_KEY.to_string(),
            JsonValue::String(now.to_rfc3339()),
        );
        self.status = StepStatus::Completed;
        self.output = output;
        self.error = None;
        self.completed_at = Some(now);
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// One run of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    /// Snapshot of the graph taken when the execution started.
    pub graph: WorkflowGraph,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub steps: BTreeMap<NodeId, ExecutionStep>,
    /// Initial trigger payload.
    #[serde(default)]
    pub input: JsonValue,
    /// Set iff the status is `suspended`.
    pub suspended_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optimistic concurrency counter, bumped by the store on every save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Creates a new execution in pending state.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, graph: WorkflowGraph, input: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            id: ExecutionId::new(),
            workflow_id,
            graph,
            status: ExecutionStatus::Pending,
            steps: BTreeMap::new(),
            input,
            suspended_node_id: None,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Returns the step for a node, if it has been dispatched.
    #[must_use]
    pub fn step(&self, node_id: &str) -> Option<&ExecutionStep> {
        self.steps.get(node_id)
    }

    /// Returns a mutable step for a node, if it has been dispatched.
    pub fn step_mut(&mut self, node_id: &str) -> Option<&mut ExecutionStep> {
        self.steps.get_mut(node_id)
    }

    fn next_sequence(&self) -> u64 {
        self.steps
            .values()
            .map(|step| step.sequence)
            .max()
            .map_or(1, |max| max + 1)
    }

    /// Marks a node as running, creating or overwriting its step.
    pub fn begin_step(&mut self, node_id: &NodeId, input: JsonValue) {
        let sequence = self.next_sequence();
        match self.steps.get_mut(node_id.as_str()) {
            Some(step) => step.restart(input, sequence),
            None => {
                self.steps.insert(
                    node_id.clone(),
                    ExecutionStep::running(node_id.clone(), input, sequence),
                );
            }
        }
    }

    /// Moves a pending execution to running.
    pub fn start(&mut self) {
        if self.status == ExecutionStatus::Pending {
            self.status = ExecutionStatus::Running;
        }
    }

    /// Suspends the execution at a node.
    ///
    /// An execution holds at most one suspension; a second suspended branch
    /// keeps its suspended step and is picked up after the first resume.
    pub fn suspend_at(&mut self, node_id: &NodeId) {
        if self.suspended_node_id.is_none() {
            self.suspended_node_id = Some(node_id.clone());
        }
        self.status = ExecutionStatus::Suspended;
    }

    /// Clears the suspension, re-suspending on any other suspended step.
    pub fn clear_suspension(&mut self) {
        self.suspended_node_id = self
            .steps_in_order()
            .into_iter()
            .find(|step| step.status == StepStatus::Suspended)
            .map(|step| step.node_id.clone());
        self.status = if self.suspended_node_id.is_some() {
            ExecutionStatus::Suspended
        } else {
            ExecutionStatus::Running
        };
    }

    /// Marks the execution completed.
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.suspended_node_id = None;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the execution failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.suspended_node_id = None;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    /// Returns the steps ordered by execution sequence.
    #[must_use]
    pub fn steps_in_order(&self) -> Vec<&ExecutionStep> {
        let mut steps: Vec<_> = self.steps.values().collect();
        steps.sort_by_key(|step| step.sequence);
        steps
    }

    /// Returns the completed node IDs in execution order.
    #[must_use]
    pub fn completed_nodes(&self) -> Vec<NodeId> {
        self.steps_in_order()
            .into_iter()
            .filter(|step| step.is_completed())
            .map(|step| step.node_id.clone())
            .collect()
    }

    /// Returns true if any step is suspended.
    #[must_use]
    pub fn has_suspended_step(&self) -> bool {
        self.steps
            .values()
            .any(|step| step.status == StepStatus::Suspended)
    }

    /// Builds the read-only context nodes see.
    #[must_use]
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(self.steps.values().cloned())
    }

    /// Summarises the execution for listings.
    #[must_use]
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            id: self.id,
            workflow_id: self.workflow_id,
            status: self.status,
            suspended_node_id: self.suspended_node_id.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            finished_at: self.finished_at,
        }
    }
}

/// A full execution plus derived fields, as returned to API callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    #[serde(flatten)]
    pub execution: Execution,
    pub completed_nodes: Vec<NodeId>,
}

impl From<Execution> for ExecutionSnapshot {
    fn from(execution: Execution) -> Self {
        let completed_nodes = execution.completed_nodes();
        Self {
            execution,
            completed_nodes,
        }
    }
}

/// Status and progress of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExecutionProgress {
    pub status: ExecutionStatus,
    /// Completed reachable nodes as a percentage of reachable nodes.
    pub progress: f64,
}

/// Listing entry for an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub suspended_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
