//! Error types for the workflow crate.
//!
//! Errors are layered:
//! - `GraphError`: malformed graphs, detected before an execution exists
//! - `NodeExecutionError`: node-local failures, recorded on the failed step
//! - `EngineError`: everything the engine surfaces to its callers, wrapping
//!   store and queue failures
//!
//! Store and queue errors live next to their traits in [`crate::store`] and
//! [`crate::queue`].

use crate::execution::ExecutionStatus;
use crate::node::NodeId;
use crate::queue::QueueError;
use crate::store::StoreError;
use lantern_core::{ExecutionId, WorkflowId};
use std::fmt;

/// Errors from graph construction and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// Two nodes share an ID.
    DuplicateNode { node_id: NodeId },
    /// An edge references a node that does not exist.
    DanglingEdge {
        source: NodeId,
        target: NodeId,
        missing: NodeId,
    },
    /// The graph has no nodes.
    Empty,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::DanglingEdge {
                source,
                target,
                missing,
            } => write!(
                f,
                "edge {source} -> {target} references missing node {missing}"
            ),
            Self::Empty => write!(f, "graph has no nodes"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Node-local execution failures.
///
/// These never escape the engine as errors; they are written to the failed
/// step and fail the execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeExecutionError {
    /// The executor reported an error.
    Failed { node_id: NodeId, reason: String },
    /// No executor is registered for the node type.
    UnsupportedNodeType { node_id: NodeId, node_type: String },
    /// A condition node did not produce a boolean `_conditionResult`.
    MissingConditionResult { node_id: NodeId },
    /// The executor exceeded the configured timeout.
    Timeout { node_id: NodeId },
    /// The executor panicked.
    Panicked { node_id: NodeId },
}

impl fmt::Display for NodeExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { node_id, reason } => write!(f, "node {node_id} failed: {reason}"),
            Self::UnsupportedNodeType { node_id, node_type } => {
                write!(f, "node {node_id} has unsupported type '{node_type}'")
            }
            Self::MissingConditionResult { node_id } => write!(
                f,
                "condition node {node_id} did not produce a boolean _conditionResult"
            ),
            Self::Timeout { node_id } => write!(f, "node {node_id} timed out"),
            Self::Panicked { node_id } => write!(f, "node {node_id} panicked"),
        }
    }
}

impl std::error::Error for NodeExecutionError {}

/// Errors surfaced by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The graph is malformed.
    Graph(GraphError),
    /// The workflow definition does not exist.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// The execution does not exist.
    ExecutionNotFound { execution_id: ExecutionId },
    /// The execution is not in a state that allows the operation.
    InvalidState {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        expected: &'static str,
    },
    /// Compare-and-swap retries were exhausted.
    Contention {
        execution_id: ExecutionId,
        attempts: u32,
    },
    /// The execution store failed.
    Store(StoreError),
    /// The work queue failed.
    Queue(QueueError),
}

impl EngineError {
    /// Returns true for infrastructure failures.
    ///
    /// A job that fails with a retryable error must be left unacknowledged so
    /// the queue redelivers it; the execution is not marked failed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. } | Self::Store(_) | Self::Queue(_))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(e) => write!(f, "invalid graph: {e}"),
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::InvalidState {
                execution_id,
                status,
                expected,
            } => write!(
                f,
                "execution {execution_id} is {status}, expected {expected}"
            ),
            Self::Contention {
                execution_id,
                attempts,
            } => write!(
                f,
                "execution {execution_id} update lost {attempts} consecutive races"
            ),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Queue(e) => write!(f, "queue error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<GraphError> for EngineError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<QueueError> for EngineError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_display() {
        let err = GraphError::DanglingEdge {
            source: NodeId::from("1"),
            target: NodeId::from("9"),
            missing: NodeId::from("9"),
        };
        assert_eq!(err.to_string(), "edge 1 -> 9 references missing node 9");
    }

    #[test]
    fn node_execution_error_display() {
        let err = NodeExecutionError::Failed {
            node_id: NodeId::from("4"),
            reason: "upstream returned 500".to_string(),
        };
        assert!(err.to_string().contains("node 4 failed"));
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn invalid_state_display() {
        let err = EngineError::InvalidState {
            execution_id: ExecutionId::new(),
            status: ExecutionStatus::Completed,
            expected: "suspended",
        };
        assert!(err.to_string().contains("is completed, expected suspended"));
    }

    #[test]
    fn only_infrastructure_errors_are_retryable() {
        let execution_id = ExecutionId::new();
        assert!(
            EngineError::Store(StoreError::Unavailable {
                message: "connection refused".to_string()
            })
            .is_retryable()
        );
        assert!(
            EngineError::Queue(QueueError::PublishFailed {
                message: "timeout".to_string()
            })
            .is_retryable()
        );
        assert!(
            EngineError::Contention {
                execution_id,
                attempts: 8
            }
            .is_retryable()
        );
        assert!(!EngineError::ExecutionNotFound { execution_id }.is_retryable());
        assert!(!EngineError::Graph(GraphError::Empty).is_retryable());
    }
}
