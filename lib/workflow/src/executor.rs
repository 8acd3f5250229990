//! Node execution contract.
//!
//! Every node type implements [`NodeExecutor`]. The engine never depends on
//! concrete node types; it looks executors up by type name in a
//! [`NodeRegistry`] that is built once at process start and passed in.

use crate::context::ExecutionContext;
use crate::error::NodeExecutionError;
use crate::execution::Output;
use crate::node::Node;
use crate::nodes::{ClientNode, ConditionNode, PassthroughNode, TransformNode};
use async_trait::async_trait;
use lantern_core::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Identity and history of the execution a node runs in.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub execution: ExecutionContext,
}

/// Arguments to a single node invocation.
#[derive(Debug, Clone)]
pub struct NodeExecutionArgs {
    pub node: Node,
    /// Flattened outputs of the triggering path, or the workflow input for
    /// start nodes.
    pub input: JsonValue,
    pub context: NodeContext,
}

/// Result of a node invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    /// Normal completion.
    Success { output: Output },
    /// Halt traversal at this node until resumed.
    Suspended { output: Output },
    /// Node-local failure.
    Error { error: String },
}

impl NodeOutcome {
    #[must_use]
    pub fn success(output: Output) -> Self {
        Self::Success { output }
    }

    #[must_use]
    pub fn suspended(output: Output) -> Self {
        Self::Suspended { output }
    }

    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }
}

/// Trait for node execution.
///
/// Implementations must not touch execution state; everything a node produces
/// goes through the returned outcome.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Executes a node.
    async fn execute(&self, args: NodeExecutionArgs) -> NodeOutcome;
}

/// Maps node type names to executors.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
    /// Used for client nodes whose type has no dedicated executor.
    client_fallback: Option<Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in node types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let passthrough = Arc::new(PassthroughNode);
        registry.register("trigger", passthrough.clone());
        registry.register("passthrough", passthrough);
        registry.register("transform", Arc::new(TransformNode));
        registry.register(crate::node::CONDITION_NODE_TYPE, Arc::new(ConditionNode));
        registry.client_fallback = Some(Arc::new(ClientNode));
        registry
    }

    /// Registers an executor for a node type, replacing any previous one.
    pub fn register(&mut self, node_type: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type.into(), executor);
    }

    /// Finds the executor for a node.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedNodeType` if nothing can run the node.
    pub fn resolve(&self, node: &Node) -> Result<Arc<dyn NodeExecutor>, NodeExecutionError> {
        if let Some(executor) = self.executors.get(&node.node_type) {
            return Ok(executor.clone());
        }
        if node.is_client() {
            if let Some(fallback) = &self.client_fallback {
                return Ok(fallback.clone());
            }
        }
        Err(NodeExecutionError::UnsupportedNodeType {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
        })
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.executors.keys().collect();
        types.sort();
        f.debug_struct("NodeRegistry")
            .field("types", &types)
            .field("client_fallback", &self.client_fallback.is_some())
            .finish()
    }
}
