//! Workflow execution engine for lantern-flow.
//!
//! This crate provides:
//!
//! - **Graph Model**: Directed graphs using petgraph, with conditional edges
//! - **Execution State**: Per-node steps persisted behind an optimistic store
//! - **Templates**: `{{nodeId.path}}` references into earlier node outputs
//! - **Node Contract**: Executors looked up by type in a registry
//! - **Queues**: Workflow and node jobs, in memory or on NATS JetStream
//! - **Engine**: The state machine that claims, runs and routes nodes, and
//!   suspends and resumes executions at client nodes
//! - **Workers**: Queue consumers that drive the engine

pub mod context;
pub mod definition;
pub mod edge;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod executor;
pub mod graph;
pub mod nats;
pub mod node;
pub mod nodes;
pub mod queue;
pub mod routing;
pub mod store;
pub mod worker;

pub use context::ExecutionContext;
pub use definition::{Workflow, WorkflowMetadata};
pub use edge::Edge;
pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, GraphError, NodeExecutionError};
pub use execution::{
    Execution, ExecutionProgress, ExecutionSnapshot, ExecutionStatus, ExecutionStep,
    ExecutionSummary, Output, StepStatus,
};
pub use executor::{NodeContext, NodeExecutionArgs, NodeExecutor, NodeOutcome, NodeRegistry};
pub use graph::{GraphDocument, WorkflowGraph};
pub use node::{Environment, Node, NodeId};
pub use queue::{InMemoryWorkQueue, Job, JobStream, NodeJob, QueueError, QueueKind, WorkQueue, WorkflowJob};
pub use store::{
    ExecutionFilter, ExecutionStore, InMemoryExecutionStore, InMemoryWorkflowStore, StoreError,
    WorkflowStore,
};
pub use worker::Worker;
