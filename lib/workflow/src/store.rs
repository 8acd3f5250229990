//! Execution and workflow persistence.
//!
//! The engine mutates executions only through [`ExecutionStore::save`], which
//! is a compare-and-swap on [`Execution::version`]. Two writers racing on the
//! same execution cannot both win; the loser reloads and retries.
//!
//! In-memory implementations back tests and single-process deployments. The
//! server provides Postgres implementations.

use crate::definition::Workflow;
use crate::execution::{Execution, ExecutionSummary};
use async_trait::async_trait;
use chrono::Utc;
use lantern_core::{ExecutionId, WorkflowId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Default page size for execution listings.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record with the given ID.
    NotFound { entity: &'static str, id: String },
    /// A record with the given ID already exists.
    AlreadyExists { entity: &'static str, id: String },
    /// The stored version moved since the caller read it.
    VersionConflict { expected: u64, actual: u64 },
    /// The backing store could not be reached.
    Unavailable { message: String },
    /// A stored document could not be encoded or decoded.
    Serialization { message: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::AlreadyExists { entity, id } => write!(f, "{entity} already exists: {id}"),
            Self::VersionConflict { expected, actual } => write!(
                f,
                "version conflict: expected {expected}, found {actual}"
            ),
            Self::Unavailable { message } => write!(f, "store unavailable: {message}"),
            Self::Serialization { message } => write!(f, "serialization failed: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Filter for execution listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionFilter {
    pub workflow_id: Option<WorkflowId>,
    pub limit: usize,
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            workflow_id: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

/// Trait for execution persistence.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Inserts a new execution.
    async fn create(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Loads an execution.
    async fn get(&self, id: ExecutionId) -> Result<Execution, StoreError>;

    /// Saves an execution if its stored version still equals
    /// `execution.version`.
    ///
    /// Returns the saved record with the version bumped.
    async fn save(&self, execution: &Execution) -> Result<Execution, StoreError>;

    /// Lists executions, newest first.
    async fn list(&self, filter: ExecutionFilter) -> Result<Vec<ExecutionSummary>, StoreError>;
}

/// Trait for workflow definition persistence.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Inserts or replaces a workflow.
    async fn put(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Loads a workflow.
    async fn get(&self, id: WorkflowId) -> Result<Workflow, StoreError>;
}

/// In-memory execution store.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<ExecutionId, Execution>>,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(StoreError::AlreadyExists {
                entity: "execution",
                id: execution.id.to_string(),
            });
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Execution, StoreError> {
        self.executions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "execution",
                id: id.to_string(),
            })
    }

    async fn save(&self, execution: &Execution) -> Result<Execution, StoreError> {
        let mut executions = self.executions.write().await;
        let stored = executions
            .get_mut(&execution.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "execution",
                id: execution.id.to_string(),
            })?;
        if stored.version != execution.version {
            return Err(StoreError::VersionConflict {
                expected: execution.version,
                actual: stored.version,
            });
        }

        let mut saved = execution.clone();
        saved.version += 1;
        saved.updated_at = Utc::now();
        *stored = saved.clone();
        Ok(saved)
    }

    async fn list(&self, filter: ExecutionFilter) -> Result<Vec<ExecutionSummary>, StoreError> {
        let executions = self.executions.read().await;
        let mut matching: Vec<_> = executions
            .values()
            .filter(|e| filter.workflow_id.is_none_or(|id| e.workflow_id == id))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching
            .into_iter()
            .take(filter.limit)
            .map(Execution::summary)
            .collect())
    }
}

/// In-memory workflow store.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn put(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get(&self, id: WorkflowId) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "workflow",
                id: id.to_string(),
            })
    }
}
