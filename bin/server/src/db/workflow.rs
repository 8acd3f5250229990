//! Postgres workflow store.

use super::{serialization, unavailable};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lantern_core::WorkflowId;
use lantern_workflow::{GraphDocument, StoreError, Workflow, WorkflowMetadata, WorkflowStore};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    version: i32,
    graph_data: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_workflow(self) -> Result<Workflow, StoreError> {
        let id = WorkflowId::from_str(&self.id).map_err(serialization)?;
        let document: GraphDocument =
            serde_json::from_value(self.graph_data).map_err(serialization)?;
        let graph = document.try_into().map_err(serialization)?;

        Ok(Workflow {
            id,
            metadata: WorkflowMetadata {
                name: self.name,
                description: self.description,
                version: u32::try_from(self.version).map_err(serialization)?,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            graph,
        })
    }
}

/// Workflow store backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn put(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let graph_data = serde_json::to_value(&workflow.graph).map_err(serialization)?;
        let version = i32::try_from(workflow.metadata.version).map_err(serialization)?;

        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, name, description, version, graph_data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, description = EXCLUDED.description,
                version = EXCLUDED.version, graph_data = EXCLUDED.graph_data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.metadata.name)
        .bind(&workflow.metadata.description)
        .bind(version)
        .bind(graph_data)
        .bind(workflow.metadata.created_at)
        .bind(workflow.metadata.updated_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn get(&self, id: WorkflowId) -> Result<Workflow, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, version, graph_data, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match row {
            Some(row) => row.try_into_workflow(),
            None => Err(StoreError::NotFound {
                entity: "workflow",
                id: id.to_string(),
            }),
        }
    }
}
