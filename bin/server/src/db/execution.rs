//! Postgres execution store.
//!
//! Each execution is one row: the full document as JSONB plus the columns
//! listings filter and sort on. Updates are a compare-and-swap on the
//! `version` column.

use super::{serialization, unavailable};
use async_trait::async_trait;
use chrono::Utc;
use lantern_core::ExecutionId;
use lantern_workflow::{Execution, ExecutionFilter, ExecutionStore, ExecutionSummary, StoreError};
use sqlx::{FromRow, PgPool};

/// Row type for execution queries.
#[derive(FromRow)]
struct ExecutionRow {
    version: i64,
    document: serde_json::Value,
}

impl ExecutionRow {
    fn try_into_execution(self) -> Result<Execution, StoreError> {
        let mut execution: Execution =
            serde_json::from_value(self.document).map_err(serialization)?;
        // The column is authoritative; the document copy is informational.
        execution.version = u64::try_from(self.version).map_err(serialization)?;
        Ok(execution)
    }
}

fn version_column(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(serialization)
}

/// Execution store backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_version(&self, id: ExecutionId) -> Result<Option<i64>, StoreError> {
        sqlx::query_scalar("SELECT version FROM executions WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create(&self, execution: &Execution) -> Result<(), StoreError> {
        let document = serde_json::to_value(execution).map_err(serialization)?;
        let result = sqlx::query(
            r#"
            INSERT INTO executions
                (id, workflow_id, status, version, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.status.as_str())
        .bind(version_column(execution.version)?)
        .bind(document)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                entity: "execution",
                id: execution.id.to_string(),
            });
        }
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Execution, StoreError> {
        let row: Option<ExecutionRow> =
            sqlx::query_as("SELECT version, document FROM executions WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;

        match row {
            Some(row) => row.try_into_execution(),
            None => Err(StoreError::NotFound {
                entity: "execution",
                id: id.to_string(),
            }),
        }
    }

    async fn save(&self, execution: &Execution) -> Result<Execution, StoreError> {
        let mut saved = execution.clone();
        saved.version += 1;
        saved.updated_at = Utc::now();
        let document = serde_json::to_value(&saved).map_err(serialization)?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $3, version = $4, document = $5, updated_at = $6
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(execution.id.to_string())
        .bind(version_column(execution.version)?)
        .bind(saved.status.as_str())
        .bind(version_column(saved.version)?)
        .bind(document)
        .bind(saved.updated_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 1 {
            return Ok(saved);
        }

        match self.current_version(execution.id).await? {
            Some(actual) => Err(StoreError::VersionConflict {
                expected: execution.version,
                actual: u64::try_from(actual).map_err(serialization)?,
            }),
            None => Err(StoreError::NotFound {
                entity: "execution",
                id: execution.id.to_string(),
            }),
        }
    }

    async fn list(&self, filter: ExecutionFilter) -> Result<Vec<ExecutionSummary>, StoreError> {
        let limit = i64::try_from(filter.limit).map_err(serialization)?;
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT version, document
            FROM executions
            WHERE ($1::TEXT IS NULL OR workflow_id = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(filter.workflow_id.map(|id| id.to_string()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter()
            .map(|row| row.try_into_execution().map(|e| e.summary()))
            .collect()
    }
}
