//! Postgres persistence for workflows and executions.

pub mod execution;
pub mod workflow;

pub use execution::PgExecutionStore;
pub use workflow::PgWorkflowStore;

use lantern_workflow::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connects to Postgres and applies pending migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable {
        message: e.to_string(),
    }
}

fn serialization(e: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization {
        message: e.to_string(),
    }
}
