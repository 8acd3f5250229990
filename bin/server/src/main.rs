use lantern_core::Result;
use lantern_server::config::ServerConfig;
use lantern_server::db::{self, PgExecutionStore, PgWorkflowStore};
use lantern_server::error::StartupError;
use lantern_server::routes;
use lantern_server::state::AppState;
use lantern_workflow::nats::{NatsConfig, NatsWorkQueue};
use lantern_workflow::{
    Engine, ExecutionStore, InMemoryExecutionStore, InMemoryWorkQueue,
    InMemoryWorkflowStore, JobStream, NodeRegistry, QueueKind, Worker, WorkflowStore,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let (executions, workflows): (Arc<dyn ExecutionStore>, Arc<dyn WorkflowStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = db::connect(url, config.database_max_connections)
                    .await
                    .map_err(|e| StartupError::Database {
                        details: e.to_string(),
                    })?;
                (
                    Arc::new(PgExecutionStore::new(pool.clone())),
                    Arc::new(PgWorkflowStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("no database_url configured, keeping state in memory");
                (
                    Arc::new(InMemoryExecutionStore::new()),
                    Arc::new(InMemoryWorkflowStore::new()),
                )
            }
        };

    let registry = Arc::new(NodeRegistry::with_builtins());
    let shutdown = CancellationToken::new();
    let mut workers = JoinSet::new();

    let engine = match &config.nats_url {
        Some(url) => {
            let queue = NatsWorkQueue::connect(NatsConfig::new(url.clone()))
                .await
                .map_err(|e| StartupError::Queue {
                    details: e.to_string(),
                })?;
            let engine = Engine::new(
                executions,
                Arc::new(queue.clone()),
                registry,
                config.engine.clone(),
            );
            for kind in [QueueKind::Workflow, QueueKind::Node] {
                for n in 0..config.worker_concurrency {
                    let jobs = queue.subscribe(kind).await.map_err(|e| StartupError::Queue {
                        details: e.to_string(),
                    })?;
                    let name = format!("{}-{n}", kind.name());
                    spawn_worker(&mut workers, name, &engine, jobs, &shutdown);
                }
            }
            engine
        }
        None => {
            tracing::warn!("no nats_url configured, using the in-process queue");
            let queue = InMemoryWorkQueue::new();
            let engine = Engine::new(
                executions,
                Arc::new(queue.clone()),
                registry,
                config.engine.clone(),
            );
            for n in 0..config.worker_concurrency {
                spawn_worker(&mut workers, format!("local-{n}"), &engine, queue.clone(), &shutdown);
            }
            engine
        }
    };

    let app = routes::router(AppState::new(engine, workflows));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| StartupError::Server {
            details: format!("failed to bind to {}: {e}", config.bind_addr),
        })?;

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .map_err(|e| StartupError::Server {
            details: e.to_string(),
        })?;

    shutdown.cancel();
    while workers.join_next().await.is_some() {}
    tracing::info!("shutdown complete");
    Ok(())
}

fn spawn_worker<S: JobStream + 'static>(
    workers: &mut JoinSet<()>,
    name: String,
    engine: &Engine,
    jobs: S,
    shutdown: &CancellationToken,
) {
    let worker = Worker::new(name, engine.clone(), jobs);
    let shutdown = shutdown.clone();
    workers.spawn(async move { worker.run(shutdown).await });
}

/// Resolves on ctrl-c or SIGTERM and cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
