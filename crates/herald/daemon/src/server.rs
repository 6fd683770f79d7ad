//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::collaborators;
use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use herald_runtime::{Collaborators, Orchestrator, RuntimeConfig};
use herald_storage::postgres::PostgresStorage;
use herald_storage::{HeraldStorage, InMemoryHeraldStorage};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Time allowed for workers to finish their current iteration
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Herald daemon server
pub struct Server {
    config: DaemonConfig,
    orchestrator: Arc<Orchestrator>,
}

impl Server {
    /// Create a new server with the given configuration
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let mut runtime = config.runtime.clone();
        if let Some(source) = &config.collaborators.source {
            runtime.ingestion.source = source.clone();
        }

        let collaborators = collaborators::from_config(&config.collaborators)?;
        let label = config
            .instance_id
            .clone()
            .unwrap_or_else(|| "heraldd".to_string());

        let orchestrator = match &config.storage {
            StorageConfig::Memory => {
                tracing::warn!(
                    "Using in-memory storage; state is not shared between instances"
                );
                build(
                    Arc::new(InMemoryHeraldStorage::new()),
                    runtime,
                    collaborators,
                    label,
                )
            }
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                let storage =
                    PostgresStorage::new(url, *max_connections, *connect_timeout_secs).await?;
                tracing::info!(max_connections, "Connected to PostgreSQL");
                build(Arc::new(storage), runtime, collaborators, label)
            }
        };

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Run the server until a signal or an API shutdown request
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(self.orchestrator.clone());
        let app = create_router(state, self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Herald daemon listening on {}", addr);
        tracing::info!(instance = %self.orchestrator.holder(), "Instance identity");

        let workers = self.orchestrator.start();

        let orchestrator = self.orchestrator.clone();
        let api_shutdown = self.orchestrator.shutdown_signal();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal(api_shutdown).await;
                orchestrator.shutdown();
            })
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Herald daemon shutting down");
        self.orchestrator.shutdown();

        let drain = join_workers(workers);
        if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, drain).await.is_err() {
            tracing::warn!(
                timeout_secs = WORKER_DRAIN_TIMEOUT.as_secs(),
                "Workers did not stop in time"
            );
        }

        tracing::info!("Herald daemon stopped");
        Ok(())
    }
}

fn build<S: HeraldStorage + 'static>(
    storage: Arc<S>,
    runtime: RuntimeConfig,
    collaborators: Collaborators,
    label: String,
) -> Orchestrator {
    Orchestrator::builder(storage)
        .config(runtime)
        .collaborators(collaborators)
        .instance_label(label)
        .build()
}

async fn join_workers(workers: Vec<tokio::task::JoinHandle<()>>) {
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task ended abnormally");
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal(mut api_shutdown: watch::Receiver<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let requested = async {
        while !*api_shutdown.borrow_and_update() {
            if api_shutdown.changed().await.is_err() {
                return;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
        _ = requested => {
            tracing::info!("Shutdown requested through the API");
        }
    }
}
