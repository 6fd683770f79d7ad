//! Herald Daemon - persona orchestration service
//!
//! Runs the ingestion, timeline, learning, self-style and publisher workers
//! for one instance and serves the admin API.

use clap::Parser;
use herald_daemon::config::DaemonConfig;
use herald_daemon::error::{DaemonError, DaemonResult};
use herald_daemon::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Herald Daemon CLI
#[derive(Parser)]
#[command(name = "heraldd")]
#[command(about = "Herald Daemon - persona orchestration service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HERALD_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides server.listen_addr)
    #[arg(short, long, env = "HERALD_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "HERALD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "HERALD_LOG_JSON")]
    json: bool,

    /// Stable label for this instance's lock identity
    #[arg(long, env = "HERALD_INSTANCE_ID")]
    instance_id: Option<String>,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(instance_id) = cli.instance_id {
        config.instance_id = Some(instance_id);
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        "Starting heraldd"
    );

    let server = Server::new(config).await?;
    server.run().await
}
