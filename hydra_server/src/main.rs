//! Hydra server binary.
//!
//! Wires the registry (Postgres when `DATABASE_URL` is set, in-memory
//! otherwise), runs the recovery sweep, starts the pipeline worker and
//! serves the JSON API.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use hydra_server::config::HydraConfig;
use hydra_server::routes::{hydra_router, HydraRouterState};
use hydra_server::services::orchestrator::Hydra;
use hydra_server::services::pg_registry::{self, PgRegistry};
use hydra_server::services::port_allocator::BindProbe;
use hydra_server::services::process_runner::ProcessRunner;
use hydra_server::services::registry::{MemoryRegistry, SubmissionRegistry};
use hydra_server::services::worker::{join_worker, run_worker, ChannelQueue};

#[derive(Parser)]
#[command(name = "hydra", about = "Build and serve static sites from git branches")]
struct Cli {
    /// API server port
    #[arg(short, long, env = "HYDRA_API_PORT", default_value = "5000")]
    port: u16,

    /// PostgreSQL connection URL; submissions are kept in memory without it
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    // Initialize metrics before recovery records anything
    hydra_server::metrics::init_metrics();

    let cli = Cli::parse();
    let config = HydraConfig::from_env();

    tracing::info!(
        base_port = config.base_port,
        window = config.port_window,
        output_dir = %config.output_dir.display(),
        serve_mode = ?config.serve_mode,
        "Starting Hydra..."
    );

    let registry: Arc<dyn SubmissionRegistry> = match cli.database_url {
        Some(ref url) => {
            let pool = pg_registry::connect(url, 8)?;
            {
                let mut conn = pool
                    .get()
                    .await
                    .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
                tracing::info!("Running database migrations...");
                hydra_server::migration::run_migration(&mut conn).await?;
                tracing::info!("Database migrations completed.");
            }
            Arc::new(PgRegistry::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set -- submissions are kept in memory only");
            Arc::new(MemoryRegistry::new())
        }
    };

    let (queue, jobs) = ChannelQueue::new();
    let hydra = Arc::new(Hydra::new(
        config.clone(),
        registry,
        Arc::new(ProcessRunner::new(config.command_timeout)),
        Arc::new(BindProbe::new(config.bind_addr.clone())),
        Arc::new(queue),
    ));

    // Reconcile before accepting any requests
    let report = hydra.recover().await?;
    tracing::info!(
        marked_dead = report.marked_dead.len(),
        requeued = report.requeued.len(),
        pruned_outputs = report.pruned_outputs,
        "Recovery complete"
    );

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(run_worker(hydra.pipeline(), jobs, shutdown.clone()));

    let app = hydra_router(HydraRouterState {
        hydra: hydra.clone(),
    })
    .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Hydra API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    join_worker(worker).await;
    hydra.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
