use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post, put},
};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod db;
mod error;
mod handlers;
mod hints;
mod jobs;
mod metrics;
mod models;
mod puzzle;
mod repository;
mod sync;
#[cfg(test)]
mod test_helpers;

use crate::config::{ExplainerConfig, FileConfig, SyncConfig, XwordConfig};
use crate::db::Database;
use crate::hints::Revealer;
use crate::jobs::JobRunner;
use crate::metrics::ServerMetrics;
use crate::repository::PuzzleRepository;
use crate::sync::SyncHub;

/// How long shutdown waits for running explanation jobs.
const JOB_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "xword")]
#[command(about = "Shared crossword sessions with live sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.xword)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground (the default)
    Serve(ServeArgs),

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Parser, Default)]
struct ServeArgs {
    /// Port for the web server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
#[allow(dead_code)]
pub(crate) struct AppState {
    pub config: Arc<XwordConfig>,
    pub sync_config: Arc<SyncConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    pub db: Arc<Database>,
    pub repository: Arc<PuzzleRepository>,
    /// Connection registries, broadcaster and the persist-then-broadcast paths
    pub sync: SyncHub,
    pub revealer: Arc<Revealer>,
    pub jobs: Arc<JobRunner>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = XwordConfig::new(cli.data_dir.clone())?;
    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .context("Invalid configuration")?;

    match cli.command {
        None => run_server(ServeArgs::default(), config, file_config).await,
        Some(Commands::Serve(args)) => run_server(args, config, file_config).await,
        Some(Commands::Config) => {
            println!("{}", serde_json::to_string_pretty(&file_config)?);
            Ok(())
        }
    }
}

/// Every route the server exposes, without middleware or state.
pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        // Puzzles
        .route("/api/puzzles", post(handlers::create_puzzle_handler))
        .route("/api/puzzles/{id}", get(handlers::get_puzzle_handler))
        // Sessions
        .route("/api/sessions", post(handlers::create_session_handler))
        .route("/api/sessions/{id}", get(handlers::get_session_handler))
        .route("/api/sessions/{id}/cell", post(handlers::update_cell_handler))
        .route("/api/sessions/{id}/state", put(handlers::replace_state_handler))
        .route("/api/sessions/{id}/claim", post(handlers::claim_handler))
        .route(
            "/api/sessions/{id}/attributions",
            get(handlers::attributions_handler),
        )
        .route("/api/sessions/{id}/hint", post(handlers::hint_handler))
        .route(
            "/api/sessions/{id}/events",
            get(handlers::session_events_handler),
        )
        // Explanations
        .route("/api/sessions/{id}/explain", post(handlers::explain_handler))
        .route(
            "/api/sessions/{id}/explain/regenerate",
            post(handlers::regenerate_handler),
        )
        .route(
            "/api/sessions/{id}/explain/report",
            post(handlers::report_handler),
        )
        .route(
            "/api/explanations/regenerate/{request_id}",
            get(handlers::job_status_handler),
        )
        // Admin
        .route("/api/admin/stats", get(handlers::get_database_stats))
        .route("/api/admin/reports", get(handlers::list_reports_handler))
        .route(
            "/api/admin/explanations",
            post(handlers::admin_adhoc_handler),
        )
        .route(
            "/api/admin/explanations/regenerate",
            post(handlers::admin_regenerate_handler),
        )
        // Duplex socket
        .route("/api/ws", get(handlers::sync_socket_handler))
        .with_state(state)
}

async fn run_server(args: ServeArgs, config: XwordConfig, file_config: FileConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "xword=debug,tower_http=debug,info"
    } else {
        "xword=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting xword sync server");

    let config = Arc::new(config);
    let sync_config = Arc::new(SyncConfig::from_file(&file_config.sync));
    let explainer_config = ExplainerConfig::from_file(&file_config.explainer);

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(PuzzleRepository::new(db.pool.clone()));

    let metrics = Arc::new(ServerMetrics::new());
    let sync = SyncHub::new(repository.clone(), metrics.clone());
    let revealer = Arc::new(Revealer::new(repository.clone(), sync.sessions.clone()));
    let jobs = Arc::new(JobRunner::new(
        repository.clone(),
        jobs::explainer::from_config(&explainer_config)?,
        sync.broadcaster.clone(),
        metrics.clone(),
    ));

    // Push streams are only reaped by the heartbeat
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat = tokio::spawn(sync::heartbeat::run_heartbeat(
        sync.streams.clone(),
        metrics.clone(),
        sync_config.heartbeat_interval,
        heartbeat_cancel.clone(),
    ));

    let app_state = AppState {
        config: config.clone(),
        sync_config,
        metrics,
        db,
        repository,
        sync,
        revealer,
        jobs: jobs.clone(),
    };

    let app = build_router(app_state)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive());

    let host = args.host.unwrap_or(file_config.server.host);
    let port = args.port.unwrap_or(file_config.server.port);
    let addr = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let actual_addr = listener.local_addr()?;

    info!("xword listening on http://{}", actual_addr);
    info!("  POST   /api/sessions                 - Create a session");
    info!("  GET    /api/sessions/:id/events      - Push stream for a session");
    info!("  GET    /api/ws                       - Duplex socket (join_session)");
    info!("  GET    /api/explanations/regenerate/:id - Poll an explanation job");

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    heartbeat_cancel.cancel();
    if let Err(e) = heartbeat.await {
        error!("Heartbeat task failed: {}", e);
    }

    jobs.shutdown(JOB_DRAIN_TIMEOUT).await;

    info!("Shutdown complete");
    server_result
}
