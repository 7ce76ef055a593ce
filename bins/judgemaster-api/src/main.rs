mod error;
mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use judgemaster_common::config::Settings;
use judgemaster_grader::{Grader, ProblemStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct AppState {
    pub grader: Arc<Grader>,
    pub problems: Arc<ProblemStore>,
    /// Bounds how many submissions execute at once
    pub permits: Arc<Semaphore>,
    /// Cancelled on shutdown; every grading runs under a child token
    pub shutdown: CancellationToken,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    warn!("Received shutdown signal, cancelling in-flight gradings...");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env()?;
    init_tracing(settings.log_json);

    info!("JudgeMaster API booting...");

    let grader = Grader::from_settings(&settings).context("Failed to initialise grader")?;
    info!(
        backend = grader.engine_name(),
        languages = ?grader.languages().list_languages(),
        default_timeout_ms = settings.default_timeout_ms,
        max_concurrent = settings.max_concurrent,
        "Grader ready"
    );

    let problems = ProblemStore::new(&settings.problems_dir);
    match problems.list_ids().await {
        Ok(ids) => info!(problems_dir = %settings.problems_dir.display(), count = ids.len(), "Problem directory found"),
        Err(e) => warn!(problems_dir = %settings.problems_dir.display(), error = %e, "Problem directory not readable"),
    }

    metrics::init();

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        grader: Arc::new(grader),
        problems: Arc::new(problems),
        permits: Arc::new(Semaphore::new(settings.max_concurrent)),
        shutdown: shutdown.clone(),
    });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.bind_addr))?;

    info!("HTTP server listening on {}", settings.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("JudgeMaster API shutdown complete");
    Ok(())
}
