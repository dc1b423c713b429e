use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use kwbatch_client::{ClientConfig, EnvCredentialSupplier, build_orchestrator};
use kwbatch_core::{EngineConfig, JobManager, TracingWorkerReporter};
use kwbatch_server::routes;
use kwbatch_server::state::AppState;

/// Request bodies above this are rejected before parsing.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kwbatch=info".parse()?))
        .with_target(false)
        .init();

    let host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("API_PORT").unwrap_or_else(|_| "8000".to_string());
    let addr = format!("{host}:{port}");

    let engine = EngineConfig::from_env().context("Invalid engine configuration")?;
    let clients = ClientConfig::from_env().context("Invalid provider configuration")?;
    let credentials = EnvCredentialSupplier::from_env();

    let orchestrator = Arc::new(
        build_orchestrator(&engine, &clients, &credentials)
            .await
            .context("Failed to initialize providers")?,
    );

    let jobs = Arc::new(JobManager::new(
        orchestrator.clone(),
        engine.jobs.clone(),
        Arc::new(TracingWorkerReporter),
    ));
    let cancel = CancellationToken::new();
    let workers = jobs.spawn_workers(&cancel);

    let state = Arc::new(AppState::new(orchestrator, jobs));
    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!(workers = workers.len(), "Starting server on {addr}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cancel.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "Worker task ended abnormally");
        }
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
