//! Binary entry point: parses CLI flags, resolves layered configuration,
//! initializes tracing, and serves the introspection HTTP API over a
//! process-wide [`censor_core::EngineRegistry`] and
//! [`censor_core::worker_pool::InferenceWorkerPool`].

use std::sync::Arc;

use censor_core::worker_pool::InferenceWorkerPool;
use censor_core::EngineRegistry;
use censor_server::{AppState, Cli, ConfigLoader};
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "censor_server=info,censor_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let resolved = ConfigLoader::new(&cli).load()?;
    info!(
        host = %resolved.server.host,
        port = resolved.server.port,
        workers = resolved.worker_pool_size,
        "configuration resolved"
    );

    let registry = EngineRegistry::new();
    let worker_pool = Arc::new(InferenceWorkerPool::new(
        resolved.worker_pool_size,
        resolved.engine.batch.max_in_flight,
    ));
    let engine_config = Arc::new(resolved.engine);
    let server_config = Arc::new(resolved.server);

    let state = AppState::new(
        registry,
        worker_pool.clone(),
        engine_config,
        server_config.clone(),
    );
    let router = censor_server::create_api_router(state);

    let addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "censor-server listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining");
}
