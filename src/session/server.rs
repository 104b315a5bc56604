use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub run_sweeper: bool,
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3142,
            run_sweeper: true,
            permissive_cors: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, permissive_cors: bool) -> Router {
    let mut app = api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    if permissive_cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Serve the API and, unless disabled, run the sweeper alongside it until Ctrl+C.
pub async fn start_server(config: ServerConfig, state: Arc<AppState>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_task = config
        .run_sweeper
        .then(|| tokio::spawn(state.sweeper.clone().run(shutdown_rx)));

    let app = build_router(state, config.permissive_cors);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("ARV server running at http://{}", local_addr);
    tracing::info!(%local_addr, "server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    let _ = shutdown_tx.send(true);
    if let Some(task) = sweeper_task
        && let Err(e) = task.await
    {
        tracing::warn!(error = %e, "sweeper task ended abnormally");
    }

    served?;
    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
