//! Pictavox Server - HTTP API for speech/text-to-image generation

use std::net::SocketAddr;
use std::time::Duration;

use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod state;

use pictavox_core::{EngineConfig, InferenceEngine, ServerConfig};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pictavox_server=debug,pictavox_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Pictavox Server");

    // Load configuration
    let config = EngineConfig::from_env();
    config.validate()?;
    let server_config = ServerConfig::from_env();
    info!("Models directory: {:?}", config.models_dir);
    info!("Images directory: {:?}", config.images_dir);
    if config.debug {
        info!("Debug mode: internal error detail is returned to clients");
    }

    // Create inference engine
    let engine = InferenceEngine::new(config)?;
    if server_config.trust_forwarded_for {
        info!("Client addresses taken from X-Forwarded-For");
    }
    let state = AppState::new(engine, server_config.trust_forwarded_for);
    info!("Inference engine initialized");

    spawn_idle_sweeper(state.clone());

    // Build router
    let app = api::create_router(state.clone(), server_config.cors_enabled);

    // Start server
    let addr = server_config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    info!("Server ready. Press Ctrl+C to stop.");
    server.await?;

    state.engine.shutdown().await;
    info!("Server stopped");

    Ok(())
}

/// Periodically release models nobody has used within the idle timeout.
fn spawn_idle_sweeper(state: AppState) {
    let timeout = state.engine.config().model_timeout();
    if timeout.is_zero() {
        return;
    }
    let period = (timeout / 2).max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = state.engine.evict_idle().await;
            if evicted > 0 {
                debug!("Idle sweep released {} model(s)", evicted);
            }
        }
    });
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
}
