//! LivePaste server entry point.
//!
//! Boots tracing, opens the database, applies migrations, spawns the
//! retention and session sweeps, and serves the HTTP surface until SIGINT
//! or SIGTERM.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

use livepaste::rooms::retention::RetentionSweeper;
use livepaste::{AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("livepaste=info,tower_http=info")),
        )
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(
        version = livepaste::VERSION,
        port = config.port,
        retention_hours = config.retention_hours,
        "starting livepaste"
    );

    let state = AppState::connect(config).await?;

    RetentionSweeper::new(state.db.clone(), Arc::clone(&state.config)).spawn();
    Arc::clone(&state.sessions).spawn_sweeper(state.config.session_sweep_interval);

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, state.config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let app = livepaste::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
