//! Axum HTTP server.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::routes::router;
use crate::state::AppState;

/// Start the gateway and serve until Ctrl-C or SIGTERM.
pub async fn start_gateway(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    serve_with_shutdown(state, port, shutdown_signal()).await
}

/// Serve until `shutdown` resolves, then let in-flight requests drain.
pub async fn serve_with_shutdown<F>(state: Arc<AppState>, port: u16, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = state.config.bind_addr();
    let auth_enabled = state.api_token.is_some();
    let app = router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");
    if auth_enabled {
        info!("Authentication: Bearer token required (except /health, /qr and status)");
    } else {
        warn!("No API token configured, protected routes are open");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(%e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(%e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
