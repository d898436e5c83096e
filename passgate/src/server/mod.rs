//! HTTP server.
//!
//! - Application state shared by handlers
//! - Session extraction from gateway headers
//! - Health, readiness and metrics endpoints
//! - Router configuration and graceful shutdown

pub mod health;
pub mod routes;
pub mod session;
pub mod state;

pub use health::{health_check, readiness_check};
pub use routes::build_router;
pub use state::AppState;

use axum::Router;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;

/// Serve `router` until ctrl-c or SIGTERM.
///
/// In-flight requests get `drain_timeout` to finish after the signal; the
/// server stops regardless once it elapses.
///
/// # Errors
///
/// Returns the I/O error that stopped the accept loop.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    drain_timeout: Duration,
) -> std::io::Result<()> {
    let signalled = Arc::new(Notify::new());
    let notify = Arc::clone(&signalled);

    let graceful = axum::serve(listener, router).with_graceful_shutdown(async move {
        shutdown_signal().await;
        notify.notify_one();
    });

    let deadline = async move {
        signalled.notified().await;
        tokio::time::sleep(drain_timeout).await;
    };

    tokio::select! {
        result = graceful.into_future() => result,
        () = deadline => {
            tracing::warn!(?drain_timeout, "Drain timeout elapsed, dropping in-flight requests");
            Ok(())
        },
    }
}

/// Resolves on ctrl-c or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
