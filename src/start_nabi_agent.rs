//! Startup helpers for the relay agent server.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use crate::server::{self, AppState};

/// Run the server and the crawl scheduler.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Nabi agent v{}", env!("CARGO_PKG_VERSION"));

    let port = get_port();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    rt.block_on(async {
        let state = match AppState::from_env().await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to create state: {e}");
                return ExitCode::from(1);
            }
        };

        let scheduler = state.scheduler();
        let shutdown = scheduler.shutdown_notifier();
        let scheduler_handle = scheduler.spawn();

        let result = server::run_server(Arc::clone(&state), port).await;

        shutdown.notify_one();
        let _ = scheduler_handle.await;

        if let Err(e) = result {
            tracing::error!("Server error: {e}");
            return ExitCode::from(1);
        }
        ExitCode::SUCCESS
    })
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if state creation fails.
pub async fn initialize() -> Result<Arc<AppState>, Box<dyn std::error::Error + Send + Sync>> {
    AppState::from_env().await
}

/// Run server with graceful shutdown.
///
/// # Errors
/// Returns an error if the server fails.
pub async fn run_server_with_shutdown<F>(
    state: Arc<AppState>,
    port: u16,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    server::run_server_with_shutdown(state, port, shutdown_signal).await
}

/// Get configured server port.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var("NABI_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}
