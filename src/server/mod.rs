//! HTTP boundary.
//!
//! | Route                 | Handler                                  |
//! |-----------------------|------------------------------------------|
//! | `POST /generate-docx` | [`handlers::generate_docx`]              |
//! | `POST /upload`        | [`handlers::convert_upload`]             |
//! | `GET /healthz`        | [`handlers::healthz`]                    |
//!
//! Every failure becomes a JSON body `{"error": ..., "kind": ...}` through
//! [`ApiError`]; no route ever returns partial bytes alongside an error.

pub mod error;
pub mod forms;
pub mod handlers;
pub mod response;

pub use error::ApiError;

use crate::config::ServerSettings;
use crate::error::DocfillError;
use crate::generate::Generator;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared, read-only state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub generator: Arc<Generator>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(generator: Generator, settings: &ServerSettings) -> Self {
        Self {
            generator: Arc::new(generator),
            max_body_bytes: settings.max_body_bytes,
        }
    }

    pub fn upload_dir(&self) -> Option<&Path> {
        self.generator.config().upload_dir.as_deref()
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let limit = state.max_body_bytes;
    Router::new()
        .route("/generate-docx", post(handlers::generate_docx))
        .route("/upload", post(handlers::convert_upload))
        .route("/healthz", get(handlers::healthz))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Bind `settings.bind_address()` and serve until Ctrl-C / SIGTERM.
pub async fn serve(generator: Generator, settings: ServerSettings) -> Result<(), DocfillError> {
    settings.validate()?;
    let addr = settings.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DocfillError::InvalidConfig(format!("cannot bind {addr}: {e}")))?;
    serve_on(listener, generator, &settings).await
}

/// Serve on an already-bound listener.
pub async fn serve_on(
    listener: TcpListener,
    generator: Generator,
    settings: &ServerSettings,
) -> Result<(), DocfillError> {
    if let Ok(local) = listener.local_addr() {
        info!("Server running at http://{}", local);
    }
    match generator.config().default_template.path() {
        Some(path) => info!("Using template: {}", path.display()),
        None => info!("No default template; requests must supply one"),
    }

    let app = router(AppState::new(generator, settings));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| DocfillError::Internal(format!("server error: {e}")))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler failed: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("SIGTERM handler failed: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
