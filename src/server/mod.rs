//! HTTP surface: the playground page, one live editor session per WebSocket,
//! and a small JSON API.

mod api;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

pub use api::{ApiError, StatusResponse, TranslatePayload, TranslateResponse};
pub use ws::ServerMessage;

use crate::translate::{Backend, TranslationService};

const INDEX_HTML: &str = include_str!("index.html");

pub struct AppState<B> {
    pub service: Arc<TranslationService<B>>,
    pub debounce: Duration,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        AppState {
            service: Arc::clone(&self.service),
            debounce: self.debounce,
        }
    }
}

impl<B: Backend> AppState<B> {
    pub fn new(service: Arc<TranslationService<B>>, debounce: Duration) -> Self {
        AppState { service, debounce }
    }
}

pub fn router<B: Backend>(state: AppState<B>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws::ws_handler::<B>))
        .route("/api/status", get(api::status::<B>))
        .route("/api/dialects", get(api::dialects::<B>))
        .route("/api/translate", post(api::translate::<B>))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Serves the playground until Ctrl+C. The translation service is initialized
/// in the background so the page is available while the engine loads.
pub async fn serve<B: Backend>(
    bind: SocketAddr,
    service: Arc<TranslationService<B>>,
    debounce: Duration,
) -> Result<()> {
    let init = Arc::clone(&service);
    tokio::spawn(async move {
        init.initialize().await;
    });

    let app = router(AppState::new(service, debounce));
    info!("sqlglot playground listening on http://{bind}");
    axum::Server::try_bind(&bind)
        .with_context(|| format!("failed to bind {bind}"))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
