// HTTP server module
// JSON API over the vectorizer, the search service and the active retrieval config


pub mod error;
pub mod handlers;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post, put};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::search::SearchService;
use crate::vectorizer::Vectorizer;

pub use error::ApiError;

/// Services shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub search: SearchService,
    pub vectorizer: Vectorizer,
}

impl AppState {
    #[inline]
    pub fn new(search: SearchService, vectorizer: Vectorizer) -> Self {
        Self { search, vectorizer }
    }
}

#[inline]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/vectorize",
            post(handlers::vectorize).delete(handlers::delete_vectors),
        )
        .route(
            "/api/vectorize/knowledge",
            put(handlers::update_knowledge).delete(handlers::delete_knowledge),
        )
        .route("/api/vectorize/pending", post(handlers::vectorize_pending))
        .route("/api/search", post(handlers::search))
        .route("/api/search/best", post(handlers::search_best))
        .route("/api/vectors/stats", get(handlers::store_statistics))
        .route(
            "/api/vectors/{document_id}",
            get(handlers::document_statistics),
        )
        .route(
            "/api/config",
            get(handlers::get_config).patch(handlers::patch_config),
        )
        .route("/api/config/presets/{name}", post(handlers::load_preset))
        .route("/api/config/reset", post(handlers::reset_config))
        .with_state(state)
}

/// Serve until Ctrl-C
#[inline]
pub async fn serve(state: AppState, bind: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
