// HTTP API
// Health check and the SSE conversation endpoint

#[cfg(test)]
mod tests;

mod handlers;
mod server;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::chat::ChatEngineFactory;

pub use server::serve;

/// State shared by all request handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub factory: Arc<ChatEngineFactory>,
}

impl AppState {
    #[inline]
    pub fn new(factory: Arc<ChatEngineFactory>) -> Self {
        Self { factory }
    }
}

/// All routes nested under `api_prefix`, e.g. `/api`
#[inline]
pub fn router(state: AppState, api_prefix: &str) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/health/", get(handlers::health))
        .route("/conversation/message", get(handlers::conversation_message));

    Router::new()
        .nest(api_prefix, api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
