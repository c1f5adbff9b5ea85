use std::sync::Arc;

use axum::http::HeaderName;
use axum::{routing::post, Router};
use tower_http::trace::TraceLayer;

use crate::callback::ListenerRegistry;
use crate::config::AppConfig;
use crate::error::{AppError, Result};

pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<ListenerRegistry>,
    callback_header: HeaderName,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let callback_header = HeaderName::from_bytes(config.runner.callback_header.as_bytes())
            .map_err(|e| AppError::Config(format!("Invalid callback header name: {e}")))?;

        Ok(Self {
            config,
            registry: Arc::new(ListenerRegistry::new()),
            callback_header,
        })
    }

    /// Header carrying the correlation key on inbound callbacks.
    pub fn callback_header(&self) -> &HeaderName {
        &self.callback_header
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/callback", post(crate::callback::handler::handle_callback))
        .route("/status", post(crate::callback::handler::handle_callback))
        .route("/health", axum::routing::get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
