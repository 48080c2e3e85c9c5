pub mod error;
mod handlers;
mod middleware;

pub use middleware::RequestContext;

use std::{sync::Arc, time::Duration};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::render::DiagramRenderer;

use self::middleware::{log_responses, set_request_context};

/// Shared state handed to every request: the configured renderer strategy and
/// the overall per-request deadline.
#[derive(Clone)]
pub struct HttpState {
    pub renderer: Arc<dyn DiagramRenderer>,
    pub render_deadline: Duration,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/render", post(handlers::render_diagram))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
