//! HTTP surface: submission, artifact retrieval, task polling, health.

pub mod error;
mod handlers;
mod middleware;
mod rate_limit;

pub use error::ApiError;
pub use middleware::RequestContext;
pub use rate_limit::RateLimiter;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};

use crate::application::pipeline::RenderPipeline;

use self::middleware::{log_responses, rate_limit, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub pipeline: RenderPipeline,
    pub rate_limiter: RateLimiter,
}

impl HttpState {
    pub fn new(pipeline: RenderPipeline, rate_limiter: RateLimiter) -> Self {
        Self {
            pipeline,
            rate_limiter,
        }
    }
}

/// Build the service router. Request bodies above `body_limit` bytes are
/// rejected with 413.
pub fn build_router(state: HttpState, body_limit: usize) -> Router {
    Router::new()
        .route("/artifacts", post(handlers::submit))
        .route("/upload", post(handlers::submit))
        .route("/artifacts/{base_name}", get(handlers::get_artifact))
        .route(
            "/artifacts/{base_name}/raw/{file_type}",
            get(handlers::get_raw),
        )
        .route("/html/{file_name}", get(handlers::legacy_html))
        .route("/tasks/{task_id}", get(handlers::get_task))
        .route_layer(from_fn_with_state(state.clone(), rate_limit))
        .route("/healthz", get(handlers::healthz))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context))
        .with_state(state)
}
