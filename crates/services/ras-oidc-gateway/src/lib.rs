//! OIDC login gateway
//!
//! Redirects browsers to an identity provider, validates the callback and
//! hands out a session cookie before sending the browser on to the
//! application.

use axum::{Router, middleware::from_fn, routing::get};
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod state;

pub use config::Config;
pub use state::{AppState, spawn_sweeper};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/login/{provider}", get(handlers::login))
        .route("/auth/{provider}", get(handlers::auth))
        .route("/session", get(handlers::session))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(state)
}
