//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the websocket admission endpoint and the small
//! JSON API clients use for history, sends, and a presence read.

pub mod auth;
pub mod messages;
pub mod ws;

use axum::Router;
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ServerConfig;
use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/messages/{partner}", get(messages::history))
        .route("/api/messages/send/{receiver}", post(messages::send))
        .route("/api/presence", get(messages::presence))
        .route("/healthz", get(healthz))
        .layer(cors_layer(config.cors_origin.as_deref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.map(HeaderValue::from_str) {
        Some(Ok(value)) => AllowOrigin::exact(value),
        Some(Err(e)) => {
            warn!(error = %e, "CORS_ORIGIN is not a valid header value; allowing any origin");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
