//! HTTP/WS surface of the gateway.
//!
//! Route wiring only: health introspection, the WebSocket upgrade that
//! hands connections to [`crate::ws`], the OAuth routes from
//! [`crate::oauth`], and CORS for the configured frontend origin.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenValidator;
use crate::config::{Config, Secrets};
use crate::oauth;
use crate::session::SessionRegistry;
use crate::ws;

/// Shared state handed to every route handler and connection task.
#[derive(Clone)]
pub struct AppState {
    /// The live connection -> session mapping.
    pub registry: Arc<SessionRegistry>,
    /// Session token validation and issuance.
    pub validator: Arc<TokenValidator>,
    /// Immutable runtime configuration.
    pub config: Arc<Config>,
    /// Environment-sourced secrets (OAuth app credentials).
    pub secrets: Arc<Secrets>,
    /// HTTP client for the OAuth code exchange.
    pub http: reqwest::Client,
}

/// Builds the gateway router.
pub fn router(state: AppState) -> Router {
    let mut cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    if let Ok(origin) = state.config.gateway.frontend_url.parse::<HeaderValue>() {
        cors = cors.allow_origin(origin);
    }

    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_upgrade))
        .route("/auth/github/login", get(oauth::github_login))
        .route("/auth/github/callback", get(oauth::github_callback))
        .route("/auth/github/get_user", get(oauth::get_user))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Process-wide status plus the current number of active sessions.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    Json(json!({
        "success": true,
        "health": {
            "status": "ok",
            "num_active_sessions": state.registry.count(),
            "time_required": start.elapsed().as_secs_f64(),
        },
    }))
}

/// Accepts the WebSocket and hands the connection to the protocol handler.
///
/// The `session` cookie is read from the handshake request here; its
/// validation happens inside the handler so the client always receives a
/// structured error message rather than a bare HTTP rejection.
async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = session_cookie(&headers);
    upgrade.on_upgrade(move |socket| ws::handle_connection(socket, state, token))
}

/// Extracts the `session` cookie value from request headers.
pub(crate) fn session_cookie(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, token)) = pair.trim().split_once('=') {
                if name == "session" && !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    None
}
