//! HTTP/websocket surface of the switchboard media bridge.
//!
//! Routes:
//! - `GET /health` — liveness probe
//! - `POST /twiml` — provider answer webhook (returns TwiML)
//! - `GET /media` — provider media-stream websocket (upgrades)
//! - `POST /calls/status` — provider status webhook
//! - `GET /calls` — live session listing

pub mod api_media;
pub mod api_status;
pub mod api_twiml;
pub mod config;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use switchboard_bridge::{BridgeConfig, ContextClient, SessionRegistry};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub context_client: ContextClient,
    pub bridge: BridgeConfig,
    /// Externally reachable base URL (`wss://...`) advertised in TwiML.
    /// Falls back to the request's Host header when unset.
    pub public_url: Option<String>,
}

impl AppState {
    pub fn new(bridge: BridgeConfig, backend_base_url: &str) -> Self {
        Self {
            registry: SessionRegistry::new(),
            context_client: ContextClient::new(backend_base_url),
            bridge,
            public_url: None,
        }
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version. Used by load
/// balancers, monitoring, and CI to verify the server is running.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/twiml", post(api_twiml::twiml))
        .route("/media", get(api_media::media_ws_handler))
        .route("/calls/status", post(api_status::call_status))
        .route("/calls", get(api_status::sessions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(BridgeConfig::default(), "http://127.0.0.1:1")
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = app(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn call_listing_starts_empty() {
        let app = app(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/calls")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["count"], 0);
    }

    #[tokio::test]
    async fn status_webhook_for_unknown_call_is_accepted() {
        let app = app(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/calls/status")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("CallSid=CA_unknown&CallStatus=completed"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
