//! HTTP surface of the proxy
//!
//! Two endpoints: `GET /health` probes the default route's handler, and a
//! POST to any other path runs a canonical completion. The proxy keeps no
//! state beyond the handler registry.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use eyre::{Context, Result};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::canonical::CanonicalRequest;
use crate::error::ProxyError;
use crate::handlers::HandlerRegistry;

/// Default listen port
pub const DEFAULT_PORT: u16 = 3456;

type AppState = Arc<HandlerRegistry>;

/// Build the router over a handler registry
pub fn router(registry: Arc<HandlerRegistry>) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(completion)
        .with_state(registry)
}

/// Bind and serve until the process ends
pub async fn serve(port: u16, registry: Arc<HandlerRegistry>) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .wrap_err_with(|| format!("Failed to bind port {}", port))?;
    info!(port, "modelmux listening");
    axum::serve(listener, router(registry))
        .await
        .wrap_err("Proxy server failed")
}

fn error_response(error: &ProxyError) -> Response {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(error.to_body())).into_response()
}

/// `GET /health`: 200 when the default route's provider answers
async fn health(State(registry): State<AppState>) -> Response {
    let target = registry.default_target().to_string();
    let (handler, model) = match registry.route(&target) {
        Ok(routed) => routed,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ok": false, "reason": e.to_string() })),
            )
                .into_response();
        }
    };

    match handler.health().await {
        Ok(()) => {
            debug!(provider = handler.provider(), "health: ok");
            Json(json!({ "provider": handler.provider(), "model": model, "ok": true })).into_response()
        }
        Err(e) => {
            warn!(provider = handler.provider(), error = %e, "health: downstream unhealthy");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ok": false, "reason": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// `POST /*`: canonical completion
async fn completion(State(registry): State<AppState>, method: Method, body: Bytes) -> Response {
    if method != Method::POST {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(json!({ "error": { "message": "Use POST with a canonical request body" } })),
        )
            .into_response();
    }

    let request: CanonicalRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&ProxyError::InvalidRequest(e.to_string())),
    };

    let (handler, model) = match registry.route(&request.model) {
        Ok(routed) => routed,
        Err(e) => return error_response(&e),
    };

    debug!(provider = handler.provider(), model = %model, "completion: dispatching");
    match handler.complete(&model, &request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            warn!(provider = handler.provider(), error = %e, "completion: failed");
            error_response(&e)
        }
    }
}
