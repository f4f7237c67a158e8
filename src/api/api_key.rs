//! Shared-secret check for `/api` routes.
//!
//! The expected secret is resolved per request (see
//! [`GatewayState::expected_api_key`]) so a key saved through `/api/config`
//! applies immediately. With no secret configured anywhere the API is open.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use super::request_id::RequestId;
use crate::{error::AppError, gateway::GatewayState};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Axum middleware: rejects requests without the matching `x-api-key` with 401.
pub async fn api_key_middleware(
    State(state): State<Arc<GatewayState>>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let expected = match state.expected_api_key().await {
        Ok(Some(key)) => key,
        Ok(None) => return next.run(req).await,
        Err(e) => return AppError::from(e.context("resolving shared secret")).into_response(),
    };

    let rejection = match req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(key) if constant_time_eq(key, &expected) => None,
        Some(_) => Some("Invalid API key."),
        None => Some("Missing x-api-key header."),
    };

    match rejection {
        None => next.run(req).await,
        Some(message) => unauthorized(&req, message),
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized(req: &Request, message: &str) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|RequestId(id)| id.as_str())
        .unwrap_or("-");
    warn!(path = %req.uri().path(), %request_id, "{message}");
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}
