//! Unified HTTP error type for axum request handlers.
//!
//! [`AppError`] wraps [`anyhow::Error`] and converts it into a JSON
//! `{"error": "..."}` response via [`IntoResponse`]. Every handler that can fail
//! returns `Result<T, AppError>` and propagates errors with `?`.
//!
//! The status code is picked by looking at what the error *is*:
//!
//! | Root error                          | Status                      |
//! |-------------------------------------|-----------------------------|
//! | [`RequestError`]                    | `400 Bad Request`           |
//! | [`crate::vertex::UpstreamError`]    | the provider's own status   |
//! | anything else                       | `500 Internal Server Error` |
//!
//! # Example
//!
//! ```rust,ignore
//! async fn my_handler(
//!     State(state): State<Arc<GatewayState>>,
//! ) -> Result<Json<Value>, AppError> {
//!     let result = state.some_fallible_operation().await?;
//!     Ok(Json(result))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::vertex::UpstreamError;

/// The caller sent something we cannot act on. Maps to `400 Bad Request`.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RequestError(pub String);

impl RequestError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Wraps [`anyhow::Error`] so it can be returned from axum handlers.
///
/// Any type that implements `Into<anyhow::Error>` (which includes `io::Error`,
/// `reqwest::Error`, and any `#[derive(thiserror::Error)]` type) can be
/// converted into an [`AppError`] via the blanket [`From`] implementation.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<RequestError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        if let Some(upstream) = self.0.downcast_ref::<UpstreamError>() {
            return StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, %status, "handler error");
        } else {
            tracing::warn!(error = %self.0, %status, "request rejected");
        }
        (status, Json(json!({ "error": format!("{:#}", self.0) }))).into_response()
    }
}

/// Convert any `Into<anyhow::Error>` into an [`AppError`].
///
/// See <https://docs.rs/axum/latest/axum/error_handling/index.html>.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self(e.into())
    }
}
