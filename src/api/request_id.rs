//! `X-Request-ID` propagation.
//!
//! A caller-supplied ID is kept; otherwise a UUID v4 is minted. The ID is
//! exposed to handlers as a [`RequestId`] extension, recorded on a span
//! wrapping the rest of the request, and echoed in the response.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument as _;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied ID that is accepted as is.
const MAX_LEN: usize = 128;

#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Runs inside `TraceLayer`, so the request span is already open.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_LEN)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));

    let span = tracing::info_span!("request", id = %id, path = %req.uri().path());
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    use super::{request_id_middleware, RequestId};

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(RequestId(id)): Extension<RequestId>| async move { id }),
            )
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn caller_id_is_kept_and_echoed() {
        let resp = app()
            .oneshot(Request::get("/").header("x-request-id", "abc-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.headers()["x-request-id"], "abc-1");
        let body = to_bytes(resp.into_body(), 256).await.unwrap();
        assert_eq!(&body[..], b"abc-1");
    }

    #[tokio::test]
    async fn missing_id_is_generated_as_uuid() {
        let resp = app()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id = resp.headers()["x-request-id"].to_str().unwrap().to_owned();
        assert!(uuid::Uuid::parse_str(&id).is_ok(), "got: {id}");
    }

    #[tokio::test]
    async fn oversized_id_is_replaced() {
        let long = "x".repeat(500);
        let resp = app()
            .oneshot(Request::get("/").header("x-request-id", long.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(resp.headers()["x-request-id"], long.as_str());
    }
}
