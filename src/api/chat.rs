//! `POST /api/vertex` (alias `POST /api/chat`): streamed grounded chat.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::debug;

use crate::{
    api::json_body,
    error::{AppError, RequestError},
    gateway::{self, ChatRequest, GatewayState},
};

/// Relay the model's answer as `text/plain` while it is generated.
///
/// Errors before the first byte (bad body, credentials, token exchange,
/// provider status) come back as JSON with the matching status. Once
/// streaming has begun, an upstream failure aborts the body.
pub async fn chat(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let request: ChatRequest = serde_json::from_value(json_body(body)?)
        .map_err(|e| RequestError::new(format!("invalid chat request: {e}")))?;

    let stream = gateway::chat(&state, request).await?;
    debug!("relaying chat stream");

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, http::StatusCode};
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::{
        api::tests::{body_json, post_json, state, vertex_for},
        config::VertexConfig,
        store::Configuration,
    };

    const PRIVATE_KEY: &str = include_str!("../vertex/testdata/service_account_key.pem");
    const STREAM_PATH: &str =
        "/v1/projects/proj/locations/europe-west1/publishers/google/models/gemini-2.5-flash:streamGenerateContent";

    fn with_credentials() -> Configuration {
        let mut cfg = Configuration::default();
        cfg.vertex_project_id = Some("proj".into());
        cfg.vertex_client_email = Some("svc@proj.iam.gserviceaccount.com".into());
        cfg.vertex_private_key = Some(PRIVATE_KEY.into());
        cfg
    }

    async fn mock_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "ya29.x" })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn streams_plain_text_answer() {
        let server = MockServer::start().await;
        mock_token(&server).await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"candidates":[{"content":{"parts":[{"text":"Hello, "}]}}]},
                   {"candidates":[{"content":{"parts":[{"text":"world."}]}}]}]"#,
            ))
            .mount(&server)
            .await;

        let state = state(vertex_for(&server), Some("k"));
        state.save_configuration(with_credentials()).await.unwrap();

        let req = axum::http::Request::post("/api/vertex")
            .header("content-type", "application/json")
            .header("x-api-key", "k")
            .body(axum::body::Body::from(
                json!({ "messages": [{ "role": "user", "content": "hi" }] }).to_string(),
            ))
            .unwrap();
        let resp = crate::api::router(state).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/plain; charset=utf-8");
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Hello, world.");
    }

    #[tokio::test]
    async fn chat_alias_is_routed() {
        let app = crate::api::router(state(VertexConfig::default(), None));
        let resp = app
            .oneshot(post_json("/api/chat", &json!({ "messages": [] })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let app = crate::api::router(state(VertexConfig::default(), None));
        let resp = app
            .oneshot(post_json("/api/vertex", &json!({ "messages": "hello" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let msg = body_json(resp).await["error"].as_str().unwrap().to_owned();
        assert!(msg.starts_with("invalid chat request"), "got: {msg}");
    }

    #[tokio::test]
    async fn missing_credentials_is_500_with_message() {
        let app = crate::api::router(state(VertexConfig::default(), None));
        let resp = app
            .oneshot(post_json(
                "/api/vertex",
                &json!({ "messages": [{ "role": "user", "content": "hi" }] }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let msg = body_json(resp).await["error"].as_str().unwrap().to_owned();
        assert!(msg.contains("Vertex AI credentials missing"), "got: {msg}");
    }

    #[tokio::test]
    async fn provider_status_is_relayed() {
        let server = MockServer::start().await;
        mock_token(&server).await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_string("Resource exhausted"))
            .mount(&server)
            .await;

        let state = state(vertex_for(&server), None);
        state.save_configuration(with_credentials()).await.unwrap();

        let resp = crate::api::router(state)
            .oneshot(post_json(
                "/api/vertex",
                &json!({ "messages": [{ "role": "user", "content": "hi" }] }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let msg = body_json(resp).await["error"].as_str().unwrap().to_owned();
        assert!(msg.contains("Resource exhausted"), "got: {msg}");
    }
}
