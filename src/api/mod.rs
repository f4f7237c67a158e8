//! HTTP surface of vertex-gateway.
//!
//! Handlers are thin: they translate HTTP concerns (bodies, headers, status
//! codes) into calls on [`crate::gateway`] and back. Every `/api` route sits
//! behind [`api_key::api_key_middleware`]; the whole app sits behind a
//! permissive CORS layer because the admin panel is served from another origin.

pub mod api_key;
pub mod chat;
pub mod config;
pub mod rag;
pub mod request_id;

use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderName, Method},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::{error::RequestError, gateway::GatewayState};

const ALLOWED_METHODS: [Method; 3] = [Method::GET, Method::POST, Method::OPTIONS];

/// Build the full application router.
///
/// Every `OPTIONS` request is answered by the CORS layer itself, so preflights
/// never reach the shared-secret check.
pub fn router(state: Arc<GatewayState>) -> Router {
    let api = Router::new()
        .route("/api/config", get(config::get_config).post(config::save_config))
        .route("/api/vertex", post(chat::chat))
        .route("/api/chat", post(chat::chat))
        .route("/api/rag-engine", post(rag::rag_engine))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            api_key::api_key_middleware,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(api)
        .layer(cors())
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .with_state(state)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(api_key::API_KEY_HEADER),
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
        .expose_headers([HeaderName::from_static(request_id::REQUEST_ID_HEADER)])
}

/// Unwrap a JSON body, turning axum's plain-text rejection into a
/// [`RequestError`] so it renders as `{"error": ...}` like every other failure.
pub(crate) fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, RequestError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| RequestError::new(rejection.body_text()))
}

/// `GET /healthz`: liveness probe; touches neither the store nor Google.
async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt; // oneshot
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::{
        config::{Config, StoreBackend, VertexConfig},
        gateway::GatewayState,
        store::MemoryStore,
    };

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    pub(crate) fn state(vertex: VertexConfig, api_key: Option<&str>) -> Arc<GatewayState> {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        config.vertex = vertex;
        let mut state = GatewayState::new(Arc::new(config), Arc::new(MemoryStore::default()));
        state.api_key = api_key.map(String::from);
        Arc::new(state)
    }

    pub(crate) fn vertex_for(server: &MockServer) -> VertexConfig {
        VertexConfig {
            api_base: Some(server.uri()),
            token_uri: format!("{}/token", server.uri()),
            ..VertexConfig::default()
        }
    }

    pub(crate) async fn body_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    pub(crate) fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Routing & CORS
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn healthz_returns_ok_without_api_key() {
        let app = super::router(state(VertexConfig::default(), Some("secret")));
        let resp = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn browser_preflight_is_answered_without_api_key() {
        let app = super::router(state(VertexConfig::default(), Some("secret")));
        let resp = app
            .oneshot(
                Request::options("/api/vertex")
                    .header("origin", "https://admin.example.com")
                    .header("access-control-request-method", "POST")
                    .header("access-control-request-headers", "x-api-key,content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        let allowed = headers["access-control-allow-headers"].to_str().unwrap().to_lowercase();
        assert!(allowed.contains("x-api-key"), "got: {allowed}");
        assert!(allowed.contains("x-client-info"), "got: {allowed}");
    }

    #[tokio::test]
    async fn bare_options_is_answered_without_api_key() {
        let app = super::router(state(VertexConfig::default(), Some("secret")));
        let resp = app
            .oneshot(Request::options("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let methods = resp.headers()["access-control-allow-methods"].to_str().unwrap();
        assert!(methods.contains("POST") && methods.contains("GET"), "got: {methods}");
    }

    #[tokio::test]
    async fn missing_api_key_is_rejected_before_any_upstream_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let app = super::router(state(vertex_for(&server), Some("secret")));
        let resp = app
            .oneshot(post_json(
                "/api/vertex",
                &json!({ "messages": [{ "role": "user", "content": "hi" }] }),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn unparseable_bodies_get_json_errors() {
        for uri in ["/api/vertex", "/api/config", "/api/rag-engine"] {
            let not_json = Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from("not json"))
                .unwrap();
            let no_content_type = Request::post(uri).body(Body::from("{}")).unwrap();

            for req in [not_json, no_content_type] {
                let app = super::router(state(VertexConfig::default(), None));
                let resp = app.oneshot(req).await.unwrap();
                assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
                assert_eq!(resp.headers()["content-type"], "application/json", "{uri}");
                assert!(body_json(resp).await["error"].is_string(), "{uri}");
            }
        }
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let app = super::router(state(VertexConfig::default(), None));
        let resp = app
            .oneshot(
                Request::get("/healthz")
                    .header("x-request-id", "req-77")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.headers()["x-request-id"], "req-77");
    }
}
