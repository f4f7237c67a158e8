//! `POST /api/rag-engine`: manage files in the configured RAG corpus.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde_json::Value;

use crate::{
    api::json_body,
    error::{AppError, RequestError},
    gateway::{self, GatewayState},
    vertex::rag::RagAction,
};

pub async fn rag_engine(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let action: RagAction = serde_json::from_value(json_body(body)?)
        .map_err(|e| RequestError::new(format!("invalid rag-engine request: {e}")))?;
    Ok(Json(gateway::rag(&state, action).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::{
        api::{router, tests::{body_json, post_json, state, vertex_for}},
        config::VertexConfig,
        store::Configuration,
    };

    const PRIVATE_KEY: &str = include_str!("../vertex/testdata/service_account_key.pem");
    const CORPUS: &str = "projects/proj/locations/europe-west1/ragCorpora/9";

    #[tokio::test]
    async fn unknown_action_is_400() {
        let resp = router(state(VertexConfig::default(), None))
            .oneshot(post_json("/api/rag-engine", &json!({ "action": "purge" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_files_returns_provider_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "ya29.x" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/{CORPUS}/ragFiles")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ragFiles": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let state = state(vertex_for(&server), None);
        let mut cfg = Configuration::default();
        cfg.vertex_project_id = Some("proj".into());
        cfg.vertex_client_email = Some("svc@proj.iam.gserviceaccount.com".into());
        cfg.vertex_private_key = Some(PRIVATE_KEY.into());
        cfg.rag_corpus = Some(CORPUS.into());
        state.save_configuration(cfg).await.unwrap();

        let resp = router(state)
            .oneshot(post_json("/api/rag-engine", &json!({ "action": "list-files" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({ "ragFiles": [] }));
    }
}
