//! `GET/POST /api/config`: read and save the single model configuration.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde_json::{json, Value};

use crate::{
    api::json_body,
    error::{AppError, RequestError},
    gateway::GatewayState,
    store::Configuration,
};

/// `GET /api/config`: the stored configuration, defaults filled in.
pub async fn get_config(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Configuration>, AppError> {
    Ok(Json(state.load_configuration().await?))
}

/// `POST /api/config`: replace the stored configuration.
///
/// Fields missing from the body take their defaults; the whole row is
/// overwritten, never merged field by field.
pub async fn save_config(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let cfg: Configuration = serde_json::from_value(json_body(body)?)
        .map_err(|e| RequestError::new(format!("invalid configuration: {e}")))?;
    state.save_configuration(cfg).await?;
    Ok(Json(json!({ "success": true })))
}
