//! Request orchestration shared by the HTTP handlers.
//!
//! Every chat or corpus request follows the same path: load the stored
//! configuration, resolve the service account, mint an access token and call
//! Vertex AI. Nothing is cached between requests, so a saved configuration
//! takes effect on the very next call.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    config::Config,
    error::RequestError,
    store::{ConfigStore, Configuration},
    vertex::{
        auth::ServiceAccount,
        rag::{self, RagAction},
        ChatMessage, GenerateContentRequest, TextStream, VertexClient,
    },
};

/// Shared application state injected into every request handler via [`axum::extract::State`].
pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConfigStore>,
    /// Shared secret from the environment. Takes precedence over the
    /// `internalApiKey` stored with the configuration.
    pub api_key: Option<String>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, store: Arc<dyn ConfigStore>) -> Self {
        let api_key = config.server.api_key();
        Self { config, store, api_key }
    }

    /// The stored configuration, or defaults when nothing has been saved yet.
    pub async fn load_configuration(&self) -> anyhow::Result<Configuration> {
        let row = self.store.load(&self.config.store.config_key).await?;
        if row.is_none() {
            debug!(config_key = %self.config.store.config_key, "no stored configuration; using defaults");
        }
        Ok(row.map(Configuration::from).unwrap_or_default())
    }

    /// Validate and persist `cfg` as the single configuration row.
    pub async fn save_configuration(&self, cfg: Configuration) -> anyhow::Result<()> {
        cfg.validate()?;
        let key = &self.config.store.config_key;
        self.store.upsert(cfg.into_row(key)).await?;
        info!(config_key = %key, "configuration saved");
        Ok(())
    }

    /// The secret callers must present in `x-api-key`, if any is configured.
    pub async fn expected_api_key(&self) -> anyhow::Result<Option<String>> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.clone()));
        }
        let stored = self.load_configuration().await?.internal_api_key;
        Ok(stored.filter(|k| !k.is_empty()))
    }

    async fn authorised_client(&self, cfg: &Configuration) -> anyhow::Result<(ServiceAccount, VertexClient)> {
        let vertex = &self.config.vertex;
        let account = ServiceAccount::resolve(cfg, vertex)?;
        let token = account.access_token(&vertex.token_uri).await?;
        let client = VertexClient::new(vertex, &token)?;
        Ok((account, client))
    }
}

/// Body of `POST /api/vertex`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Per-request generation overrides. Credentials cannot be overridden.
    #[serde(default)]
    pub config: Option<ConfigOverride>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverride {
    pub model_name: Option<String>,
    pub system_instruction: Option<String>,
    pub rag_corpus: Option<String>,
    pub similarity_top_k: Option<u32>,
    pub vector_distance_threshold: Option<f64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u32>,
}

impl ConfigOverride {
    fn apply(self, cfg: &mut Configuration) {
        if let Some(v) = self.model_name.filter(|m| !m.trim().is_empty()) {
            cfg.model_name = v;
        }
        if let Some(v) = self.system_instruction {
            cfg.system_instruction = v;
        }
        if let Some(v) = self.rag_corpus {
            cfg.rag_corpus = Some(v);
        }
        if let Some(v) = self.similarity_top_k {
            cfg.similarity_top_k = v;
        }
        if let Some(v) = self.vector_distance_threshold {
            cfg.vector_distance_threshold = v;
        }
        if let Some(v) = self.temperature {
            cfg.temperature = v;
        }
        if let Some(v) = self.top_p {
            cfg.top_p = v;
        }
        if let Some(v) = self.max_output_tokens {
            cfg.max_output_tokens = v;
        }
    }
}

/// Start a grounded chat completion and return its text stream.
///
/// Request validation happens before any credential is touched, so a bad
/// body never reaches the token endpoint.
#[tracing::instrument(skip_all, fields(messages = request.messages.len(), model = tracing::field::Empty))]
pub async fn chat(state: &GatewayState, request: ChatRequest) -> anyhow::Result<TextStream> {
    if request.messages.is_empty() {
        return Err(RequestError::new("messages must not be empty").into());
    }

    let mut cfg = state.load_configuration().await?;
    if let Some(overrides) = request.config {
        overrides.apply(&mut cfg);
    }
    cfg.validate()?;
    tracing::Span::current().record("model", cfg.model_name.as_str());

    let payload = GenerateContentRequest::build(&request.messages, &cfg)?;
    let (account, client) = state.authorised_client(&cfg).await?;

    info!(grounded = cfg.corpus().is_some(), "starting Vertex AI stream");
    client
        .stream_generate_content(&account.project_id, &cfg.model_name, &payload)
        .await
}

/// Run a corpus management action against the configured corpus.
#[tracing::instrument(skip_all, fields(action = action.name()))]
pub async fn rag(state: &GatewayState, action: RagAction) -> anyhow::Result<Value> {
    let cfg = state.load_configuration().await?;
    let (account, client) = state.authorised_client(&cfg).await?;
    rag::execute(&client, &account.project_id, cfg.corpus(), action).await
}
