//! Vertex AI client.
//!
//! A [`VertexClient`] is built fresh per request from [`VertexConfig`] and the
//! bearer token produced by [`auth::ServiceAccount::access_token`]. Nothing is
//! shared between requests: the token, the HTTP client and the resolved model
//! configuration all live for exactly one call.
//!
//! - [`auth`]: service-account JWT assertion and OAuth2 token exchange
//! - [`relay`]: incremental parsing of the streamed JSON response
//! - [`rag`]: corpus management (file listing, import, deletion, operations)

pub mod auth;
pub mod rag;
pub mod relay;

use std::pin::Pin;

use anyhow::Context;
use bytes::Bytes;
use futures_util::Stream;
use reqwest::{header, Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{config::VertexConfig, error::RequestError, store::Configuration};

/// Plain-text body chunks relayed to the caller.
pub type TextStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// Used when the configuration carries no system instruction.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful assistant.";

/// A non-2xx answer from a Google endpoint. The status is relayed to the caller.
#[derive(Debug, thiserror::Error)]
#[error("{service} error: {status} - {body}")]
pub struct UpstreamError {
    pub service: &'static str,
    pub status: u16,
    pub body: String,
}

/// One turn of the conversation as sent by the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of a `:streamGenerateContent` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub system_instruction: Content,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub retrieval: Retrieval,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Retrieval {
    pub vertex_rag_store: VertexRagStore,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VertexRagStore {
    pub rag_resources: Vec<RagResource>,
    pub similarity_top_k: u32,
    pub vector_distance_threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagResource {
    pub rag_corpus: String,
}

impl GenerateContentRequest {
    /// Build the provider payload from the chat history and resolved configuration.
    ///
    /// `user` turns keep their role, every other role becomes `model`, and
    /// `system` turns are appended to the system instruction. Retrieval is
    /// attached only when a corpus is configured.
    pub fn build(messages: &[ChatMessage], cfg: &Configuration) -> Result<Self, RequestError> {
        let mut system_parts = Vec::new();
        if !cfg.system_instruction.trim().is_empty() {
            system_parts.push(Part { text: cfg.system_instruction.clone() });
        }

        let mut contents = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role.as_str() {
                "system" => system_parts.push(Part { text: msg.content.clone() }),
                role => contents.push(Content {
                    role: Some(if role == "user" { "user" } else { "model" }),
                    parts: vec![Part { text: msg.content.clone() }],
                }),
            }
        }

        if contents.is_empty() {
            return Err(RequestError::new("messages must contain at least one user or model turn"));
        }
        if system_parts.is_empty() {
            system_parts.push(Part { text: DEFAULT_SYSTEM_INSTRUCTION.into() });
        }

        let tools = cfg
            .corpus()
            .map(|corpus| Tool {
                retrieval: Retrieval {
                    vertex_rag_store: VertexRagStore {
                        rag_resources: vec![RagResource { rag_corpus: corpus.to_string() }],
                        similarity_top_k: cfg.similarity_top_k,
                        vector_distance_threshold: cfg.vector_distance_threshold,
                    },
                },
            })
            .into_iter()
            .collect();

        Ok(Self {
            contents,
            system_instruction: Content { role: None, parts: system_parts },
            generation_config: GenerationConfig {
                max_output_tokens: cfg.max_output_tokens,
                temperature: cfg.temperature,
                top_p: cfg.top_p,
            },
            tools,
        })
    }
}

/// HTTP client for the regional Vertex AI API, authorised with one bearer token.
pub struct VertexClient {
    client: Client,
    api_base: String,
    location: String,
}

impl VertexClient {
    /// Construct a client that sends `Authorization: Bearer <access_token>`.
    ///
    /// No request timeout is set: generation streams can legitimately run
    /// for minutes.
    pub fn new(cfg: &VertexConfig, access_token: &str) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {access_token}"))
                .context("access token contains invalid Authorization header characters")?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            api_base: cfg.api_base(),
            location: cfg.location.clone(),
        })
    }

    /// Start a streaming generation and relay its text as it arrives.
    ///
    /// Returns once the provider has answered with headers; the body is
    /// consumed by a background task (see [`relay::relay`]).
    ///
    /// # Errors
    /// Returns an [`UpstreamError`] carrying the provider's status and body if
    /// it answers with a non-2xx status.
    pub async fn stream_generate_content(
        &self,
        project_id: &str,
        model: &str,
        request: &GenerateContentRequest,
    ) -> anyhow::Result<TextStream> {
        let url = format!(
            "{}/v1/projects/{project_id}/locations/{}/publishers/google/models/{model}:streamGenerateContent",
            self.api_base, self.location
        );
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {url} (streaming)"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError { service: "Vertex AI", status: status.as_u16(), body }.into());
        }

        debug!(%model, "Vertex AI stream opened");
        Ok(relay::relay(response.bytes_stream()))
    }

    /// Call a resource path under the API base (e.g. `v1/projects/...`) and
    /// return the raw response text.
    pub(crate) async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> anyhow::Result<String> {
        let url = format!("{}/{}", self.api_base, path.trim_start_matches('/'));
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {url}"))?;

        let status = response.status();
        let text = response.text().await.context("reading Vertex AI response body")?;
        if !status.is_success() {
            return Err(UpstreamError { service: "Vertex AI", status: status.as_u16(), body: text }.into());
        }
        Ok(text)
    }

    /// [`call`](Self::call) and parse the answer as JSON (`null` for an empty body).
    pub(crate) async fn call_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> anyhow::Result<Value> {
        let text = self.call(method, path, body).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .with_context(|| format!("parsing Vertex AI response as JSON: {text}"))
    }
}
