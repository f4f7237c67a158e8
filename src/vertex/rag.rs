//! Corpus management for the configured RAG corpus.
//!
//! Requests arrive as `{"action": "...", ...params}` and map one-to-one onto
//! Vertex AI RAG resource calls. Responses are passed through unchanged,
//! except `delete-file`, which answers `{"success": true}`.

use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::VertexClient;
use crate::error::RequestError;

const DEFAULT_CHUNK_SIZE: u32 = 1024;
const DEFAULT_CHUNK_OVERLAP: u32 = 256;
const DEFAULT_MAX_EMBEDDING_REQUESTS_PER_MIN: u32 = 1000;
const DEFAULT_LLM_PARSER_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_LAYOUT_PARSING_REQUESTS_PER_MIN: u32 = 120;
const DEFAULT_DRIVE_RESOURCE_TYPE: &str = "RESOURCE_TYPE_FILE";

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum RagAction {
    ListFiles,
    GetCorpus,
    ImportFiles(ImportRequest),
    #[serde(rename_all = "camelCase")]
    DeleteFile { file_name: String },
    #[serde(rename_all = "camelCase")]
    GetOperation { operation_name: String },
}

impl RagAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListFiles => "list-files",
            Self::GetCorpus => "get-corpus",
            Self::ImportFiles(_) => "import-files",
            Self::DeleteFile { .. } => "delete-file",
            Self::GetOperation { .. } => "get-operation",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub source: ImportSource,
    #[serde(default)]
    pub chunk_size: Option<u32>,
    #[serde(default)]
    pub chunk_overlap: Option<u32>,
    #[serde(default)]
    pub max_embedding_requests_per_min: Option<u32>,
    #[serde(default)]
    pub parser_type: ParserType,
    #[serde(default)]
    pub parser_config: ParserConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ImportSource {
    Gcs {
        uri: String,
    },
    #[serde(rename_all = "camelCase")]
    GoogleDrive {
        resource_id: String,
        #[serde(default)]
        resource_type: Option<String>,
    },
    Slack {
        channels: Value,
    },
    #[serde(rename_all = "camelCase")]
    Jira {
        jira_config: Value,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserType {
    Llm,
    Layout,
    #[default]
    #[serde(other)]
    Default,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_parsing_requests_per_min: Option<u32>,
    #[serde(default)]
    pub custom_parsing_prompt: Option<String>,
    #[serde(default)]
    pub processor_region: Option<String>,
    #[serde(default)]
    pub processor_id: Option<String>,
}

impl ImportRequest {
    /// Build the `importRagFilesConfig` object for `ragFiles:import`.
    pub fn import_config(&self, project_id: &str, location: &str) -> Result<Value, RequestError> {
        let positive = |v: Option<u32>, default: u32| v.filter(|n| *n > 0).unwrap_or(default);

        let mut config = Map::new();
        config.insert(
            "ragFileTransformationConfig".into(),
            json!({
                "ragFileChunkingConfig": {
                    "chunkSize": positive(self.chunk_size, DEFAULT_CHUNK_SIZE),
                    "chunkOverlap": positive(self.chunk_overlap, DEFAULT_CHUNK_OVERLAP),
                }
            }),
        );
        config.insert(
            "maxEmbeddingRequestsPerMin".into(),
            json!(positive(self.max_embedding_requests_per_min, DEFAULT_MAX_EMBEDDING_REQUESTS_PER_MIN)),
        );

        let (key, source) = match &self.source {
            ImportSource::Gcs { uri } => {
                if uri.trim().is_empty() {
                    return Err(RequestError::new("source.uri must not be empty"));
                }
                ("gcsSource", json!({ "uris": [uri] }))
            }
            ImportSource::GoogleDrive { resource_id, resource_type } => (
                "googleDriveSource",
                json!({
                    "resourceIds": [{
                        "resourceId": resource_id,
                        "resourceType": resource_type.as_deref().unwrap_or(DEFAULT_DRIVE_RESOURCE_TYPE),
                    }]
                }),
            ),
            ImportSource::Slack { channels } => ("slackSource", json!({ "channels": channels })),
            ImportSource::Jira { jira_config } => ("jiraSource", jira_config.clone()),
        };
        config.insert(key.into(), source);

        let parser = &self.parser_config;
        match self.parser_type {
            ParserType::Default => {}
            ParserType::Llm => {
                let model = parser.model.as_deref().unwrap_or(DEFAULT_LLM_PARSER_MODEL);
                let mut llm = Map::new();
                llm.insert(
                    "model".into(),
                    json!(format!(
                        "projects/{project_id}/locations/{location}/publishers/google/models/{model}"
                    )),
                );
                if let Some(rate) = parser.max_parsing_requests_per_min.filter(|n| *n > 0) {
                    llm.insert("maxParsingRequestsPerMin".into(), json!(rate));
                }
                if let Some(prompt) = parser.custom_parsing_prompt.as_deref().filter(|p| !p.is_empty()) {
                    llm.insert("customParsingPrompt".into(), json!(prompt));
                }
                config.insert("ragFileParsingConfig".into(), json!({ "llmParser": llm }));
            }
            ParserType::Layout => {
                let (Some(region), Some(processor)) =
                    (parser.processor_region.as_deref(), parser.processor_id.as_deref())
                else {
                    return Err(RequestError::new(
                        "layout parser requires parserConfig.processorRegion and parserConfig.processorId",
                    ));
                };
                config.insert(
                    "ragFileParsingConfig".into(),
                    json!({
                        "layoutParser": {
                            "processorName": format!("projects/{project_id}/locations/{region}/processors/{processor}"),
                            "maxParsingRequestsPerMin": parser
                                .max_parsing_requests_per_min
                                .filter(|n| *n > 0)
                                .unwrap_or(DEFAULT_LAYOUT_PARSING_REQUESTS_PER_MIN),
                        }
                    }),
                );
            }
        }

        Ok(Value::Object(config))
    }
}

/// Only full resource names under a project are forwarded.
fn resource_name<'a>(field: &str, name: &'a str) -> Result<&'a str, RequestError> {
    let name = name.trim().trim_start_matches('/');
    if !name.starts_with("projects/") || name.split('/').any(|seg| seg == "..") {
        return Err(RequestError::new(format!(
            "{field} must be a resource name starting with `projects/`"
        )));
    }
    Ok(name)
}

fn require_corpus(corpus: Option<&str>) -> Result<&str, RequestError> {
    let corpus = corpus.ok_or_else(|| RequestError::new("no RAG corpus configured"))?;
    resource_name("ragCorpus", corpus)
}

/// Run `action` against `corpus` (required by every corpus-scoped action).
pub async fn execute(
    client: &VertexClient,
    project_id: &str,
    corpus: Option<&str>,
    action: RagAction,
) -> anyhow::Result<Value> {
    info!(action = action.name(), "RAG engine action");
    match action {
        RagAction::ListFiles => {
            let path = format!("v1/{}/ragFiles", require_corpus(corpus)?);
            client.call_json(Method::GET, &path, None).await
        }
        RagAction::GetCorpus => {
            let path = format!("v1/{}", require_corpus(corpus)?);
            client.call_json(Method::GET, &path, None).await
        }
        RagAction::ImportFiles(request) => {
            let path = format!("v1/{}/ragFiles:import", require_corpus(corpus)?);
            let body = json!({ "importRagFilesConfig": request.import_config(project_id, &client.location)? });
            client.call_json(Method::POST, &path, Some(&body)).await
        }
        RagAction::DeleteFile { file_name } => {
            let path = format!("v1beta1/{}", resource_name("fileName", &file_name)?);
            client.call(Method::DELETE, &path, None).await?;
            Ok(json!({ "success": true }))
        }
        RagAction::GetOperation { operation_name } => {
            let path = format!("v1/{}", resource_name("operationName", &operation_name)?);
            client.call_json(Method::GET, &path, None).await
        }
    }
}
