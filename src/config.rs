//! Service settings for vertex-gateway.
//!
//! Settings are loaded once at startup from a TOML file and validated before the
//! server opens its port. This file only describes *where* things live (ports,
//! endpoints, which environment variables hold secrets); the model
//! configuration itself is stored in the config table and edited at runtime
//! through `/api/config`.
//!
//! # Example
//! ```toml
//! [server]
//! port        = 8080
//! api_key_env = "VGW_API_KEY"
//!
//! [vertex]
//! location = "europe-west1"
//!
//! [store]
//! backend         = "postgrest"
//! url             = "https://example.supabase.co"
//! service_key_env = "SUPABASE_SERVICE_ROLE_KEY"
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level service settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub vertex: VertexConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.vertex.location.trim().is_empty(),
            "[vertex] location must not be empty"
        );
        anyhow::ensure!(
            self.vertex.token_uri.starts_with("http"),
            "[vertex] token_uri `{}` is not an http(s) URL",
            self.vertex.token_uri
        );
        if let Some(base) = &self.vertex.api_base {
            anyhow::ensure!(
                base.starts_with("http"),
                "[vertex] api_base `{}` is not an http(s) URL",
                base
            );
        }

        anyhow::ensure!(
            !self.store.config_key.trim().is_empty(),
            "[store] config_key must not be empty"
        );
        if self.store.backend == StoreBackend::Postgrest {
            let url = self
                .store
                .url
                .as_deref()
                .context("[store] backend `postgrest` requires `url`")?;
            anyhow::ensure!(
                url.starts_with("http"),
                "[store] url `{}` is not an http(s) URL",
                url
            );
            anyhow::ensure!(
                !self.store.table.trim().is_empty(),
                "[store] table must not be empty"
            );
        }

        Ok(())
    }
}

/// HTTP listener and logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen port (default: 8080).
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Log level override (also controlled by `RUST_LOG` env var).
    #[serde(default)]
    pub log_level: Option<String>,

    /// Log line format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// Environment variable whose value is the shared secret expected in the
    /// `x-api-key` header.
    ///
    /// When unset (or the variable is empty), the `internalApiKey` stored in
    /// the config table is used instead; when that is empty too, the API is
    /// open.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ServerConfig {
    /// Resolve the shared secret from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            log_level: None,
            log_format: LogFormat::default(),
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where the provider lives and where its credentials come from when the
/// config table does not carry them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VertexConfig {
    /// Vertex AI region (default: `europe-west1`).
    #[serde(default = "defaults::location")]
    pub location: String,

    /// OAuth2 token endpoint; also used as the JWT `aud` claim.
    #[serde(default = "defaults::token_uri")]
    pub token_uri: String,

    /// Override for the regional API host. Derived from `location` when unset.
    #[serde(default)]
    pub api_base: Option<String>,

    /// Fallback env var for the GCP project id.
    #[serde(default)]
    pub project_id_env: Option<String>,

    /// Fallback env var for the service account email.
    #[serde(default)]
    pub client_email_env: Option<String>,

    /// Fallback env var for the service account PEM private key.
    #[serde(default)]
    pub private_key_env: Option<String>,
}

impl VertexConfig {
    /// Base URL of the regional Vertex AI API, without a trailing `/`.
    pub fn api_base(&self) -> String {
        match &self.api_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com", self.location),
        }
    }
}

impl Default for VertexConfig {
    fn default() -> Self {
        Self {
            location: defaults::location(),
            token_uri: defaults::token_uri(),
            api_base: None,
            project_id_env: None,
            client_email_env: None,
            private_key_env: None,
        }
    }
}

/// Which [`crate::store::ConfigStore`] implementation backs `/api/config`.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Hosted table behind a PostgREST endpoint (Supabase).
    #[default]
    Postgrest,
    /// Process-local map. Lost on restart; meant for local development.
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Postgrest => "postgrest",
            Self::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Project URL, e.g. `https://<ref>.supabase.co`. `/rest/v1` is appended.
    #[serde(default)]
    pub url: Option<String>,

    /// Environment variable holding the service-role key sent as `apikey`
    /// and `Authorization: Bearer`.
    #[serde(default)]
    pub service_key_env: Option<String>,

    /// Table holding the configuration row (default: `vertex_configs`).
    #[serde(default = "defaults::table")]
    pub table: String,

    /// Value of the unique `config_key` column (default: `default`).
    #[serde(default = "defaults::config_key")]
    pub config_key: String,
}

impl StoreConfig {
    pub fn service_key(&self) -> Option<String> {
        self.service_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            service_key_env: None,
            table: defaults::table(),
            config_key: defaults::config_key(),
        }
    }
}

mod defaults {
    pub fn port() -> u16 { 8080 }
    pub fn location() -> String { "europe-west1".into() }
    pub fn token_uri() -> String { "https://oauth2.googleapis.com/token".into() }
    pub fn table() -> String { "vertex_configs".into() }
    pub fn config_key() -> String { "default".into() }
}
