//! [`ConfigStore`] backed by a hosted PostgREST endpoint (Supabase).
//!
//! Reads filter on `config_key=eq.<key>`; writes are a bulk insert with
//! `on_conflict=config_key` and `Prefer: resolution=merge-duplicates`, which
//! PostgREST turns into `INSERT ... ON CONFLICT (config_key) DO UPDATE`.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client};
use tracing::{debug, warn};

use super::{ConfigRow, ConfigStore};
use crate::config::StoreConfig;

pub struct PostgrestStore {
    client: Client,
    table_url: String,
}

impl PostgrestStore {
    /// Build a store for the `[store]` section.
    ///
    /// The service key (if configured) is sent both as `apikey` and as a
    /// Bearer token, which is what the hosted gateway expects for
    /// service-role access.
    pub fn new(cfg: &StoreConfig) -> anyhow::Result<Self> {
        let base = cfg
            .url
            .as_deref()
            .context("[store] url is required for the postgrest backend")?
            .trim_end_matches('/');

        let mut headers = header::HeaderMap::new();
        match cfg.service_key() {
            Some(key) => {
                headers.insert(
                    "apikey",
                    header::HeaderValue::from_str(&key)
                        .context("invalid service key value for apikey header")?,
                );
                headers.insert(
                    header::AUTHORIZATION,
                    header::HeaderValue::from_str(&format!("Bearer {key}"))
                        .context("invalid service key value for Authorization header")?,
                );
            }
            None => warn!("no store service key configured; relying on anonymous table access"),
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            table_url: format!("{base}/rest/v1/{}", cfg.table),
        })
    }
}

#[async_trait]
impl ConfigStore for PostgrestStore {
    async fn load(&self, config_key: &str) -> anyhow::Result<Option<ConfigRow>> {
        let response = self
            .client
            .get(&self.table_url)
            .query(&[("config_key", format!("eq.{config_key}")), ("select", "*".into())])
            .send()
            .await
            .with_context(|| format!("GET {}", self.table_url))?;

        let status = response.status();
        let text = response.text().await.context("reading config store response")?;
        if !status.is_success() {
            anyhow::bail!("config store returned HTTP {status}: {text}");
        }

        let mut rows: Vec<ConfigRow> = serde_json::from_str(&text)
            .with_context(|| format!("parsing config store response: {text}"))?;
        debug!(config_key, found = !rows.is_empty(), "config row loaded");
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    async fn upsert(&self, mut row: ConfigRow) -> anyhow::Result<()> {
        row.created_at = None;
        row.updated_at = Some(Utc::now());

        let response = self
            .client
            .post(&self.table_url)
            .query(&[("on_conflict", "config_key")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[&row])
            .send()
            .await
            .with_context(|| format!("POST {}", self.table_url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("config store rejected upsert with HTTP {status}: {text}");
        }
        debug!(config_key = %row.config_key, "config row upserted");
        Ok(())
    }
}
