//! Process-local [`ConfigStore`] for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{ConfigRow, ConfigStore};

/// Keeps rows in a map keyed by `config_key`. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, ConfigRow>>,
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load(&self, config_key: &str) -> anyhow::Result<Option<ConfigRow>> {
        Ok(self.rows.read().await.get(config_key).cloned())
    }

    async fn upsert(&self, mut row: ConfigRow) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        row.created_at = rows
            .get(&row.config_key)
            .and_then(|existing| existing.created_at)
            .or(Some(now));
        row.updated_at = Some(now);
        rows.insert(row.config_key.clone(), row);
        Ok(())
    }
}
