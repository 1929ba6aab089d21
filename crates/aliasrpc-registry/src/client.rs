use std::sync::Arc;

use aliasrpc_common::Result;
use tracing::warn;

use crate::config::RegistryConfig;
use crate::key::RegistryKey;
use crate::record::ServiceRecord;
use crate::store::RegistryStore;

/// Typed access to service records in a [`RegistryStore`].
#[derive(Clone)]
pub struct RegistryClient {
    store: Arc<dyn RegistryStore>,
    config: RegistryConfig,
}

impl RegistryClient {
    pub fn new(store: Arc<dyn RegistryStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    /// Store key of `alias` as served by `server_id`.
    pub fn key(&self, alias: &str, server_id: &str) -> String {
        RegistryKey::new(alias, server_id).encode(&self.config.key_prefix)
    }

    /// Writes (or refreshes) the record of `alias` under the record's server id.
    pub async fn publish(&self, alias: &str, record: &ServiceRecord) -> Result<()> {
        let value = serde_json::to_string(record)?;
        self.store
            .put(&self.key(alias, &record.id), &value, self.config.ttl)
            .await
    }

    /// Removes the record of `alias` published by `server_id`.
    pub async fn withdraw(&self, alias: &str, server_id: &str) -> Result<()> {
        self.store.delete(&self.key(alias, server_id)).await
    }

    /// Reads the record of `alias` published by `server_id`, if it is still live.
    ///
    /// A value that does not parse as a [`ServiceRecord`] reads as absent.
    pub async fn get(&self, alias: &str, server_id: &str) -> Result<Option<ServiceRecord>> {
        let key = self.key(alias, server_id);
        let Some(value) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(%key, error = %e, "ignoring unparsable service record");
                Ok(None)
            }
        }
    }

    /// Every live record of `alias`, most recently published first.
    ///
    /// Values that do not parse as a [`ServiceRecord`] are skipped.
    pub async fn lookup(&self, alias: &str) -> Result<Vec<ServiceRecord>> {
        let prefix = RegistryKey::alias_prefix(&self.config.key_prefix, alias);
        let entries = self.store.scan_prefix(&prefix).await?;

        let mut records: Vec<ServiceRecord> = entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_str(&value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(%key, error = %e, "skipping unparsable service record");
                    None
                }
            })
            .collect();

        records.sort_by(|a, b| b.published_at_ms.cmp(&a.published_at_ms));
        Ok(records)
    }
}
