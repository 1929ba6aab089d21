use std::collections::BTreeMap;
use std::time::Duration;

use aliasrpc_common::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::store::RegistryStore;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process [`RegistryStore`] with TTL expiry.
///
/// Expiry is measured on tokio's clock, so paused-time tests can advance
/// past a TTL without sleeping. Expired entries are purged lazily whenever
/// the store is touched.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn purge_expired(entries: &mut BTreeMap<String, Entry>) {
    let now = Instant::now();
    entries.retain(|_, entry| entry.expires_at > now);
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
