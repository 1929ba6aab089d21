use std::time::Duration;

use aliasrpc_common::Result;
use async_trait::async_trait;

/// Key-value store backing service discovery.
///
/// Implementations must give `put` overwrite semantics: writing an existing
/// key replaces its value and restarts its expiry from the time of the call.
/// Expired entries are invisible to `get` and `scan_prefix`.
///
/// Connection-level failures are reported as [`RpcError::Registry`]
/// so callers can treat them as degraded discoverability rather than as
/// failed calls.
///
/// [`RpcError::Registry`]: aliasrpc_common::RpcError::Registry
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Sets `key` to `value`, expiring `ttl` from now.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Reads a live value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Lists every live `(key, value)` whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Removes `key`; removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}
