use std::time::Duration;

use aliasrpc_common::{Result, RpcError};

/// Default record time-to-live (30 seconds)
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Default prefix of every registry key
pub const DEFAULT_KEY_PREFIX: &str = "aliasrpc:service:";

/// Registry configuration shared by servers and clients.
///
/// Both sides must agree on `key_prefix`. `heartbeat_interval` only matters
/// to servers; when unset it is half the TTL, so one missed heartbeat is
/// tolerated before a record expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Prefix of every key written or scanned
    pub key_prefix: String,
    /// Lifetime of a published record without renewal
    pub ttl: Duration,
    /// Interval between renewals; `None` means `ttl / 2`
    pub heartbeat_interval: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl: DEFAULT_TTL,
            heartbeat_interval: None,
        }
    }
}

impl RegistryConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Effective renewal interval.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval.unwrap_or(self.ttl / 2)
    }

    /// Checks that renewals happen strictly more often than records expire.
    pub fn validate(&self) -> Result<()> {
        let interval = self.heartbeat_interval();
        if interval.is_zero() {
            return Err(RpcError::Config("heartbeat interval must be non-zero".to_string()));
        }
        if interval >= self.ttl {
            return Err(RpcError::Config(format!(
                "heartbeat interval ({}ms) must be shorter than the ttl ({}ms)",
                interval.as_millis(),
                self.ttl.as_millis()
            )));
        }
        Ok(())
    }
}
