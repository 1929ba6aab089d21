use std::time::Duration;

use aliasrpc_common::Result;
use aliasrpc_registry::{RegistryClient, ServiceRecord};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::events::Events;

/// Keeps one alias' service record alive in the registry.
pub struct HeartbeatTask {
    registry: RegistryClient,
    alias: String,
    record: ServiceRecord,
    interval: Duration,
    events: Events,
}

impl HeartbeatTask {
    pub fn new(
        registry: RegistryClient,
        alias: impl Into<String>,
        record: ServiceRecord,
        events: Events,
    ) -> Self {
        let interval = registry.config().heartbeat_interval();
        Self {
            registry,
            alias: alias.into(),
            record,
            interval,
            events,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Re-stamps and writes the record once.
    pub async fn publish_once(&mut self) -> Result<()> {
        self.record.touch();
        self.registry.publish(&self.alias, &self.record).await
    }

    /// Starts renewing the record every heartbeat interval, the first renewal
    /// one interval from now.
    pub fn spawn(self) -> Heartbeat {
        let alias = self.alias.clone();
        let handle = tokio::spawn(async move {
            self.run().await;
        });
        Heartbeat { alias, handle }
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.publish_once().await {
                Ok(()) => debug!(alias = %self.alias, "heartbeat published"),
                Err(e) => {
                    // Next attempt is the next tick.
                    warn!(alias = %self.alias, error = %e, "heartbeat failed");
                    self.events.error(e);
                }
            }
        }
    }
}

/// Handle to a running heartbeat. Dropping it stops the heartbeat.
#[derive(Debug)]
pub struct Heartbeat {
    alias: String,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use aliasrpc_common::RpcError;
    use aliasrpc_registry::{AllowedMethods, MemoryStore, RegistryConfig, RegistryStore};
    use tokio::sync::broadcast;

    use crate::events::ServerEvent;

    fn registry(store: Arc<MemoryStore>) -> RegistryClient {
        let config = RegistryConfig::default()
            .with_ttl(Duration::from_secs(10))
            .with_heartbeat_interval(Duration::from_secs(4));
        RegistryClient::new(store, config)
    }

    fn record() -> ServiceRecord {
        ServiceRecord::new("srv1", "127.0.0.1", 7007, AllowedMethods::all())
    }

    /// Rejects the next `failures_left` writes, then behaves like a memory store.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicUsize,
        puts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RegistryStore for FlakyStore {
        async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RpcError::Registry("store unavailable".into()));
            }
            self.inner.put(key, value, ttl).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
            self.inner.scan_prefix(prefix).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    fn drain_errors(rx: &mut broadcast::Receiver<ServerEvent>) -> usize {
        let mut errors = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ServerEvent::Error(_)) {
                errors += 1;
            }
        }
        errors
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_stays_visible_while_heartbeat_runs() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let mut task = HeartbeatTask::new(registry.clone(), "math", record(), Events::new());
        task.publish_once().await.unwrap();
        let heartbeat = task.spawn();

        // Three full TTLs.
        for _ in 0..30 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let records = registry.lookup("math").await.unwrap();
            assert_eq!(records.len(), 1);
        }
        assert!(!heartbeat.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_expires_after_heartbeat_stops() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let mut task = HeartbeatTask::new(registry.clone(), "math", record(), Events::new());
        task.publish_once().await.unwrap();
        let heartbeat = task.spawn();

        tokio::time::sleep(Duration::from_secs(9)).await;
        heartbeat.cancel();
        assert_eq!(registry.lookup("math").await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(registry.lookup("math").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_renewal() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let mut task = HeartbeatTask::new(registry.clone(), "math", record(), Events::new());
        task.publish_once().await.unwrap();
        drop(task.spawn());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(registry.lookup("math").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_publish_is_reported() {
        // A remote store nobody listens on.
        let store = Arc::new(
            aliasrpc_registry::RemoteStore::new("127.0.0.1:1")
                .with_timeout(Duration::from_millis(100)),
        );
        let config = RegistryConfig::default()
            .with_ttl(Duration::from_secs(2))
            .with_heartbeat_interval(Duration::from_millis(100));
        let events = Events::new();
        let mut rx = events.subscribe();

        let _heartbeat =
            HeartbeatTask::new(RegistryClient::new(store, config), "math", record(), events).spawn();

        match rx.recv().await.unwrap() {
            ServerEvent::Error(error) => assert!(matches!(*error, aliasrpc_common::RpcError::Registry(_))),
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewals_wait_for_the_next_tick() {
        let store = Arc::new(FlakyStore::default());
        let config = RegistryConfig::default()
            .with_ttl(Duration::from_secs(10))
            .with_heartbeat_interval(Duration::from_secs(4));
        let registry = RegistryClient::new(store.clone(), config);
        let events = Events::new();
        let mut rx = events.subscribe();

        let mut task = HeartbeatTask::new(registry.clone(), "math", record(), events);
        task.publish_once().await.unwrap();
        store.failures_left.store(2, Ordering::SeqCst);
        let _heartbeat = task.spawn();

        // First tick at 4s fails.
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(drain_errors(&mut rx), 1);
        assert_eq!(store.puts.load(Ordering::SeqCst), 2);

        // No retry before the second tick at 8s, which fails too.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.puts.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(drain_errors(&mut rx), 1);
        assert_eq!(store.puts.load(Ordering::SeqCst), 3);

        // The record published at 0s lapses at 10s.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.lookup("math").await.unwrap().is_empty());

        // The tick at 12s succeeds and the record is back.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(drain_errors(&mut rx), 0);
        assert_eq!(store.puts.load(Ordering::SeqCst), 4);
        assert_eq!(registry.lookup("math").await.unwrap().len(), 1);
    }
}
