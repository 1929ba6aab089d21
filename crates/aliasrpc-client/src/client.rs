use std::sync::Arc;
use std::time::Duration;

use aliasrpc_common::transport::{TcpTransportAsync, DEFAULT_TIMEOUT};
use aliasrpc_common::{CallEnvelope, FaultKind, Reply, Result, RpcError};
use aliasrpc_registry::{RegistryClient, RegistryConfig, RegistryStore, ServiceRecord};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};

const CLIENT_ID_LEN: usize = 16;
const EVENT_CAPACITY: usize = 256;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Must use the same key prefix as the servers
    pub registry: RegistryConfig,
    /// Upper bound for one request/reply exchange
    pub request_timeout: Duration,
    pub pool: PoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            request_timeout: DEFAULT_TIMEOUT,
            pool: PoolConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// Something observable that happened inside a client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A call is about to be sent to the server at `addr`.
    Call {
        alias: String,
        method: String,
        server_id: String,
        addr: String,
    },
    /// A call failed.
    Error {
        alias: String,
        method: String,
        kind: FaultKind,
        message: String,
    },
}

/// Calls methods on handlers by alias, wherever they are served.
///
/// Every call resolves the alias through the registry, so a server that
/// stops heartbeating drops out of rotation once its record expires.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use aliasrpc_client::{ClientConfig, RpcClient};
/// use aliasrpc_registry::RemoteStore;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(RemoteStore::new("127.0.0.1:7379"));
/// let client = RpcClient::new(ClientConfig::default(), store);
/// let sum: i64 = client.call_as("math", "add", vec![json!(2), json!(3)]).await?;
/// assert_eq!(sum, 5);
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    id: String,
    registry: RegistryClient,
    transport: TcpTransportAsync,
    pool: ConnectionPool,
    events: broadcast::Sender<ClientEvent>,
}

impl RpcClient {
    pub fn new(config: ClientConfig, store: Arc<dyn RegistryStore>) -> Self {
        let transport = TcpTransportAsync::with_timeout(config.request_timeout);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: generate_id(),
            registry: RegistryClient::new(store, config.registry),
            pool: ConnectionPool::new(config.pool, transport.clone()),
            transport,
            events,
        }
    }

    /// Identity sent as the `sender` of every call.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Calls `method` on the handler registered as `alias`.
    pub async fn call(&self, alias: &str, method: &str, params: Vec<Value>) -> Result<Value> {
        let result = self.try_call(alias, method, &params).await;
        if let Err(e) = &result {
            debug!(%alias, %method, error = %e, "call failed");
            let _ = self.events.send(ClientEvent::Error {
                alias: alias.to_string(),
                method: method.to_string(),
                kind: e.fault_kind(),
                message: e.to_string(),
            });
        }
        result
    }

    /// Like [`call`](Self::call), deserializing the result into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        alias: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T> {
        let value = self.call(alias, method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// The most recently published live record for `alias`.
    pub async fn resolve(&self, alias: &str) -> Result<ServiceRecord> {
        self.registry
            .lookup(alias)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RpcError::Unavailable(format!("No server found for {}", alias)))
    }

    async fn try_call(&self, alias: &str, method: &str, params: &[Value]) -> Result<Value> {
        let record = self.resolve(alias).await?;
        let envelope = CallEnvelope::new(self.id.clone(), alias, method, params)?;
        let addr = record.addr();

        let _ = self.events.send(ClientEvent::Call {
            alias: alias.to_string(),
            method: method.to_string(),
            server_id: record.id.clone(),
            addr: addr.clone(),
        });
        debug!(%alias, %method, server_id = %record.id, %addr, "sending call");

        let conn = self.pool.acquire(&addr).await.map_err(into_transport)?;
        let reused = conn.reused;
        let reply = match self.exchange(conn, &envelope).await {
            Err(e) if reused && is_connection_failure(&e) => {
                debug!(%addr, error = %e, "reused connection failed, retrying on a fresh one");
                let conn = self.pool.connect(&addr).await.map_err(into_transport)?;
                self.exchange(conn, &envelope).await?
            }
            other => other?,
        };

        reply.into_result()
    }

    /// One request/reply exchange; the connection goes back to the pool only
    /// if it completed.
    async fn exchange(&self, mut conn: PooledConnection, envelope: &CallEnvelope) -> Result<Reply> {
        let reply = self
            .transport
            .send_request(&mut conn.stream, envelope)
            .await
            .map_err(into_transport)?;
        self.pool.release(conn).await;
        Ok(reply)
    }
}

fn is_connection_failure(error: &RpcError) -> bool {
    matches!(error, RpcError::Transport(_))
}

fn into_transport(error: RpcError) -> RpcError {
    match error {
        RpcError::Io(e) => RpcError::Transport(e.to_string()),
        other => other,
    }
}

fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aliasrpc_registry::{AllowedMethods, MemoryStore};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_unknown_alias_is_unavailable() {
        let client = RpcClient::new(ClientConfig::default(), Arc::new(MemoryStore::new()));
        let mut events = client.subscribe();

        let err = client.call("nope", "add", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Unavailable(_)));

        match events.recv().await.unwrap() {
            ClientEvent::Error { alias, kind, .. } => {
                assert_eq!(alias, "nope");
                assert_eq!(kind, FaultKind::Unavailable);
            }
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_prefers_most_recent_record() {
        let store = Arc::new(MemoryStore::new());
        let client = RpcClient::new(ClientConfig::default(), store);

        let mut old = ServiceRecord::new("old", "10.0.0.1", 7007, AllowedMethods::all());
        old.published_at_ms = 1;
        let mut new = ServiceRecord::new("new", "10.0.0.2", 7007, AllowedMethods::all());
        new.published_at_ms = 2;
        client.registry().publish("math", &old).await.unwrap();
        client.registry().publish("math", &new).await.unwrap();

        assert_eq!(client.resolve("math").await.unwrap().id, "new");
    }

    #[tokio::test]
    async fn test_dead_server_is_a_transport_error() {
        // Reserve a port and close it again so nothing listens there.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let store = Arc::new(MemoryStore::new());
        let client = RpcClient::new(ClientConfig::default(), store);
        let record = ServiceRecord::new("gone", "127.0.0.1", port, AllowedMethods::all());
        client.registry().publish("math", &record).await.unwrap();

        let err = client.call("math", "add", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)), "got {:?}", err);
    }

    #[test]
    fn test_client_ids_are_random() {
        assert_eq!(generate_id().len(), CLIENT_ID_LEN);
        assert_ne!(generate_id(), generate_id());
    }
}
