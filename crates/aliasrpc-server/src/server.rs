use std::net::SocketAddr;
use std::sync::Arc;

use aliasrpc_common::transport::TcpServer;
use aliasrpc_common::{CallEnvelope, FaultKind, Reply, Result, RpcError};
use aliasrpc_registry::{RegistryClient, RegistryStore, ServiceRecord};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::events::{Events, ServerEvent};
use crate::heartbeat::HeartbeatTask;
use crate::net;
use crate::table::{HandlerDescriptor, HandlerSpec, Registrations};

const SERVER_ID_LEN: usize = 16;

/// Lifecycle of an [`RpcServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Binding,
    HandlersLoading,
    Listening,
    ShuttingDown,
    Stopped,
}

/// A server that has an identity but is not bound yet.
///
/// Subscribe here to observe the whole startup sequence, including the
/// `Listening` event.
pub struct ServerBuilder {
    id: String,
    config: ServerConfig,
    store: Arc<dyn RegistryStore>,
    events: Events,
    state: watch::Sender<ServerState>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig, store: Arc<dyn RegistryStore>) -> Self {
        let (state, _) = watch::channel(ServerState::Created);
        Self {
            id: generate_id(),
            config,
            store,
            events: Events::new(),
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Binds, registers the configured handlers and starts accepting calls.
    pub async fn start(self) -> Result<RpcServer> {
        let ServerBuilder {
            id,
            config,
            store,
            events,
            state,
        } = self;

        config.registry.validate()?;

        state.send_replace(ServerState::Binding);
        let transport = &config.transport;
        let host = transport
            .host
            .clone()
            .or_else(|| net::local_ipv4().map(|ip| ip.to_string()))
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let listener = match transport.port {
            Some(port) => net::bind(&transport.bind_host, port).await?,
            None => net::bind_from(&transport.bind_host, net::DEFAULT_PORT).await?,
        };
        let local_addr = listener.local_addr()?;
        let port = local_addr.port();
        info!(%id, %host, port, bind_addr = %local_addr, "server bound");

        let shared = Arc::new(Shared {
            id: id.clone(),
            host: host.clone(),
            port,
            registry: RegistryClient::new(store, config.registry.clone()),
            registrations: Arc::new(RwLock::new(Registrations::default())),
            registering: Mutex::new(()),
            events: events.clone(),
            state,
        });

        shared.state.send_replace(ServerState::HandlersLoading);
        shared.add_handlers(config.handlers).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(
            shared.registrations.clone(),
            format!("{}.{}", id, host),
            events.clone(),
        );
        let server = TcpServer::from_listener(listener).with_drain_timeout(config.drain_timeout);
        let accept_task = tokio::spawn(server.run_until(
            move |call: Result<CallEnvelope>| {
                let dispatcher = dispatcher.clone();
                async move {
                    match call {
                        Ok(call) => dispatcher.dispatch(call).await,
                        Err(e) => {
                            debug!(error = %e, "undecodable call envelope");
                            Reply::fault(FaultKind::Protocol, format!("bad envelope: {}", e))
                        }
                    }
                }
            },
            shutdown_rx,
        ));

        shared.state.send_replace(ServerState::Listening);
        events.emit(ServerEvent::Listening {
            host: host.clone(),
            port,
            server_id: id.clone(),
        });
        info!(%id, %host, port, "server listening");

        Ok(RpcServer {
            shared,
            local_addr,
            shutdown: shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }
}

/// Exposes registered handlers to remote callers and keeps their aliases
/// published in the registry.
pub struct RpcServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

struct Shared {
    id: String,
    host: String,
    port: u16,
    registry: RegistryClient,
    registrations: Arc<RwLock<Registrations>>,
    /// Held for a whole registration, publish included, so overlapping
    /// re-adds of one alias cannot interleave their records and heartbeats.
    registering: Mutex<()>,
    events: Events,
    state: watch::Sender<ServerState>,
}

impl RpcServer {
    pub fn builder(config: ServerConfig, store: Arc<dyn RegistryStore>) -> ServerBuilder {
        ServerBuilder::new(config, store)
    }

    /// Starts a server right away. Use [`RpcServer::builder`] to observe startup.
    pub async fn start(config: ServerConfig, store: Arc<dyn RegistryStore>) -> Result<Self> {
        ServerBuilder::new(config, store).start().await
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Advertised host.
    pub fn host(&self) -> &str {
        &self.shared.host
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.shared.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ServerState {
        *self.shared.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ServerState> {
        self.shared.state.subscribe()
    }

    pub async fn aliases(&self) -> Vec<String> {
        self.shared.registrations.read().await.handlers.aliases()
    }

    /// Registers a handler and publishes its alias. Returns the alias.
    pub async fn add_handler(&self, spec: HandlerSpec) -> Result<String> {
        self.shared.add_handler(spec).await
    }

    /// Registers several handlers, reporting failures as events.
    pub async fn add_handlers(&self, specs: Vec<HandlerSpec>) -> Vec<String> {
        self.shared.add_handlers(specs).await
    }

    /// Stops accepting calls, drains open connections, stops every heartbeat
    /// and removes this server's records. Calling it again does nothing.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(accept_task) = self.accept_task.lock().await.take() else {
            return Ok(());
        };

        self.shared.state.send_replace(ServerState::ShuttingDown);
        info!(id = %self.shared.id, "server shutting down");

        let _ = self.shutdown.send(true);
        match accept_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "accept loop failed"),
            Err(e) => error!(error = %e, "accept loop panicked"),
        }

        let (aliases, heartbeats) = {
            // Lets an in-flight registration finish before its record is withdrawn.
            let _registering = self.shared.registering.lock().await;
            let mut regs = self.shared.registrations.write().await;
            regs.closed = true;
            (regs.handlers.aliases(), std::mem::take(&mut regs.heartbeats))
        };
        drop(heartbeats);

        for alias in aliases {
            if let Err(e) = self.shared.registry.withdraw(&alias, &self.shared.id).await {
                warn!(%alias, error = %e, "failed to withdraw service record");
                self.shared.events.error(e);
            }
        }

        self.shared.state.send_replace(ServerState::Stopped);
        info!(id = %self.shared.id, "server stopped");
        Ok(())
    }
}

impl Shared {
    async fn add_handlers(&self, specs: Vec<HandlerSpec>) -> Vec<String> {
        let mut aliases = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.add_handler(spec).await {
                Ok(alias) => aliases.push(alias),
                Err(e) => {
                    warn!(error = %e, "failed to register handler");
                    self.events.error(e);
                }
            }
        }
        aliases
    }

    async fn add_handler(&self, spec: HandlerSpec) -> Result<String> {
        let (descriptor, rejected) = HandlerDescriptor::from_spec(spec)?;
        let alias = descriptor.alias().to_string();

        for method in rejected {
            warn!(%alias, %method, "whitelisted method does not exist");
            self.events.error(RpcError::NotFound(format!(
                "Invalid handler or method: {}.{}",
                alias, method
            )));
        }

        let record = ServiceRecord::new(
            self.id.clone(),
            self.host.clone(),
            self.port,
            descriptor.allowed_methods(),
        );
        let mut heartbeat = HeartbeatTask::new(self.registry.clone(), alias.clone(), record, self.events.clone());

        let _registering = self.registering.lock().await;
        {
            let mut regs = self.registrations.write().await;
            if regs.closed {
                return Err(RpcError::Stopped);
            }
            // Stop the previous heartbeat so it cannot overwrite the new record.
            regs.heartbeats.remove(&alias);
        }

        if let Err(e) = heartbeat.publish_once().await {
            warn!(%alias, error = %e, "failed to publish service record");
            self.events.error(e);
        }

        let mut regs = self.registrations.write().await;
        regs.handlers.insert(descriptor);
        regs.heartbeats.insert(alias.clone(), heartbeat.spawn());
        info!(%alias, id = %self.id, "handler registered");
        Ok(alias)
    }
}

fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SERVER_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use aliasrpc_common::transport::TcpTransportAsync;
    use aliasrpc_registry::{AllowedMethods, MemoryStore, RegistryConfig};
    use serde_json::json;

    use crate::config::TransportConfig;
    use crate::handler::Service;

    fn math() -> Service {
        Service::named("math")
            .immediate("add", |params| {
                let (a, b): (i64, i64) = params.parse()?;
                Ok(json!(a + b))
            })
            .immediate("sub", |params| {
                let (a, b): (i64, i64) = params.parse()?;
                Ok(json!(a - b))
            })
    }

    fn config() -> ServerConfig {
        ServerConfig::default()
            .with_transport(TransportConfig::default().with_host("127.0.0.1").with_port(0))
            .with_drain_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_generated_id_shape() {
        let id = generate_id();
        assert_eq!(id.len(), SERVER_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_id());
    }

    #[tokio::test]
    async fn test_startup_publishes_handlers() {
        let store = Arc::new(MemoryStore::new());
        let builder = RpcServer::builder(
            config().with_handler(HandlerSpec::new(math()).methods(["add"])),
            store.clone(),
        );
        let mut events = builder.subscribe();
        let server = builder.start().await.unwrap();

        assert_eq!(server.state(), ServerState::Listening);
        assert_eq!(server.aliases().await, vec!["math"]);

        match events.recv().await.unwrap() {
            ServerEvent::Listening {
                host,
                port,
                server_id,
            } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, server.port());
                assert_eq!(server_id, server.id());
            }
            other => panic!("expected listening event, got {:?}", other),
        }

        let records = server.registry().lookup("math").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, server.id());
        assert_eq!(records[0].port, server.port());
        assert_eq!(records[0].methods, AllowedMethods::only(["add"]));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_readding_alias_keeps_one_heartbeat() {
        let store = Arc::new(MemoryStore::new());
        let server = RpcServer::start(config(), store.clone()).await.unwrap();

        server.add_handler(HandlerSpec::new(math())).await.unwrap();
        server
            .add_handler(HandlerSpec::new(math()).methods(["sub"]))
            .await
            .unwrap();

        assert_eq!(server.aliases().await, vec!["math"]);
        assert_eq!(server.shared.registrations.read().await.heartbeat_count(), 1);

        let records = server.registry().lookup("math").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].methods, AllowedMethods::only(["sub"]));

        server.shutdown().await.unwrap();
    }

    /// Delays writes of records that advertise `add`.
    struct SlowAddStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl RegistryStore for SlowAddStore {
        async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
            if value.contains("\"add\"") {
                tokio::time::sleep(Duration::from_millis(200)).await;
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

    #[tokio::test]
    async fn test_overlapping_readds_settle_on_one_registration() {
        let store = Arc::new(SlowAddStore {
            inner: MemoryStore::new(),
        });
        let server = RpcServer::start(config(), store).await.unwrap();

        let (first, second) = tokio::join!(
            server.add_handler(HandlerSpec::new(math()).methods(["add"])),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                server
                    .add_handler(HandlerSpec::new(math()).methods(["sub"]))
                    .await
            }
        );
        first.unwrap();
        second.unwrap();

        let regs = server.shared.registrations.read().await;
        let descriptor = regs.resolve("math").unwrap();
        let live: Vec<&str> = descriptor
            .whitelist()
            .unwrap()
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(live, vec!["sub"]);
        assert_eq!(regs.heartbeat_count(), 1);
        drop(regs);

        let records = server.registry().lookup("math").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].methods, AllowedMethods::only(["sub"]));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_whitelist_entries_are_reported() {
        let server = RpcServer::start(config(), Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        let mut events = server.subscribe();

        server
            .add_handler(HandlerSpec::new(math()).methods(["add", "mul"]))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            ServerEvent::Error(error) => assert!(error.to_string().contains("math.mul")),
            other => panic!("expected error event, got {:?}", other),
        }
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_alias_is_an_error() {
        let server = RpcServer::start(config(), Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        let err = server
            .add_handler(HandlerSpec::new(Service::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidAlias(_)));
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_serves_calls_over_tcp() {
        let server = RpcServer::start(
            config().with_handler(HandlerSpec::new(math())),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

        let transport = TcpTransportAsync::new();
        let mut stream = transport
            .connect(&format!("127.0.0.1:{}", server.port()))
            .await
            .unwrap();
        let call = CallEnvelope::new("test", "math", "sub", &[json!(5), json!(1)]).unwrap();
        let reply: Reply = transport.send_request(&mut stream, &call).await.unwrap();
        assert_eq!(reply.into_result().unwrap(), json!(4));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_withdraws_records() {
        let store = Arc::new(MemoryStore::new());
        let server = RpcServer::start(
            config().with_handler(HandlerSpec::new(math())),
            store.clone(),
        )
        .await
        .unwrap();
        let mut state = server.state_changes();
        assert_eq!(store.len().await, 1);

        server.shutdown().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(store.is_empty().await);
        state.wait_for(|s| *s == ServerState::Stopped).await.unwrap();

        // Idempotent.
        server.shutdown().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);

        let err = server.add_handler(HandlerSpec::new(math())).await.unwrap_err();
        assert!(matches!(err, RpcError::Stopped));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_registry_config_is_rejected() {
        let config = config().with_registry(
            RegistryConfig::default()
                .with_ttl(Duration::from_secs(1))
                .with_heartbeat_interval(Duration::from_secs(2)),
        );
        let err = RpcServer::start(config, Arc::new(MemoryStore::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RpcError::Config(_)));
    }
}
