use std::time::Duration;

use aliasrpc_common::transport::tcp_server::DEFAULT_DRAIN_TIMEOUT;
use aliasrpc_registry::RegistryConfig;

use crate::table::HandlerSpec;

/// Address to bind when none is configured.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Where the server listens and what it advertises.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Advertised host. Detected from the local network when unset.
    pub host: Option<String>,
    /// `Some(0)` lets the OS pick; unset scans upwards from 7007.
    pub port: Option<u16>,
    pub bind_host: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            bind_host: DEFAULT_BIND_HOST.to_string(),
        }
    }
}

impl TransportConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_bind_host(mut self, bind_host: impl Into<String>) -> Self {
        self.bind_host = bind_host.into();
        self
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub registry: RegistryConfig,
    pub transport: TransportConfig,
    /// Handlers registered while the server starts.
    pub handlers: Vec<HandlerSpec>,
    /// How long open connections may keep running after shutdown starts
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            transport: TransportConfig::default(),
            handlers: Vec::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_handler(mut self, handler: HandlerSpec) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}
