use std::collections::HashMap;

use aliasrpc_common::transport::TcpTransportAsync;
use aliasrpc_common::Result;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// A connection checked out of the pool.
///
/// Hand it back with [`ConnectionPool::release`] once the exchange on it has
/// completed; dropping it closes the socket instead.
#[derive(Debug)]
pub struct PooledConnection {
    /// The TCP stream
    pub stream: TcpStream,
    /// The address this connection is to
    pub addr: String,
    /// Whether the connection came from the idle list rather than a fresh connect
    pub reused: bool,
}

/// Connection pool configuration.
///
/// # Default Configuration
///
/// - `max_idle_per_addr`: 8
///
/// # Example
///
/// ```rust
/// use aliasrpc_client::PoolConfig;
///
/// let config = PoolConfig { max_idle_per_addr: 2 };
/// assert_eq!(config.max_idle_per_addr, 2);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle connections kept per address; extras are closed on release
    pub max_idle_per_addr: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_addr: 8,
        }
    }
}

/// Reuses TCP connections to servers across calls.
///
/// # Architecture
///
/// - Idle connections are grouped by target address
/// - The most recently released connection is handed out first
/// - A connection is only ever used by one call at a time
///
/// A server may close an idle connection at any time, so a reused
/// connection can fail on first use. Callers retry such failures on a fresh
/// connection from [`connect`](Self::connect).
pub struct ConnectionPool {
    transport: TcpTransportAsync,
    idle: Mutex<HashMap<String, Vec<TcpStream>>>,
    config: PoolConfig,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, transport: TcpTransportAsync) -> Self {
        Self {
            transport,
            idle: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Takes an idle connection to `addr`, or opens a new one.
    pub async fn acquire(&self, addr: &str) -> Result<PooledConnection> {
        let reused = {
            let mut idle = self.idle.lock().await;
            idle.get_mut(addr).and_then(Vec::pop)
        };

        match reused {
            Some(stream) => Ok(PooledConnection {
                stream,
                addr: addr.to_string(),
                reused: true,
            }),
            None => self.connect(addr).await,
        }
    }

    /// Opens a new connection to `addr`, bypassing the idle list.
    pub async fn connect(&self, addr: &str) -> Result<PooledConnection> {
        let stream = self.transport.connect(addr).await?;
        Ok(PooledConnection {
            stream,
            addr: addr.to_string(),
            reused: false,
        })
    }

    /// Returns a connection for reuse. Closed when the address already has
    /// `max_idle_per_addr` idle connections.
    pub async fn release(&self, conn: PooledConnection) {
        let mut idle = self.idle.lock().await;
        let conns = idle.entry(conn.addr.clone()).or_default();
        if conns.len() < self.config.max_idle_per_addr {
            conns.push(conn.stream);
        } else {
            debug!(addr = %conn.addr, "idle pool full, closing connection");
        }
    }

    /// Idle connections currently kept for `addr`.
    pub async fn idle_count(&self, addr: &str) -> usize {
        self.idle.lock().await.get(addr).map_or(0, Vec::len)
    }

    /// Closes every idle connection.
    pub async fn clear(&self) {
        self.idle.lock().await.clear();
    }
}
