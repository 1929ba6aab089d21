use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aliasrpc_common::transport::TcpServer;
use aliasrpc_common::Result;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::remote::{RegistryRequest, RegistryResponse};
use crate::store::RegistryStore;

/// Serves a [`RegistryStore`] over TCP so several processes can share it.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use aliasrpc_registry::{MemoryStore, RegistryServer};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = RegistryServer::bind("0.0.0.0:7379", Arc::new(MemoryStore::new())).await?;
/// let (_stop, stop_rx) = tokio::sync::watch::channel(false);
/// server.run_until(stop_rx).await?;
/// # Ok(())
/// # }
/// ```
pub struct RegistryServer {
    store: Arc<dyn RegistryStore>,
    server: TcpServer,
}

impl RegistryServer {
    pub async fn bind(addr: &str, store: Arc<dyn RegistryStore>) -> Result<Self> {
        let server = TcpServer::bind(addr).await?;
        Ok(Self { store, server })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Serves registry operations until `shutdown` turns `true`.
    pub async fn run_until(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(addr = %self.local_addr()?, "registry listening");

        let store = self.store;
        self.server
            .with_drain_timeout(Duration::from_secs(1))
            .run_until(
                move |request: Result<RegistryRequest>| {
                    let store = store.clone();
                    async move { Self::handle(store.as_ref(), request).await }
                },
                shutdown,
            )
            .await
    }

    /// Applies one decoded request to the store.
    pub async fn handle(
        store: &dyn RegistryStore,
        request: Result<RegistryRequest>,
    ) -> RegistryResponse {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                return RegistryResponse::Error {
                    message: format!("malformed registry request: {}", e),
                }
            }
        };
        debug!(?request, "registry request");

        let result = match request {
            RegistryRequest::Put { key, value, ttl_ms } => store
                .put(&key, &value, Duration::from_millis(ttl_ms))
                .await
                .map(|_| RegistryResponse::Ok),
            RegistryRequest::Get { key } => store
                .get(&key)
                .await
                .map(|value| RegistryResponse::Value { value }),
            RegistryRequest::Scan { prefix } => store
                .scan_prefix(&prefix)
                .await
                .map(|entries| RegistryResponse::Entries { entries }),
            RegistryRequest::Delete { key } => {
                store.delete(&key).await.map(|_| RegistryResponse::Ok)
            }
        };

        result.unwrap_or_else(|e| RegistryResponse::Error {
            message: e.to_string(),
        })
    }
}
