use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::protocol::error::{Result, RpcError};
use crate::transport::codec::JsonCodec;
use crate::transport::tcp::TcpTransportAsync;

/// Default time allowed for open connections to finish after shutdown (5 seconds)
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Async framed TCP server.
///
/// Accepts connections in a loop and spawns a task per connection. Each
/// connection answers frames one at a time until the peer hangs up or the
/// server is told to shut down. A request that is being handled when
/// shutdown arrives still gets its reply.
pub struct TcpServer {
    listener: TcpListener,
    drain_timeout: Duration,
}

impl TcpServer {
    /// Creates a new TCP server bound to the specified address.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g., "0.0.0.0:7007")
    pub async fn bind(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        Ok(Self::from_listener(listener))
    }

    /// Wraps an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            listener,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RpcError::Transport(format!("Failed to get local addr: {}", e)))
    }

    /// Serves connections until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// The handler receives each decoded request, or the decode error for a
    /// frame that was not a valid `Req`, and returns the reply to send back.
    /// After shutdown the listener is closed and open connections get
    /// `drain_timeout` to finish before they are aborted.
    pub async fn run_until<Req, Resp, F, Fut>(
        self,
        handler: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Result<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Resp> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(%peer_addr, "connection established");
                        let handler = handler.clone();
                        let shutdown = shutdown.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, handler, shutdown).await {
                                debug!(%peer_addr, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
                _ = stopped(&mut shutdown) => break,
            }

            while connections.try_join_next().is_some() {}
        }

        drop(self.listener);

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "drain timeout elapsed, aborting open connections"
            );
            connections.shutdown().await;
        }

        Ok(())
    }
}

/// Resolves once shutdown is requested or the shutdown sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Handle a single TCP connection
///
/// Processes requests until the connection is closed or shutdown is signalled
/// between two requests.
async fn handle_connection<Req, Resp, F, Fut>(
    mut stream: TcpStream,
    handler: Arc<F>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Result<Req>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Resp> + Send + 'static,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => return Ok(()),
            frame = TcpTransportAsync::read_frame(&mut stream) => frame?,
        };

        let Some(buf) = frame else {
            debug!("connection closed by peer");
            return Ok(());
        };

        let response = handler(JsonCodec::decode::<Req>(&buf)).await;

        let encoded = JsonCodec::encode(&response)?;
        TcpTransportAsync::send_message(&mut stream, &encoded).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    async fn start_echo_server() -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<Result<()>>) {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(server.run_until(
            |request: Result<Value>| async move {
                match request {
                    Ok(value) => json!({ "echo": value }),
                    Err(e) => json!({ "error": e.to_string() }),
                }
            },
            stop_rx,
        ));

        (addr, stop_tx, handle)
    }

    #[tokio::test]
    async fn test_tcp_server_local_addr() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn test_serves_multiple_requests_per_connection() {
        let (addr, stop_tx, handle) = start_echo_server().await;
        let transport = TcpTransportAsync::new();
        let mut stream = transport.connect(&addr.to_string()).await.unwrap();

        for n in 0..3 {
            let reply: Value = transport.send_request(&mut stream, &json!(n)).await.unwrap();
            assert_eq!(reply, json!({ "echo": n }));
        }

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_reaches_handler_as_error() {
        let (addr, stop_tx, handle) = start_echo_server().await;
        let mut stream = TcpTransportAsync::new().connect(&addr.to_string()).await.unwrap();

        TcpTransportAsync::send_message(&mut stream, b"{not json").await.unwrap();
        let reply: Value = JsonCodec::decode(&TcpTransportAsync::receive_message(&mut stream).await.unwrap()).unwrap();

        assert!(reply["error"].as_str().unwrap().contains("JSON"));

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (addr, stop_tx, handle) = start_echo_server().await;

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let result = TcpTransportAsync::new().connect(&addr.to_string()).await;
        assert!(result.is_err());
    }
}
