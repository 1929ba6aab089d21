use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::error::{Result, RpcError};
use crate::transport::codec::JsonCodec;

/// Default timeout for connecting and for one request/reply exchange (5 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest frame body accepted on read or write (16 MiB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Async TCP transport for aliasrpc.
///
/// Connects to remote endpoints and exchanges length-prefixed JSON frames.
/// Every connect and every request/reply exchange is bounded by the
/// transport's timeout.
///
/// # Wire Protocol
///
/// ```text
/// [4-byte length] [JSON data]
/// ```
///
/// # Example
///
/// ```no_run
/// use aliasrpc_common::transport::TcpTransportAsync;
/// use aliasrpc_common::{CallEnvelope, Reply};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransportAsync::new();
/// let mut stream = transport.connect("127.0.0.1:7007").await?;
///
/// let call = CallEnvelope::new("client", "math", "add", &[json!(2), json!(3)])?;
/// let reply: Reply = transport.send_request(&mut stream, &call).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransportAsync {
    timeout: Duration,
}

impl TcpTransportAsync {
    /// Creates a transport using [`DEFAULT_TIMEOUT`].
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a transport with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connects to a remote endpoint.
    ///
    /// The address may resolve to several socket addresses; each is tried in
    /// turn until one accepts.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Transport`] if the address cannot be resolved or
    /// no resolved address accepts the connection in time.
    pub async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let socket_addrs = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| RpcError::Transport(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(self.timeout, TcpStream::connect(socket_addr)).await {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => last_err = Some(format!("timed out after {}ms", self.timeout.as_millis())),
            }
        }

        Err(RpcError::Transport(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err.unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// Sends one message and waits for the peer's reply.
    ///
    /// Combines [`send_message`](Self::send_message) and
    /// [`receive_message`](Self::receive_message) with JSON encoding, under
    /// the transport's timeout.
    pub async fn send_request<S, Req, Resp>(&self, stream: &mut S, request: &Req) -> Result<Resp>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let encoded = JsonCodec::encode(request)?;

        let exchange = async {
            Self::send_message(stream, &encoded).await?;
            Self::receive_message(stream).await
        };
        let data = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| RpcError::Timeout(self.timeout.as_millis() as u64))??;

        JsonCodec::decode(&data)
    }

    /// Sends a message with length prefix.
    ///
    /// Wire format: `[4-byte length as u32 big-endian] + [data]`
    pub async fn send_message<W>(stream: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(RpcError::Protocol(format!(
                "Message too large: {} bytes (max {} bytes)",
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        let len = data.len() as u32;

        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| Self::map_io_error(e, "writing length prefix"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| Self::map_io_error(e, "writing data"))?;
        stream
            .flush()
            .await
            .map_err(|e| Self::map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Reads the next frame, or `None` if the peer closed the stream cleanly
    /// before starting one.
    pub async fn read_frame<R>(stream: &mut R) -> Result<Option<Vec<u8>>>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Self::map_io_error(e, "reading length prefix")),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(RpcError::Protocol(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| Self::map_io_error(e, "reading data"))?;

        Ok(Some(buf))
    }

    /// Receives a message with length prefix; a closed stream is an error.
    pub async fn receive_message<R>(stream: &mut R) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        Self::read_frame(stream)
            .await?
            .ok_or_else(|| RpcError::Transport("Connection closed by peer".to_string()))
    }

    /// Map IO errors to aliasrpc errors
    ///
    /// - Socket-level timeouts/would block -> `Transport`
    /// - Lost connections -> `Transport`
    /// - Other IO errors -> `Io`
    ///
    /// `Timeout` is reserved for the deadline of
    /// [`send_request`](Self::send_request), which knows its duration.
    fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                RpcError::Transport(format!("{}: timed out", context))
            }
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => {
                RpcError::Transport(format!("{}: Connection lost", context))
            }
            _ => RpcError::Io(err),
        }
    }
}

impl Default for TcpTransportAsync {
    fn default() -> Self {
        Self::new()
    }
}
