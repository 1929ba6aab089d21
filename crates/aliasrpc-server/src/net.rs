//! Host detection and port selection.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use aliasrpc_common::{Result, RpcError};
use tokio::net::TcpListener;
use tracing::debug;

/// First port tried when none is configured.
pub const DEFAULT_PORT: u16 = 7007;

/// The IPv4 address of the interface that routes outward, if any.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick a
/// source address.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Binds exactly `host:port`.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .map_err(|e| RpcError::Transport(format!("Failed to bind {}:{}: {}", host, port, e)))
}

/// Binds the lowest free port at or above `start`.
pub async fn bind_from(host: &str, start: u16) -> Result<TcpListener> {
    for port in start..=u16::MAX {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                debug!(port, "port in use, trying next");
            }
            Err(e) => {
                return Err(RpcError::Transport(format!(
                    "Failed to bind {}:{}: {}",
                    host, port, e
                )))
            }
        }
    }
    Err(RpcError::Transport(format!(
        "no free port on {} at or above {}",
        host, start
    )))
}
