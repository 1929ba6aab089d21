//! aliasrpc Transport Layer
//!
//! This module provides the TCP transport and codec used for every aliasrpc
//! exchange: client to server calls as well as registry operations.
//!
//! # Architecture
//!
//! - **Codec**: JSON serialization of any serde message type
//! - **Framing**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Client side**: [`TcpTransportAsync`] connects and exchanges frames
//! - **Server side**: [`TcpServer`] accepts connections and answers frames
//!   until it is told to shut down
//!
//! # Message Size Limits
//!
//! Frames larger than [`MAX_MESSAGE_SIZE`] are rejected on read.

pub mod codec;
pub mod tcp;
pub mod tcp_server;

pub use codec::JsonCodec;
pub use tcp::{TcpTransportAsync, DEFAULT_TIMEOUT, MAX_MESSAGE_SIZE};
pub use tcp_server::TcpServer;
