//! aliasrpc Common Types and Transport
//!
//! This crate provides the wire protocol and the TCP transport layer shared by
//! the aliasrpc server, client and registry crates.
//!
//! # Overview
//!
//! aliasrpc exposes named handler objects ("aliases") over TCP. A client finds
//! the server currently serving an alias through a shared registry, then sends
//! it a call envelope. This crate contains the pieces every side agrees on:
//!
//! - **Protocol Layer**: call/response/fault envelopes and the error taxonomy
//! - **Transport Layer**: length-prefixed JSON frames over TCP
//!
//! # Architecture
//!
//! - **Transport**: TCP, one request/reply exchange at a time per connection
//! - **Serialization**: JSON
//! - **Message Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Max Message Size**: 16 MiB
//!
//! # Example
//!
//! ```
//! use aliasrpc_common::{CallEnvelope, Reply, FaultKind};
//! use serde_json::json;
//!
//! let call = CallEnvelope::new("client-1", "math", "add", &[json!(2), json!(3)]).unwrap();
//! assert_eq!(call.call.params, "[2,3]");
//!
//! let reply = Reply::fault(FaultKind::Forbidden, "method forbidden");
//! assert!(reply.is_fault());
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
