//! aliasrpc Server
//!
//! This crate exposes named handler objects over the aliasrpc transport and
//! keeps each alias discoverable through the registry.
//!
//! - [`handler`] - the [`Handler`] trait and the stock [`Service`] implementation
//! - [`table`] - alias to handler descriptors, with per-handler method whitelists
//! - [`dispatcher`] - turns one call envelope into exactly one reply
//! - [`heartbeat`] - periodic re-publication of service records
//! - [`server`] - the [`RpcServer`] shell and its lifecycle
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use aliasrpc_registry::MemoryStore;
//! use aliasrpc_server::{HandlerSpec, RpcServer, ServerConfig, Service};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let math = Service::named("math").immediate("add", |params| {
//!     let (a, b): (i64, i64) = params.parse()?;
//!     Ok(json!(a + b))
//! });
//!
//! let config = ServerConfig::default().with_handler(HandlerSpec::new(math).methods(["add"]));
//! let server = RpcServer::start(config, Arc::new(MemoryStore::new())).await?;
//! println!("serving on {}:{}", server.host(), server.port());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod events;
pub mod handler;
pub mod heartbeat;
pub mod net;
pub mod server;
pub mod table;

pub use config::{ServerConfig, TransportConfig};
pub use dispatcher::Dispatcher;
pub use events::{Events, ServerEvent};
pub use handler::{Handler, HandlerError, Outcome, Params, Service};
pub use heartbeat::Heartbeat;
pub use server::{RpcServer, ServerBuilder, ServerState};
pub use table::{HandlerDescriptor, HandlerSpec, HandlerTable, Registrations};
