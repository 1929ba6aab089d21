//! aliasrpc Registry
//!
//! Service discovery for aliasrpc: servers publish an `alias -> {host, port}`
//! record with a time-to-live and keep refreshing it; clients scan the
//! records of an alias to find a live server.
//!
//! # Components
//!
//! - [`RegistryStore`] - the key-value contract (put with TTL, get, prefix scan, delete)
//! - [`MemoryStore`] - in-process store with TTL expiry
//! - [`RegistryServer`] / [`RemoteStore`] - the same store shared over TCP
//! - [`RegistryClient`] - typed publish / withdraw / lookup of [`ServiceRecord`]s
//! - [`RegistryKey`] - the collision-free key layout

pub mod client;
pub mod config;
pub mod key;
pub mod memory;
pub mod record;
pub mod remote;
pub mod server;
pub mod store;

pub use client::RegistryClient;
pub use config::RegistryConfig;
pub use key::RegistryKey;
pub use memory::MemoryStore;
pub use record::{AllowedMethods, ServiceRecord};
pub use remote::{RegistryRequest, RegistryResponse, RemoteStore};
pub use server::RegistryServer;
pub use store::RegistryStore;
