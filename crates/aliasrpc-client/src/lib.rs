pub mod client;
pub mod pool;

pub use client::{ClientConfig, ClientEvent, RpcClient};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
