use std::time::Duration;

use aliasrpc_common::transport::TcpTransportAsync;
use aliasrpc_common::{Result, RpcError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::RegistryStore;

/// One registry operation, as sent to a [`RegistryServer`](crate::RegistryServer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RegistryRequest {
    Put { key: String, value: String, ttl_ms: u64 },
    Get { key: String },
    Scan { prefix: String },
    Delete { key: String },
}

/// A registry server's answer to one [`RegistryRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegistryResponse {
    Ok,
    Value { value: Option<String> },
    Entries { entries: Vec<(String, String)> },
    Error { message: String },
}

/// [`RegistryStore`] living in a remote [`RegistryServer`](crate::RegistryServer).
///
/// Every operation opens its own connection, so a restarted registry is
/// picked up on the next call. Any failure to reach the registry surfaces
/// as [`RpcError::Registry`].
#[derive(Debug, Clone)]
pub struct RemoteStore {
    addr: String,
    transport: TcpTransportAsync,
}

impl RemoteStore {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            transport: TcpTransportAsync::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = TcpTransportAsync::with_timeout(timeout);
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn execute(&self, request: RegistryRequest) -> Result<RegistryResponse> {
        let exchange = async {
            let mut stream = self.transport.connect(&self.addr).await?;
            self.transport
                .send_request::<_, _, RegistryResponse>(&mut stream, &request)
                .await
        };

        match exchange.await {
            Ok(RegistryResponse::Error { message }) => Err(RpcError::Registry(message)),
            Ok(response) => Ok(response),
            Err(e) => Err(RpcError::Registry(format!("registry {} unreachable: {}", self.addr, e))),
        }
    }
}

fn unexpected(response: RegistryResponse) -> RpcError {
    RpcError::Registry(format!("unexpected registry response: {:?}", response))
}

#[async_trait]
impl RegistryStore for RemoteStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let request = RegistryRequest::Put {
            key: key.to_string(),
            value: value.to_string(),
            ttl_ms: ttl.as_millis() as u64,
        };
        match self.execute(request).await? {
            RegistryResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.execute(RegistryRequest::Get { key: key.to_string() }).await? {
            RegistryResponse::Value { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        match self
            .execute(RegistryRequest::Scan {
                prefix: prefix.to_string(),
            })
            .await?
        {
            RegistryResponse::Entries { entries } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.execute(RegistryRequest::Delete { key: key.to_string() }).await? {
            RegistryResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}
