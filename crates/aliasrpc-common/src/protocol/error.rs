use thiserror::Error;

use super::envelopes::{FaultEnvelope, FaultKind};

/// Every failure an aliasrpc component can report.
///
/// The first six variants mirror the fault kinds that travel on the wire;
/// the rest are local to a process.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Application error: {0}")]
    Application(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Invalid alias: {0}")]
    InvalidAlias(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Server is stopped")]
    Stopped,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// The wire fault kind this error is reported as.
    ///
    /// Local-only errors collapse onto the closest caller-visible kind:
    /// timeouts and IO are transport failures, malformed JSON is a protocol
    /// failure, and registry trouble leaves the alias unavailable.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            RpcError::Protocol(_) | RpcError::Json(_) => FaultKind::Protocol,
            RpcError::NotFound(_) | RpcError::InvalidAlias(_) => FaultKind::NotFound,
            RpcError::Forbidden(_) => FaultKind::Forbidden,
            RpcError::Application(_) => FaultKind::Application,
            RpcError::Transport(_) | RpcError::Timeout(_) | RpcError::Io(_) => FaultKind::Transport,
            RpcError::Unavailable(_)
            | RpcError::Registry(_)
            | RpcError::Stopped
            | RpcError::Config(_) => FaultKind::Unavailable,
        }
    }

    /// Whether the error came from the network rather than from the remote side.
    pub fn is_transport(&self) -> bool {
        self.fault_kind() == FaultKind::Transport
    }
}

impl From<FaultEnvelope> for RpcError {
    fn from(fault: FaultEnvelope) -> Self {
        let FaultEnvelope { err, message } = fault;
        match err {
            FaultKind::Protocol => RpcError::Protocol(message),
            FaultKind::NotFound => RpcError::NotFound(message),
            FaultKind::Forbidden => RpcError::Forbidden(message),
            FaultKind::Application => RpcError::Application(message),
            FaultKind::Transport => RpcError::Transport(message),
            FaultKind::Unavailable => RpcError::Unavailable(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
