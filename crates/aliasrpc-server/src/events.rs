use std::sync::Arc;

use aliasrpc_common::{CallEnvelope, RpcError};
use tokio::sync::broadcast;

/// Capacity of the event channel; slow subscribers lag rather than block the server.
const EVENT_CAPACITY: usize = 256;

/// Something observable that happened inside a server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The server accepts calls.
    Listening {
        host: String,
        port: u16,
        server_id: String,
    },
    /// A non-fatal failure: a rejected whitelist entry, a failed heartbeat, ...
    Error(Arc<RpcError>),
    /// A call was received, before it is dispatched.
    Call(CallEnvelope),
}

/// Broadcast side of the server's event stream.
///
/// Emitting never fails; events without subscribers are dropped.
#[derive(Debug, Clone)]
pub struct Events {
    sender: broadcast::Sender<ServerEvent>,
}

impl Events {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn error(&self, error: RpcError) {
        self.emit(ServerEvent::Error(Arc::new(error)));
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}
