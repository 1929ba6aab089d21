pub mod envelopes;
pub mod error;


pub use envelopes::{Base, CallEnvelope, CallTarget, FaultEnvelope, FaultKind, Reply, ResponseEnvelope};
pub use error::{Result, RpcError};
