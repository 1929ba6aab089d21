//! aliasrpc Envelopes
//!
//! This module defines the three messages exchanged between a client and a
//! server: the call envelope a client sends, and the response or fault
//! envelope a server sends back.
//!
//! Both the call parameters and the call result travel as JSON *strings*
//! nested inside the JSON frame, so the envelope layout stays fixed no matter
//! what values a handler accepts or returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{Result, RpcError};

/// Message metadata common to calls and responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Base {
    /// Identity of whoever wrote the envelope
    pub sender: String,
}

impl Base {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

/// Which handler method a call targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallTarget {
    /// Handler alias
    pub name: String,
    /// Method on the handler
    pub method: String,
    /// JSON-encoded ordered argument list
    pub params: String,
}

/// A request to invoke `call.method` on the handler registered as `call.name`.
///
/// # Example
///
/// ```
/// use aliasrpc_common::CallEnvelope;
/// use serde_json::json;
///
/// let call = CallEnvelope::new("client-1", "math", "add", &[json!(2), json!(3)]).unwrap();
/// assert_eq!(call.handler_name(), "math");
/// assert_eq!(call.decode_params().unwrap(), vec![json!(2), json!(3)]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallEnvelope {
    pub base: Base,
    pub call: CallTarget,
}

impl CallEnvelope {
    /// Builds a call envelope, encoding `params` as a JSON array string.
    pub fn new(
        sender: impl Into<String>,
        name: impl Into<String>,
        method: impl Into<String>,
        params: &[Value],
    ) -> Result<Self> {
        Ok(Self::with_raw_params(
            sender,
            name,
            method,
            serde_json::to_string(params)?,
        ))
    }

    /// Builds a call envelope around an already-encoded parameter string.
    pub fn with_raw_params(
        sender: impl Into<String>,
        name: impl Into<String>,
        method: impl Into<String>,
        params: impl Into<String>,
    ) -> Self {
        Self {
            base: Base::new(sender),
            call: CallTarget {
                name: name.into(),
                method: method.into(),
                params: params.into(),
            },
        }
    }

    pub fn handler_name(&self) -> &str {
        &self.call.name
    }

    pub fn method_name(&self) -> &str {
        &self.call.method
    }

    /// Decodes the parameter string into an ordered argument list.
    ///
    /// Anything other than a JSON array is rejected as a protocol error.
    pub fn decode_params(&self) -> Result<Vec<Value>> {
        match serde_json::from_str::<Value>(&self.call.params) {
            Ok(Value::Array(args)) => Ok(args),
            _ => Err(RpcError::Protocol("bad params".to_string())),
        }
    }
}

/// A successful call result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub base: Base,
    /// JSON string of `{"result": <value>}`
    pub res: String,
}

impl ResponseEnvelope {
    /// Wraps `result` as `{"result": result}`.
    pub fn new(base: Base, result: Value) -> Result<Self> {
        let res = serde_json::to_string(&serde_json::json!({ "result": result }))?;
        Ok(Self { base, res })
    }

    /// Extracts the wrapped result value.
    ///
    /// A `res` object without a `result` member decodes as `null`.
    pub fn result(&self) -> Result<Value> {
        match serde_json::from_str::<Value>(&self.res)? {
            Value::Object(mut map) => Ok(map.remove("result").unwrap_or(Value::Null)),
            other => Err(RpcError::Protocol(format!(
                "response payload is not an object: {}",
                other
            ))),
        }
    }
}

/// Category of a failed call, as it appears on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Malformed envelope or parameters
    Protocol,
    /// Unknown alias or method
    NotFound,
    /// Method is not on the handler's whitelist
    Forbidden,
    /// The handler failed
    Application,
    /// The connection to the server failed
    Transport,
    /// No live server serves the alias
    Unavailable,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Protocol => "protocol",
            FaultKind::NotFound => "not_found",
            FaultKind::Forbidden => "forbidden",
            FaultKind::Application => "application",
            FaultKind::Transport => "transport",
            FaultKind::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaultEnvelope {
    pub err: FaultKind,
    pub message: String,
}

impl FaultEnvelope {
    pub fn new(err: FaultKind, message: impl Into<String>) -> Self {
        Self {
            err,
            message: message.into(),
        }
    }
}

impl From<&RpcError> for FaultEnvelope {
    fn from(error: &RpcError) -> Self {
        let message = match error {
            RpcError::Protocol(msg)
            | RpcError::NotFound(msg)
            | RpcError::Forbidden(msg)
            | RpcError::Application(msg)
            | RpcError::Transport(msg)
            | RpcError::Unavailable(msg) => msg.clone(),
            other => other.to_string(),
        };
        FaultEnvelope::new(error.fault_kind(), message)
    }
}

/// What a server writes back for one call: exactly one of a response or a fault.
///
/// Serialized untagged; the two shapes are told apart by their `res` and
/// `err` fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Reply {
    Response(ResponseEnvelope),
    Fault(FaultEnvelope),
}

impl Reply {
    pub fn fault(kind: FaultKind, message: impl Into<String>) -> Self {
        Reply::Fault(FaultEnvelope::new(kind, message))
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Reply::Fault(_))
    }

    /// Fault kind, if this reply is a fault.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Reply::Fault(fault) => Some(fault.err),
            Reply::Response(_) => None,
        }
    }

    /// Converts the reply into the call's result value or its error.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Reply::Response(response) => response.result(),
            Reply::Fault(fault) => Err(fault.into()),
        }
    }
}

impl From<RpcError> for Reply {
    fn from(error: RpcError) -> Self {
        Reply::Fault(FaultEnvelope::from(&error))
    }
}
