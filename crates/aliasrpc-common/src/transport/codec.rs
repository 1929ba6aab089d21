use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::Result;

/// JSON codec for every framed aliasrpc message.
///
/// # Example
///
/// ```
/// use aliasrpc_common::transport::JsonCodec;
/// use aliasrpc_common::{CallEnvelope, Reply};
/// use serde_json::json;
///
/// let call = CallEnvelope::new("c", "math", "add", &[json!(1), json!(2)]).unwrap();
/// let bytes = JsonCodec::encode(&call).unwrap();
/// let decoded: CallEnvelope = JsonCodec::decode(&bytes).unwrap();
/// assert_eq!(call, decoded);
/// ```
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a message to bytes
    pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    /// Decode a message from bytes
    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
