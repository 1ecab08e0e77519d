// Task Payload Codec
//
// Encodes an ordered argument list plus a keyed-argument mapping into the
// opaque payload bytes a task carries. Isolated here so the storage format
// can evolve without touching worker or endpoint logic.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arguments for one deferred call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CallPayload {
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Payload with positional arguments only
    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_args_and_kwargs() {
        let mut kwargs = Map::new();
        kwargs.insert("kw".to_string(), json!("arg"));
        kwargs.insert("n".to_string(), json!(42));

        let payload = CallPayload::new(vec![json!(1), json!("two"), json!([3, 4])], kwargs);
        let decoded = CallPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trip_empty_payload() {
        let payload = CallPayload::default();
        let decoded = CallPayload::decode(&payload.encode().unwrap()).unwrap();
        assert!(decoded.args.is_empty());
        assert!(decoded.kwargs.is_empty());
    }

    #[test]
    fn missing_fields_default() {
        let decoded = CallPayload::decode(b"{}").unwrap();
        assert_eq!(decoded, CallPayload::default());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(CallPayload::decode(b"\x80\x81not json").is_err());
    }
}
