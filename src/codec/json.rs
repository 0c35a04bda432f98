//! JSON codec using `serde_json`.

use serde_json::Value;

use super::{Codec, JSON_TYPE};
use crate::error::{Result, RpcError};

/// JSON codec, mostly useful for debugging traffic with standard tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn codec_type(&self) -> &str {
        JSON_TYPE
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(encode_error)
    }

    fn decode(&self, data: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(data)?)
    }
}

fn encode_error(e: serde_json::Error) -> RpcError {
    RpcError::Encode(e.to_string())
}
