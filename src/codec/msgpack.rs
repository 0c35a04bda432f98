//! MsgPack codec using `rmp-serde`.
//!
//! Always uses `to_vec_named` so maps keep their field names on the wire and
//! a [`serde_json::Value`] survives the trip unchanged.

use serde_json::Value;

use super::{Codec, MSGPACK_TYPE};
use crate::error::Result;

/// MessagePack codec for structured data.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn codec_type(&self) -> &str {
        MSGPACK_TYPE
    }

    #[inline]
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    fn decode(&self, data: &[u8]) -> Result<Value> {
        Ok(rmp_serde::from_slice(data)?)
    }
}
