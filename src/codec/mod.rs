//! Codec module - body and header encoding formats.
//!
//! A [`Codec`] turns a format-independent [`serde_json::Value`] into bytes and
//! back. The trait is object-safe so the codec for a connection can be picked
//! at runtime from the handshake's codec type.
//!
//! - [`MsgPackCodec`] - MessagePack via `rmp-serde` (`application/msgpack`)
//! - [`JsonCodec`] - JSON via `serde_json` (`application/json`)
//! - [`CodecRegistry`] - codec type string to implementation lookup
//!
//! # Example
//!
//! ```
//! use seqwire::codec::{Codec, CodecRegistry, MSGPACK_TYPE};
//! use serde_json::json;
//!
//! let registry = CodecRegistry::with_defaults();
//! let codec = registry.get(MSGPACK_TYPE).unwrap();
//!
//! let encoded = codec.encode(&json!({"n": 42})).unwrap();
//! assert_eq!(codec.decode(&encoded).unwrap(), json!({"n": 42}));
//! ```

mod json;
mod msgpack;
mod registry;

use serde_json::Value;

use crate::error::Result;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
pub use registry::CodecRegistry;

/// Codec type identifier for MessagePack.
pub const MSGPACK_TYPE: &str = "application/msgpack";

/// Codec type identifier for JSON.
pub const JSON_TYPE: &str = "application/json";

/// A pluggable encoding format for frame headers and bodies.
///
/// Implementations must be stateless with respect to the stream: framing is
/// handled by [`crate::protocol::FrameReader`] and [`crate::protocol::FrameWriter`].
pub trait Codec: Send + Sync + 'static {
    /// Identifier sent in the handshake (e.g. `application/msgpack`).
    fn codec_type(&self) -> &str;

    /// Encode a value to bytes.
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode bytes to a value.
    fn decode(&self, data: &[u8]) -> Result<Value>;
}
