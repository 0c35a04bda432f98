//! Codec registry for selecting a codec from the handshake.
//!
//! The registry is built once at startup, then shared read-only behind an
//! `Arc` by every connection that needs to resolve a codec type.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Codec, JsonCodec, MsgPackCodec};

/// Map of codec type identifiers to codec implementations.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in MsgPack and JSON codecs.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MsgPackCodec));
        registry.register(Arc::new(JsonCodec));
        registry
    }

    /// Register a codec under its own [`Codec::codec_type`].
    ///
    /// Replaces any codec previously registered under the same type.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> &mut Self {
        self.codecs.insert(codec.codec_type().to_string(), codec);
        self
    }

    /// Look up a codec by type identifier.
    pub fn get(&self, codec_type: &str) -> Option<Arc<dyn Codec>> {
        self.codecs.get(codec_type).cloned()
    }

    /// Check whether a codec type is registered.
    pub fn contains(&self, codec_type: &str) -> bool {
        self.codecs.contains_key(codec_type)
    }

    /// Registered codec types, sorted.
    pub fn codec_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.codec_types())
            .finish()
    }
}
