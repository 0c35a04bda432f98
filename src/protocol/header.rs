//! Frame header.
//!
//! Every frame starts with a codec-encoded header:
//! ```text
//! { "ServiceMethod": "Service.Method", "Seq": u64, "Error": "" }
//! ```
//!
//! `Seq` correlates a response with its request. Clients assign sequence
//! numbers starting at 1; 0 never identifies a call.

use serde::{Deserialize, Serialize};

/// Sequence number that never identifies a registered call.
pub const NO_CALL_SEQ: u64 = 0;

/// Decoded frame header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    /// Target method, formatted `"Service.Method"`.
    pub service_method: String,
    /// Sequence number chosen by the client.
    pub seq: u64,
    /// Empty on success, otherwise the error text of a failed call.
    #[serde(default)]
    pub error: String,
}

impl Header {
    /// Create a request header with an empty error.
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// Check if this header reports a failed call.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Split `"Service.Method"` at the last dot.
    ///
    /// Returns `None` when either side would be empty.
    pub fn service_and_method(&self) -> Option<(&str, &str)> {
        split_service_method(&self.service_method)
    }
}

/// Split a `"Service.Method"` name at the last dot.
///
/// Returns `None` when either side would be empty.
pub fn split_service_method(name: &str) -> Option<(&str, &str)> {
    let (service, method) = name.rsplit_once('.')?;
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service, method))
}
