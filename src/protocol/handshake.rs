//! Capability negotiation sent once per connection, before any frame.
//!
//! The handshake is a single line of JSON, independent of the negotiated
//! codec because it is what selects the codec:
//! ```text
//! {"MagicNumber":3927900,"CodecType":"application/msgpack"}\n
//! ```
//!
//! # Example
//!
//! ```
//! use seqwire::protocol::{Handshake, MAGIC_NUMBER};
//!
//! let line = Handshake::new("application/msgpack").encode().unwrap();
//! assert!(line.ends_with('\n'));
//! assert!(line.contains(&MAGIC_NUMBER.to_string()));
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};

/// Magic constant identifying a seqwire peer.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Maximum accepted length of the handshake line, newline included.
pub const MAX_HANDSHAKE_LEN: usize = 1024;

/// The capability-negotiation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Handshake {
    /// Must equal [`MAGIC_NUMBER`].
    pub magic_number: u32,
    /// Codec type used for every frame that follows.
    pub codec_type: String,
}

impl Handshake {
    /// Create a handshake with the correct magic number.
    pub fn new(codec_type: impl Into<String>) -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: codec_type.into(),
        }
    }

    /// Encode as one JSON line terminated by `\n`.
    pub fn encode(&self) -> Result<String> {
        let mut line = serde_json::to_string(self).map_err(|e| RpcError::Encode(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    /// Check the magic number.
    pub fn validate(&self) -> Result<()> {
        if self.magic_number != MAGIC_NUMBER {
            return Err(RpcError::Handshake(format!(
                "invalid magic number {:#x}",
                self.magic_number
            )));
        }
        Ok(())
    }
}

/// Write a handshake line and flush it.
pub async fn write_handshake<W>(writer: &mut W, handshake: &Handshake) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let line = handshake.encode()?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one handshake line.
///
/// Reads exactly up to and including the newline, so the buffered reader can
/// be handed on to a [`crate::protocol::FrameReader`] without losing frame
/// bytes. The magic number is not checked here; see [`Handshake::validate`].
pub async fn read_handshake<R>(reader: &mut R) -> Result<Handshake>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader
        .take(MAX_HANDSHAKE_LEN as u64)
        .read_line(&mut line)
        .await
        .map_err(|e| RpcError::Handshake(format!("unreadable handshake: {}", e)))?;

    if n == 0 {
        return Err(RpcError::Handshake(
            "connection closed before handshake".to_string(),
        ));
    }
    if !line.ends_with('\n') {
        return Err(RpcError::Handshake(format!(
            "handshake line missing or longer than {} bytes",
            MAX_HANDSHAKE_LEN
        )));
    }

    serde_json::from_str(line.trim_end())
        .map_err(|e| RpcError::Handshake(format!("malformed handshake: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_encode_format() {
        let line = Handshake::new("application/json").encode().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();

        assert_eq!(parsed["MagicNumber"], 0x3bef5c);
        assert_eq!(parsed["CodecType"], "application/json");
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_validate_magic() {
        assert!(Handshake::new("x").validate().is_ok());

        let bad = Handshake {
            magic_number: 0xdead,
            codec_type: "x".to_string(),
        };
        let err = bad.validate().unwrap_err();
        assert!(matches!(err, RpcError::Handshake(_)));
        assert!(err.to_string().contains("0xdead"));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let mut buf = Vec::new();
        write_handshake(&mut buf, &Handshake::new("application/msgpack"))
            .await
            .unwrap();

        let mut reader = BufReader::new(&buf[..]);
        let handshake = read_handshake(&mut reader).await.unwrap();
        assert_eq!(handshake, Handshake::new("application/msgpack"));
    }

    #[tokio::test]
    async fn test_read_leaves_following_bytes() {
        let mut data = Handshake::new("application/msgpack").encode().unwrap().into_bytes();
        data.extend_from_slice(b"\x00\x00\x00\x01frame");

        let mut reader = BufReader::new(&data[..]);
        read_handshake(&mut reader).await.unwrap();

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"\x00\x00\x00\x01frame");
    }

    #[tokio::test]
    async fn test_read_empty_stream() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(matches!(read_handshake(&mut reader).await, Err(RpcError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_read_overlong_line() {
        let data = vec![b' '; MAX_HANDSHAKE_LEN + 10];
        let mut reader = BufReader::new(&data[..]);
        let err = read_handshake(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("longer than"));
    }

    #[tokio::test]
    async fn test_read_malformed_json() {
        let mut reader = BufReader::new(&b"{\"MagicNumber\": \n"[..]);
        let err = read_handshake(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }
}
