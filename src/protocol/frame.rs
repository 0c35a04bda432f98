//! Frame reading and writing over a byte stream.
//!
//! Each frame is two length-prefixed parts, both encoded by the negotiated
//! [`Codec`]:
//! ```text
//! ┌──────────┬──────────────┬──────────┬────────────┐
//! │ Hdr len  │ Header       │ Body len │ Body       │
//! │ u32 BE   │ codec bytes  │ u32 BE   │ codec bytes│
//! └──────────┴──────────────┴──────────┴────────────┘
//! ```
//!
//! [`FrameReader`] owns the read half and [`FrameWriter`] the write half of a
//! connection. `FrameWriter` does not serialize concurrent writers itself:
//! callers hold a connection-wide lock around [`FrameWriter::write`].

use std::io;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::header::Header;
use crate::codec::Codec;
use crate::error::{Result, RpcError};

/// Size of each length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum size of a single header or body part (100 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 100 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 8 * 1024;

/// Largest read buffer kept between frames.
const MAX_RETAINED_BUF_SIZE: usize = 1024 * 1024;

/// Read-side state: header and body reads must alternate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitingForHeader,
    WaitingForBody,
}

/// Reads frames from the read half of a connection.
pub struct FrameReader<R> {
    reader: R,
    codec: Arc<dyn Codec>,
    state: State,
    max_frame_size: u32,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader decoding with `codec`.
    pub fn new(reader: R, codec: Arc<dyn Codec>) -> Self {
        Self {
            reader,
            codec,
            state: State::WaitingForHeader,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
        }
    }

    /// Override the maximum accepted part size.
    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// The codec this reader decodes with.
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Read the next frame header.
    ///
    /// Returns `Ok(None)` on a clean end of stream at a frame boundary.
    /// Every other failure leaves the stream unusable.
    pub async fn read_header(&mut self) -> Result<Option<Header>> {
        if self.state != State::WaitingForHeader {
            return Err(RpcError::Protocol(
                "header read while a body is still pending".to_string(),
            ));
        }

        let len = match self.read_first_prefix().await? {
            Some(len) => len,
            None => return Ok(None),
        };
        self.fill(len).await?;

        // an unreadable header leaves the stream out of sync
        let header = self
            .codec
            .decode(&self.buf)
            .and_then(|value| serde_json::from_value::<Header>(value).map_err(RpcError::from))
            .map_err(|e| RpcError::Protocol(format!("unreadable frame header: {}", e)));
        self.release_oversized_buf();
        let header = header?;
        self.state = State::WaitingForBody;
        Ok(Some(header))
    }

    /// Read and decode the body that follows the last header.
    ///
    /// A [`RpcError::Decode`] here is call-scoped: the body bytes were fully
    /// consumed and the next frame can still be read.
    pub async fn read_body(&mut self) -> Result<Value> {
        self.take_body_turn()?;
        let len = self.reader.read_u32().await?;
        self.fill(len).await?;
        let body = self.codec.decode(&self.buf);
        self.release_oversized_buf();
        body
    }

    /// Skip the body that follows the last header without decoding it.
    pub async fn discard_body(&mut self) -> Result<()> {
        self.take_body_turn()?;
        let len = self.reader.read_u32().await?;
        self.check_len(len as usize)?;

        let skipped =
            tokio::io::copy(&mut (&mut self.reader).take(u64::from(len)), &mut tokio::io::sink())
                .await?;
        if skipped != u64::from(len) {
            return Err(unexpected_eof());
        }
        Ok(())
    }

    /// Consume the reader and return the underlying stream half.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn take_body_turn(&mut self) -> Result<()> {
        if self.state != State::WaitingForBody {
            return Err(RpcError::Protocol(
                "body read without a preceding header".to_string(),
            ));
        }
        self.state = State::WaitingForHeader;
        Ok(())
    }

    /// Read the header length prefix, tolerating EOF before its first byte.
    async fn read_first_prefix(&mut self) -> Result<Option<u32>> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let mut filled = 0;

        while filled < LENGTH_PREFIX_SIZE {
            let n = self.reader.read(&mut prefix[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(unexpected_eof());
            }
            filled += n;
        }

        Ok(Some(u32::from_be_bytes(prefix)))
    }

    async fn fill(&mut self, len: u32) -> Result<()> {
        let len = self.check_len(len as usize)?;
        self.buf.clear();
        self.buf.resize(len, 0);
        self.reader.read_exact(&mut self.buf[..]).await?;
        Ok(())
    }

    /// Drop a read buffer that grew past [`MAX_RETAINED_BUF_SIZE`] so one
    /// large frame does not pin its memory for the life of the connection.
    fn release_oversized_buf(&mut self) {
        if self.buf.capacity() > MAX_RETAINED_BUF_SIZE {
            self.buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        }
    }

    fn check_len(&self, len: usize) -> Result<usize> {
        if len > self.max_frame_size as usize {
            return Err(RpcError::Protocol(format!(
                "frame part of {} bytes exceeds maximum {}",
                len, self.max_frame_size
            )));
        }
        Ok(len)
    }
}

/// Writes frames to the write half of a connection.
pub struct FrameWriter {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    codec: Arc<dyn Codec>,
    max_frame_size: u32,
    closed: bool,
    buf: BytesMut,
}

impl FrameWriter {
    /// Create a writer encoding with `codec`.
    pub fn new<W>(writer: W, codec: Arc<dyn Codec>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Box::new(writer),
            codec,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            closed: false,
            buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
        }
    }

    /// Override the maximum part size this writer will emit.
    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// The codec this writer encodes with.
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Encode and write one frame.
    pub async fn write(&mut self, header: &Header, body: &Value) -> Result<()> {
        let body = self.codec.encode(body)?;
        self.write_encoded(header, &body).await
    }

    /// Write one frame whose body is already encoded with this writer's codec.
    ///
    /// Encoding failures are reported before any byte reaches the stream.
    /// A transport failure shuts the stream down; the writer is unusable
    /// afterwards and partial frames are never retried.
    pub async fn write_encoded(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        if self.closed {
            let closed = io::Error::new(io::ErrorKind::NotConnected, "frame writer is closed");
            return Err(closed.into());
        }

        let header_value =
            serde_json::to_value(header).map_err(|e| RpcError::Encode(e.to_string()))?;
        let header_bytes = self.codec.encode(&header_value)?;
        for len in [header_bytes.len(), body.len()] {
            if len > self.max_frame_size as usize {
                return Err(RpcError::Encode(format!(
                    "frame part of {} bytes exceeds maximum {}",
                    len, self.max_frame_size
                )));
            }
        }

        build_frame_into(&mut self.buf, &header_bytes, body);

        let flushed = self.flush_frame().await;
        if self.buf.capacity() > MAX_RETAINED_BUF_SIZE {
            self.buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        }
        if let Err(e) = flushed {
            tracing::warn!("Frame write failed for seq {}, closing stream: {}", header.seq, e);
            let _ = self.writer.shutdown().await;
            self.closed = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Shut down the write half. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Whether the writer was closed or failed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn flush_frame(&mut self) -> io::Result<()> {
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await
    }
}

/// Build a complete frame from pre-encoded header and body parts.
///
/// # Example
///
/// ```
/// use seqwire::protocol::{build_frame, LENGTH_PREFIX_SIZE};
///
/// let bytes = build_frame(b"hdr", b"body");
/// assert_eq!(bytes.len(), 2 * LENGTH_PREFIX_SIZE + 3 + 4);
/// assert_eq!(&bytes[..4], &[0, 0, 0, 3]);
/// ```
pub fn build_frame(header: &[u8], body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    build_frame_into(&mut buf, header, body);
    buf.to_vec()
}

fn build_frame_into(buf: &mut BytesMut, header: &[u8], body: &[u8]) {
    buf.clear();
    buf.reserve(2 * LENGTH_PREFIX_SIZE + header.len() + body.len());
    buf.put_u32(header.len() as u32);
    buf.put_slice(header);
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
}

fn unexpected_eof() -> RpcError {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed inside a frame").into()
}
