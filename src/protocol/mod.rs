//! Protocol module - handshake, frame header and framing.
//!
//! A connection carries one handshake line followed by any number of frames:
//! - [`Handshake`] selects the codec (fixed JSON encoding)
//! - [`Header`] identifies one request/response exchange
//! - [`FrameReader`] / [`FrameWriter`] move header+body frames over the stream

mod frame;
mod handshake;
mod header;

pub use frame::{build_frame, FrameReader, FrameWriter, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
pub use handshake::{read_handshake, write_handshake, Handshake, MAGIC_NUMBER, MAX_HANDSHAKE_LEN};
pub use header::{split_service_method, Header, NO_CALL_SEQ};
