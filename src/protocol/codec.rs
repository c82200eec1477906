//! Length-prefixed JSON codec for client sessions.
//!
//! Every message on the wire is one frame: a 4-byte big-endian unsigned
//! payload length followed by exactly that many bytes of UTF-8 JSON. The
//! decoder enforces a configurable maximum payload length so a garbled or
//! malicious length prefix cannot trigger an unbounded allocation.
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Size of the length prefix preceding every payload.
const LEN_PREFIX_BYTES: usize = 4;

/// Default maximum frame payload accepted by the decoder: 1 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1_048_576;

/// Length-prefixed JSON codec for bidirectional session streams.
///
/// # Decoder
///
/// Decoding is all-or-nothing: `decode` returns `Ok(None)` until a complete
/// frame (prefix plus payload) is buffered, then parses the payload as UTF-8
/// JSON. A declared length above the configured maximum, or a payload that
/// is not valid UTF-8 JSON, returns [`AppError::Frame`] — partial frames are
/// never surfaced to callers. Leftover bytes at EOF (a peer that closed
/// mid-frame) are also an [`AppError::Frame`].
///
/// # Encoder
///
/// Outbound JSON values are serialised compactly and written as
/// `len || payload`. The max-length limit is a decoder-side concern and is
/// not enforced during encoding.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    /// Create a codec with the default [`DEFAULT_MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec with an explicit maximum payload length.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = serde_json::Value;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LEN_PREFIX_BYTES {
            return Ok(None);
        }

        let mut prefix = [0u8; LEN_PREFIX_BYTES];
        prefix.copy_from_slice(&src[..LEN_PREFIX_BYTES]);
        let declared = usize::try_from(u32::from_be_bytes(prefix))
            .map_err(|_| AppError::Frame("declared frame length does not fit usize".into()))?;

        // Reject before reserving: the prefix alone is enough to detect the
        // violation, and no further bytes are consumed from the stream.
        if declared > self.max_frame_bytes {
            return Err(AppError::Frame(format!(
                "declared frame length {declared} exceeds maximum {}",
                self.max_frame_bytes
            )));
        }

        if src.len() < LEN_PREFIX_BYTES + declared {
            src.reserve(LEN_PREFIX_BYTES + declared - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX_BYTES);
        let payload = src.split_to(declared);

        let value = serde_json::from_slice(&payload)
            .map_err(|err| AppError::Frame(format!("invalid frame payload: {err}")))?;

        Ok(Some(value))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(AppError::Frame(format!(
                "stream closed mid-frame with {} buffered byte(s)",
                src.len()
            ))),
        }
    }
}

impl Encoder<serde_json::Value> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: serde_json::Value, dst: &mut BytesMut) -> Result<()> {
        let payload = serde_json::to_vec(&item)
            .map_err(|err| AppError::Frame(format!("failed to serialise frame: {err}")))?;

        let declared = u32::try_from(payload.len())
            .map_err(|_| AppError::Frame("frame payload exceeds u32 length prefix".into()))?;

        dst.reserve(LEN_PREFIX_BYTES + payload.len());
        dst.put_u32(declared);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
