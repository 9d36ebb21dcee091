//! Message framing for peer connections.
//!
//! # Frame Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┐
//! │ Length (4 bytes)│ CRC32 (4 bytes)  │ Payload (Length bytes)  │
//! └─────────────────┴──────────────────┴─────────────────────────┘
//! ```
//!
//! Both header fields are big-endian. The checksum covers the payload only.

use crc32fast::Hasher;
use gink_core::Error;

/// Size of the frame header in bytes
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest payload a peer may send
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Declared payload length exceeds [`MAX_FRAME_LEN`]
    #[error("Frame too large: {0} bytes")]
    TooLarge(usize),

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame
        expected: u32,
        /// Checksum of the received payload
        computed: u32,
    },
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::ProtocolError(e.to_string())
    }
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Wrap `payload` in a frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&compute_crc(payload).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Reassembles frames from a byte stream that arrives in arbitrary pieces.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete payload, if one has fully arrived.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&self.buffer[0..4]);
        let length = u32::from_be_bytes(len_bytes) as usize;
        if length > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(length));
        }
        if self.buffer.len() < FRAME_HEADER_LEN + length {
            return Ok(None);
        }
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&self.buffer[4..8]);
        let expected = u32::from_be_bytes(crc_bytes);

        let payload = self.buffer[FRAME_HEADER_LEN..FRAME_HEADER_LEN + length].to_vec();
        self.buffer.drain(..FRAME_HEADER_LEN + length);

        let computed = compute_crc(&payload);
        if computed != expected {
            return Err(FrameError::ChecksumMismatch { expected, computed });
        }
        Ok(Some(payload))
    }
}
