//! Newline-delimited message framing.
//!
//! TCP delivers a byte stream with no message boundaries: one read may carry
//! half a message, or three and a half. [`FrameCodec`] buffers arbitrary
//! chunks across calls and splits on the delimiter byte, so no byte is ever
//! dropped or duplicated across chunk boundaries and no partial frame is
//! ever handed to the parser. A completed frame that fails to parse is
//! surfaced as an error entry; the caller logs it and carries on with the
//! buffer and connection unaffected.

use crate::error::{Error, Result};
use crate::protocol::ProtocolMessage;

/// Frame delimiter: a single line-feed byte.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Incremental decoder for the newline-delimited wire format.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: Vec<u8>,
}

impl FrameCodec {
    /// Create an empty codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of received bytes; returns every frame completed by it,
    /// in arrival order. Parse failures are returned in place so the caller
    /// can log and continue with the following frames.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<ProtocolMessage>> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == FRAME_DELIMITER) {
            let frame: Vec<u8> = self.buf.drain(..=pos).collect();
            let frame = &frame[..frame.len() - 1];
            if frame.is_empty() {
                continue;
            }
            frames.push(
                serde_json::from_slice(frame).map_err(|e| Error::MalformedFrame(e.to_string())),
            );
        }
        frames
    }

    /// Number of buffered bytes still awaiting a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Encode a message into its wire form: JSON plus the delimiter.
    pub fn encode(message: &ProtocolMessage) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(message)
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;
        bytes.push(FRAME_DELIMITER);
        Ok(bytes)
    }
}
