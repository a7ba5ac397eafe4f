//! Newline-delimited framing.

use serde::Serialize;
use thiserror::Error;

/// Byte terminating every frame.
pub const DELIMITER: u8 = b'\n';
/// Size of a single read from the channel.
pub const READ_CHUNK_BYTES: usize = 4096;
/// Largest frame accepted before the connection buffer is discarded.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Framing and serialisation failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A frame grew beyond [`MAX_FRAME_BYTES`] without a delimiter.
    #[error("frame of {size} bytes exceeds {limit} byte limit")]
    FrameTooLarge {
        /// Bytes buffered without a delimiter.
        size: usize,
        /// Configured frame limit.
        limit: usize,
    },
    /// A frame was not a valid JSON request.
    #[error("malformed message: {message}")]
    Malformed {
        /// Why the frame was rejected.
        message: String,
        /// JSON error, when parsing failed.
        #[source]
        source: Option<serde_json::Error>,
    },
    /// Serialising an outbound message failed.
    #[error("failed to serialise message: {0}")]
    Serialise(#[from] serde_json::Error),
}

impl CodecError {
    /// Wraps a JSON parse failure.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::Malformed {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Builds a malformed-message error with a custom description.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
            source: None,
        }
    }
}

/// Per-connection reassembly buffer.
///
/// Bytes are appended as they arrive; [`FrameBuffer::next_frame`] yields each
/// complete frame without its delimiter. Blank frames are skipped.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    scanned: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a frame.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Removes and returns the next complete frame.
    ///
    /// Returns `Ok(None)` when no delimiter has arrived yet. When the
    /// unterminated tail exceeds [`MAX_FRAME_BYTES`] the buffer is cleared and
    /// [`CodecError::FrameTooLarge`] is returned.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        loop {
            let Some(offset) = self
                .pending
                .get(self.scanned..)
                .and_then(|tail| tail.iter().position(|byte| *byte == DELIMITER))
            else {
                self.scanned = self.pending.len();
                return self.check_limit(self.pending.len()).map(|()| None);
            };

            let end = self.scanned + offset;
            self.scanned = 0;
            let mut frame: Vec<u8> = self.pending.drain(..=end).collect();
            frame.pop();
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }
            if frame.len() > MAX_FRAME_BYTES {
                return Err(CodecError::FrameTooLarge {
                    size: frame.len(),
                    limit: MAX_FRAME_BYTES,
                });
            }
            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(frame));
        }
    }

    fn check_limit(&mut self, size: usize) -> Result<(), CodecError> {
        if size > MAX_FRAME_BYTES {
            self.pending.clear();
            self.scanned = 0;
            return Err(CodecError::FrameTooLarge {
                size,
                limit: MAX_FRAME_BYTES,
            });
        }
        Ok(())
    }
}

/// Serialises `message` as compact JSON followed by the delimiter.
///
/// # Errors
///
/// Returns [`CodecError::Serialise`] if the message cannot be serialised.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(DELIMITER);
    Ok(bytes)
}
