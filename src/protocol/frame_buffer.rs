//! Response reassembly from notification chunks.
//!
//! Implements a state machine over the inbound notification stream:
//! - `WaitingForLength`: need the 4-byte length prefix (it may itself be split)
//! - `Accumulating`: length known, appending until the message is complete
//!
//! Notification sizes carry no meaning; a chunk may end anywhere, including inside
//! the length field.
//!
//! # Example
//!
//! ```
//! use dosimeter_link::protocol::ResponseAssembler;
//!
//! let mut assembler = ResponseAssembler::new();
//! assert!(assembler.push(&[6, 0, 0, 0, 0x26, 0x08]).unwrap().is_none());
//! let message = assembler.push(&[0x00, 0x81, 0xAA, 0xBB]).unwrap().unwrap();
//! assert_eq!(&message[..], &[0x26, 0x08, 0x00, 0x81, 0xAA, 0xBB]);
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::LENGTH_PREFIX_SIZE;
use crate::error::{LinkError, Result};

/// Default cap on a single response message.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the complete length prefix.
    WaitingForLength,
    /// Length parsed, waiting for `expected` message bytes.
    Accumulating { expected: usize },
}

/// Accumulator for one response at a time.
pub struct ResponseAssembler {
    buffer: BytesMut,
    state: State,
    max_response_size: usize,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::with_max_response(DEFAULT_MAX_RESPONSE_SIZE)
    }

    /// Create an assembler rejecting declared lengths above `max_response_size`.
    pub fn with_max_response(max_response_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            state: State::WaitingForLength,
            max_response_size,
        }
    }

    /// Feed one notification chunk.
    ///
    /// Returns `Ok(Some(message))` once the declared length has been collected; the
    /// message excludes the length prefix and the assembler is reset. Bytes past the
    /// declared length are discarded.
    ///
    /// # Errors
    ///
    /// `MalformedResponse` if the declared length is negative or too large. The
    /// assembler is reset before returning the error.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Bytes>> {
        self.buffer.extend_from_slice(chunk);

        if let State::WaitingForLength = self.state {
            if self.buffer.len() < LENGTH_PREFIX_SIZE {
                return Ok(None);
            }
            let prefix = self.buffer.split_to(LENGTH_PREFIX_SIZE);
            let declared = i32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
            if declared < 0 {
                self.reset();
                return Err(LinkError::malformed(format!(
                    "negative response length {}",
                    declared
                )));
            }
            let expected = declared as usize;
            if expected > self.max_response_size {
                self.reset();
                return Err(LinkError::malformed(format!(
                    "response length {} exceeds maximum {}",
                    expected, self.max_response_size
                )));
            }
            self.state = State::Accumulating { expected };
        }

        let State::Accumulating { expected } = self.state else {
            return Ok(None);
        };

        if self.buffer.len() < expected {
            return Ok(None);
        }

        let message = self.buffer.split_to(expected).freeze();
        if !self.buffer.is_empty() {
            tracing::debug!(
                "Discarding {} bytes past end of response",
                self.buffer.len()
            );
        }
        self.reset();
        Ok(Some(message))
    }

    /// Drop any partial response.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    /// Number of buffered bytes (excluding a consumed length prefix).
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing is buffered and no length has been read.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && matches!(self.state, State::WaitingForLength)
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::Accumulating { .. } => "Accumulating",
        }
    }
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self::new()
    }
}
