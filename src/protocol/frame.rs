//! Request frames and response messages.
//!
//! A [`RequestFrame`] is built once per call and never mutated. The reply comes
//! back as a [`Response`] once the reassembler has collected the whole message.
//!
//! # Example
//!
//! ```
//! use dosimeter_link::protocol::{build_request, opcode};
//!
//! let frame = build_request(opcode::RD_VIRT_STRING, 5, &[0x00, 0x02, 0x00, 0x00]);
//! assert_eq!(frame.len(), 4 + 4 + 4);
//! assert_eq!(frame.header().sequence, 0x85);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{Header, HEADER_SIZE, LENGTH_PREFIX_SIZE};

/// A complete, immutable request frame (length prefix + header + arguments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    header: Header,
    bytes: Bytes,
}

impl RequestFrame {
    /// Header placed in the frame; the reply must echo it exactly.
    #[inline]
    pub fn header(&self) -> Header {
        self.header
    }

    /// Full on-wire bytes.
    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Argument bytes after the header.
    #[inline]
    pub fn args(&self) -> &[u8] {
        &self.bytes[LENGTH_PREFIX_SIZE + HEADER_SIZE..]
    }

    /// Total on-wire length.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Cheap clone of the wire bytes.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Build a request frame for `opcode` using the given counter value.
pub fn build_request(opcode: u16, counter: u8, args: &[u8]) -> RequestFrame {
    let header = Header::request(opcode, counter);
    RequestFrame {
        header,
        bytes: encode_message(&header, args),
    }
}

/// Build a response frame carrying `payload` under `header`.
///
/// Responses share the request shape; fakes and tests use this to answer requests.
pub fn encode_response(header: &Header, payload: &[u8]) -> Bytes {
    encode_message(header, payload)
}

fn encode_message(header: &Header, body: &[u8]) -> Bytes {
    let message_len = HEADER_SIZE + body.len();
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + message_len);
    buf.put_u32_le(message_len as u32);
    buf.put_slice(&header.encode());
    buf.put_slice(body);
    buf.freeze()
}

/// A reassembled response message (header + payload, length prefix removed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes after the header.
    pub payload: Bytes,
}

impl Response {
    /// Split a complete message into header and payload.
    ///
    /// Returns `None` if the message cannot hold a header.
    pub fn from_message(message: Bytes) -> Option<Self> {
        let header = Header::decode(&message)?;
        Some(Self {
            header,
            payload: message.slice(HEADER_SIZE..),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::opcode;

    #[test]
    fn test_build_request_layout() {
        let frame = build_request(opcode::SET_EXCHANGE, 0, &[0x01, 0xFF, 0x12, 0xFF]);

        assert_eq!(
            &frame.bytes()[..],
            &[0x08, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x80, 0x01, 0xFF, 0x12, 0xFF]
        );
    }

    #[test]
    fn test_build_request_roundtrip() {
        let args: Vec<u8> = (0..=40).collect();
        let frame = build_request(0x1234, 9, &args);

        let declared = u32::from_le_bytes(frame.bytes()[..4].try_into().unwrap()) as usize;
        assert_eq!(declared, frame.len() - LENGTH_PREFIX_SIZE);

        let response = Response::from_message(frame.bytes().slice(LENGTH_PREFIX_SIZE..)).unwrap();
        assert_eq!(response.header.opcode, 0x1234);
        assert_eq!(response.header.sequence, 0x89);
        assert_eq!(&response.payload[..], &args[..]);
        assert_eq!(frame.args(), &args[..]);
    }

    #[test]
    fn test_build_request_empty_args() {
        let frame = build_request(opcode::SET_TIME, 31, &[]);
        assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + HEADER_SIZE);
        assert!(frame.args().is_empty());
        assert_eq!(frame.header().sequence, 0x9F);
    }

    #[test]
    fn test_encode_response_matches_request_shape() {
        let header = Header::request(opcode::WR_VIRT_SFR, 2);
        let bytes = encode_response(&header, &[1, 0, 0, 0]);
        assert_eq!(&bytes[..4], &8u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &header.encode());
        assert_eq!(&bytes[8..], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_response_too_short() {
        assert!(Response::from_message(Bytes::from_static(&[0x07, 0x00])).is_none());
    }
}
