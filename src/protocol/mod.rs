//! Protocol module - wire format, request framing, and response reassembly.
//!
//! This module implements the peripheral's framed command protocol:
//! - 4-byte length prefix + 4-byte header encoding/decoding
//! - Argument packers for fixed-layout payloads
//! - Response assembler for notification chunks

mod args;
mod frame;
mod frame_buffer;
mod wire_format;

pub use args::{pack_local_time, pack_register_write, pack_u32};
pub use frame::{build_request, encode_response, RequestFrame, Response};
pub use frame_buffer::{ResponseAssembler, DEFAULT_MAX_RESPONSE_SIZE};
pub use wire_format::{
    opcode, sequence_byte, virt_string, vsfr, Header, SequenceCounter, HEADER_SIZE,
    LENGTH_PREFIX_SIZE, RETURN_CODE_OK, SEQUENCE_MASK, SEQUENCE_REQUEST_BIT,
};
