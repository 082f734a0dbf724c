//! Wire format encoding and decoding.
//!
//! Every frame is a length prefix followed by a 4-byte header:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬───────────┐
//! │ Length   │ Opcode   │ Reserved │ Sequence │ Arguments │
//! │ 4 bytes  │ 2 bytes  │ 1 byte   │ 1 byte   │ N bytes   │
//! │ uint32 LE│ uint16 LE│ 0x00     │ 0x80|seq │           │
//! └──────────┴──────────┴──────────┴──────────┴───────────┘
//! ```
//!
//! The length counts header + arguments, not itself. Responses use the same shape.
//! All multi-byte integers are Little Endian.

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Header size in bytes (opcode + reserved + sequence).
pub const HEADER_SIZE: usize = 4;

/// Bit marking a sequence byte as belonging to a request.
pub const SEQUENCE_REQUEST_BIT: u8 = 0x80;

/// Mask for the rolling sequence counter.
pub const SEQUENCE_MASK: u8 = 0x1F;

/// Command opcodes understood by the peripheral.
pub mod opcode {
    /// Set the data-exchange mode. First command of every session.
    pub const SET_EXCHANGE: u16 = 0x0007;
    /// Write a virtual special-function register.
    pub const WR_VIRT_SFR: u16 = 0x0825;
    /// Read a virtual string.
    pub const RD_VIRT_STRING: u16 = 0x0826;
    /// Set the device wall clock.
    pub const SET_TIME: u16 = 0x0A04;

    /// Human-readable name for logging.
    pub fn name(opcode: u16) -> &'static str {
        match opcode {
            SET_EXCHANGE => "SET_EXCHANGE",
            WR_VIRT_SFR => "WR_VIRT_SFR",
            RD_VIRT_STRING => "RD_VIRT_STRING",
            SET_TIME => "SET_TIME",
            _ => "UNKNOWN",
        }
    }
}

/// Virtual string identifiers.
pub mod virt_string {
    /// Rolling data buffer (realtime records and friends).
    pub const DATA_BUF: u32 = 0x100;
    /// Current accumulated spectrum.
    pub const SPECTRUM: u32 = 0x200;
    /// Energy calibration coefficients.
    pub const ENERGY_CALIB: u32 = 0x202;
}

/// Virtual special-function register addresses.
pub mod vsfr {
    /// Device time register.
    pub const DEVICE_TIME: u32 = 0x0504;
}

/// Return code the peripheral uses for success.
pub const RETURN_CODE_OK: u32 = 1;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Command opcode.
    pub opcode: u16,
    /// Sequence byte (request bit + 5-bit counter).
    pub sequence: u8,
}

impl Header {
    /// Create a request header for the given counter value.
    pub fn request(opcode: u16, counter: u8) -> Self {
        Self {
            opcode,
            sequence: sequence_byte(counter),
        }
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use dosimeter_link::protocol::Header;
    ///
    /// let header = Header::request(0x0826, 3);
    /// assert_eq!(header.encode(), [0x26, 0x08, 0x00, 0x83]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let op = self.opcode.to_le_bytes();
        [op[0], op[1], 0x00, self.sequence]
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short. The reserved byte is not checked.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            opcode: u16::from_le_bytes([buf[0], buf[1]]),
            sequence: buf[3],
        })
    }

    /// The 5-bit counter carried in the sequence byte.
    #[inline]
    pub fn counter(&self) -> u8 {
        self.sequence & SEQUENCE_MASK
    }
}

/// Compute the on-wire sequence byte for a counter value.
#[inline]
pub fn sequence_byte(counter: u8) -> u8 {
    SEQUENCE_REQUEST_BIT | (counter & SEQUENCE_MASK)
}

/// Rolling 5-bit request counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter(u8);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(0)
    }

    /// Current value.
    #[inline]
    pub fn current(&self) -> u8 {
        self.0
    }

    /// Return the current value and advance (mod 32).
    pub fn advance(&mut self) -> u8 {
        let value = self.0;
        self.0 = (self.0 + 1) & SEQUENCE_MASK;
        value
    }
}
