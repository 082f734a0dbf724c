//! Control module - the handshake run once per connection.
//!
//! After notifications are enabled, the peripheral expects three commands before
//! it serves application requests:
//!
//! 1. Exchange mode (`SET_EXCHANGE 01 FF 12 FF`)
//! 2. Wall-clock time (`SET_TIME`)
//! 3. Device-time register reset (`WR_VIRT_SFR DEVICE_TIME = 0`)
//!
//! # Example
//!
//! ```
//! use dosimeter_link::control::{InitStep, INIT_SEQUENCE};
//! use dosimeter_link::protocol::opcode;
//!
//! assert_eq!(INIT_SEQUENCE[0], InitStep::Exchange);
//! assert_eq!(INIT_SEQUENCE[2].opcode(), opcode::WR_VIRT_SFR);
//! ```

mod init;

pub use init::{check_return_code, run_init_sequence, InitStep, EXCHANGE_ARGS, INIT_SEQUENCE};
