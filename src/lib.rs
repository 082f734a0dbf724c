//! # dosimeter-link
//!
//! Async BLE client for a radiation-detector peripheral.
//!
//! The peripheral speaks a framed request/response protocol over two GATT
//! characteristics: requests are written in small chunks to one, responses arrive
//! as notifications on the other. This crate turns that into awaitable calls.
//!
//! ## Architecture
//!
//! - **Protocol**: length-prefixed frames, 4-byte headers, rolling sequence byte,
//!   response reassembly
//! - **Session**: connection state machine, single-flight request slot, timeouts,
//!   chunked sequential writer
//! - **Control**: handshake run once per connection
//! - **Codec**: decoders for data-buffer records, spectra, and calibration
//!
//! The platform BLE stack plugs in through [`transport::Transport`] and a stream of
//! [`transport::TransportEvent`]s.
//!
//! ## Example
//!
//! ```ignore
//! use dosimeter_link::ClientBuilder;
//!
//! let client = ClientBuilder::new().connect(transport, events).await?;
//!
//! if let Some(reading) = client.real_time_data().await? {
//!     println!("{} µSv/h", reading.dose_rate);
//! }
//! let spectrum = client.spectrum().await?;
//! println!("{} counts in {} s", spectrum.total_counts(), spectrum.duration_secs);
//! ```

pub mod codec;
pub mod control;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

mod client;
mod writer;

pub use client::{ClientBuilder, DeviceClient};
pub use error::{LinkError, Result};
pub use session::{ConnectionState, Session, SessionConfig};
