//! Codec module - decoders for virtual-string payloads.
//!
//! - [`decode_realtime`] - walks the rolling data buffer and returns the newest
//!   realtime reading
//! - [`SpectrumData`] - accumulated spectrum with calibration math
//! - [`EnergyCalibration`] - the calibration coefficients alone
//!
//! # Design
//!
//! Decoders are pure functions over byte slices. They never touch the session, so
//! they can be fed payloads captured elsewhere.
//!
//! # Example
//!
//! ```
//! use dosimeter_link::codec::{EnergyCalibration, SpectrumData};
//!
//! let mut payload = Vec::new();
//! payload.extend_from_slice(&60i32.to_le_bytes());
//! for coefficient in [0.0f32, 3.0, 0.0] {
//!     payload.extend_from_slice(&coefficient.to_le_bytes());
//! }
//! for count in [5u32, 6, 7] {
//!     payload.extend_from_slice(&count.to_le_bytes());
//! }
//!
//! let spectrum = SpectrumData::decode(&payload).unwrap();
//! assert_eq!(spectrum.total_counts(), 18);
//! assert_eq!(spectrum.energy(2.0), 6.0);
//! assert_eq!(spectrum.calibration, EnergyCalibration::new(0.0, 3.0, 0.0));
//! ```

mod databuf;
mod spectrum;

pub use databuf::{
    decode_realtime, decode_realtime_at, reference_time, RealTimeData, RECORD_PREFIX_SIZE,
    REFERENCE_SKEW_SECS,
};
pub use spectrum::{EnergyCalibration, SpectrumData, DEFAULT_CHANNELS};
