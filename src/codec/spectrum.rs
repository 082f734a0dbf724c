//! Spectrum and energy-calibration decoding.
//!
//! Spectrum payload layout:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────────────────┐
//! │ Duration │ a0       │ a1       │ a2       │ Counts               │
//! │ int32 LE │ f32 LE   │ f32 LE   │ f32 LE   │ uint32 LE × channels │
//! └──────────┴──────────┴──────────┴──────────┴──────────────────────┘
//! ```
//! The calibration payload is the three coefficients alone.

use bytes::Buf;
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Below this magnitude the quadratic term is treated as absent.
const QUADRATIC_EPSILON: f64 = 1e-9;

/// Channel count of the peripheral's spectrometer.
pub const DEFAULT_CHANNELS: usize = 1024;

const CALIBRATION_SIZE: usize = 12;
const SPECTRUM_HEADER_SIZE: usize = 4 + CALIBRATION_SIZE;

/// Polynomial channel → energy mapping, in keV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyCalibration {
    /// Offset.
    pub a0: f32,
    /// Linear term.
    pub a1: f32,
    /// Quadratic term.
    pub a2: f32,
}

impl EnergyCalibration {
    pub fn new(a0: f32, a1: f32, a2: f32) -> Self {
        Self { a0, a1, a2 }
    }

    /// Decode a calibration payload.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < CALIBRATION_SIZE {
            return Err(LinkError::malformed(format!(
                "calibration payload is {} bytes, need {}",
                buf.remaining(),
                CALIBRATION_SIZE
            )));
        }
        Ok(Self::read(&mut buf))
    }

    fn read(buf: &mut &[u8]) -> Self {
        Self {
            a0: buf.get_f32_le(),
            a1: buf.get_f32_le(),
            a2: buf.get_f32_le(),
        }
    }

    /// Energy (keV) at a (possibly fractional) channel.
    pub fn energy(&self, channel: f64) -> f64 {
        let (a0, a1, a2) = self.coefficients();
        a0 + a1 * channel + a2 * channel * channel
    }

    /// Channel for an energy, clamped to `[0, num_channels - 1]`.
    ///
    /// # Example
    ///
    /// ```
    /// use dosimeter_link::codec::EnergyCalibration;
    ///
    /// let calibration = EnergyCalibration::new(0.0, 1.0, 0.0);
    /// assert_eq!(calibration.channel_for_energy(500.0, 1024), 500.0);
    /// assert_eq!(calibration.channel_for_energy(5000.0, 1024), 1023.0);
    /// ```
    pub fn channel_for_energy(&self, energy: f64, num_channels: usize) -> f64 {
        let (a0, a1, a2) = self.coefficients();

        let channel = if a2.abs() < QUADRATIC_EPSILON {
            linear_channel(a0, a1, energy)
        } else {
            let discriminant = a1 * a1 - 4.0 * a2 * (a0 - energy);
            if discriminant < 0.0 {
                linear_channel(a0, a1, energy)
            } else {
                (-a1 + discriminant.sqrt()) / (2.0 * a2)
            }
        };

        let max = num_channels.saturating_sub(1) as f64;
        if channel.is_nan() {
            return 0.0;
        }
        channel.clamp(0.0, max)
    }

    fn coefficients(&self) -> (f64, f64, f64) {
        (f64::from(self.a0), f64::from(self.a1), f64::from(self.a2))
    }
}

fn linear_channel(a0: f64, a1: f64, energy: f64) -> f64 {
    if a1 == 0.0 {
        return 0.0;
    }
    (energy - a0) / a1
}

/// Accumulated gamma spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumData {
    /// Accumulation time in seconds.
    pub duration_secs: i32,
    /// Channel → energy calibration.
    pub calibration: EnergyCalibration,
    /// Counts per channel.
    pub counts: Vec<u32>,
}

impl SpectrumData {
    /// Decode a spectrum payload. Trailing bytes short of a full channel are ignored.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < SPECTRUM_HEADER_SIZE {
            return Err(LinkError::malformed(format!(
                "spectrum payload is {} bytes, need at least {}",
                buf.remaining(),
                SPECTRUM_HEADER_SIZE
            )));
        }

        let duration_secs = buf.get_i32_le();
        let calibration = EnergyCalibration::read(&mut buf);

        let channels = buf.remaining() / 4;
        let mut counts = Vec::with_capacity(channels);
        for _ in 0..channels {
            counts.push(buf.get_u32_le());
        }

        Ok(Self {
            duration_secs,
            calibration,
            counts,
        })
    }

    /// Number of channels.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.counts.len()
    }

    /// Sum of all channel counts.
    pub fn total_counts(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    /// Energy (keV) at a channel.
    pub fn energy(&self, channel: f64) -> f64 {
        self.calibration.energy(channel)
    }

    /// Channel for an energy, clamped to this spectrum's channel range.
    pub fn channel_for_energy(&self, energy: f64) -> f64 {
        self.calibration
            .channel_for_energy(energy, self.num_channels())
    }

    /// Sum of counts between two energies (keV), inclusive of both end channels.
    ///
    /// Bounds may be given in either order; fractional channels are truncated.
    pub fn counts_in_window(&self, energy_a: f64, energy_b: f64) -> u64 {
        if self.counts.is_empty() {
            return 0;
        }
        let a = self.channel_for_energy(energy_a) as usize;
        let b = self.channel_for_energy(energy_b) as usize;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let hi = hi.min(self.counts.len() - 1);

        self.counts[lo..=hi].iter().map(|&c| u64::from(c)).sum()
    }
}
