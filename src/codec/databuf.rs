//! Data-buffer stream decoder.
//!
//! The data buffer is a back-to-back sequence of records. Each record starts with a
//! 7-byte prefix:
//! ```text
//! ┌──────────┬──────────┬──────────┬────────────────────┐
//! │ Seq      │ Entity   │ Group    │ Time offset        │
//! │ 1 byte   │ 1 byte   │ 1 byte   │ int32 LE, 10 ms    │
//! └──────────┴──────────┴──────────┴────────────────────┘
//! ```
//! followed by a body whose layout depends on `(entity, group)`. Only realtime
//! records are materialized; everything else is skipped by exact length. An
//! unknown `(entity, group)` pair ends decoding, since nothing past it can be
//! located.

use bytes::Buf;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Record prefix size (seq + entity + group + offset).
pub const RECORD_PREFIX_SIZE: usize = 7;

/// Forward skew between host time and the peripheral's clock convention.
pub const REFERENCE_SKEW_SECS: i64 = 128;

/// Realtime record body size.
const REALTIME_BODY_SIZE: usize = 15;

/// Sample-block sub-header (u16 count + u32 sample time).
const SAMPLE_BLOCK_HEADER_SIZE: usize = 6;

/// Decoded realtime reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealTimeData {
    /// Absolute time of the reading.
    pub timestamp: DateTime<Utc>,
    /// Counts per second.
    pub count_rate: f32,
    /// Dose rate as reported by the device.
    pub dose_rate: f32,
    /// Count-rate error in percent.
    pub count_rate_err: f32,
    /// Dose-rate error in percent.
    pub dose_rate_err: f32,
    /// Device state bits.
    pub flags: u16,
    /// Realtime-specific flag bits.
    pub real_time_flags: u8,
}

/// Body layout for one `(entity, group)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    RealTime,
    Fixed(usize),
    /// Sample count prefixed block; per-sample size given.
    SampleBlock(usize),
}

fn layout_for(entity: u8, group: u8) -> Option<Layout> {
    let layout = match (entity, group) {
        (0, 0) => Layout::RealTime,
        // raw count rate + dose rate
        (0, 1) => Layout::Fixed(8),
        // dose-rate db: count, count rate, dose rate, dose err, flags
        (0, 2) => Layout::Fixed(16),
        // rare: duration, dose, temperature, charge, flags
        (0, 3) => Layout::Fixed(14),
        // user / schedule samples share the dose-rate db layout
        (0, 4) | (0, 5) => Layout::Fixed(16),
        // accelerometer x/y/z
        (0, 6) => Layout::Fixed(6),
        // event id, param, flags
        (0, 7) => Layout::Fixed(4),
        // raw count rate / raw dose rate + flags
        (0, 8) | (0, 9) => Layout::Fixed(6),
        (1, 1) => Layout::SampleBlock(8),
        (1, 2) => Layout::SampleBlock(16),
        (1, 3) => Layout::SampleBlock(14),
        _ => return None,
    };
    Some(layout)
}

/// Reference time for records decoded at `now`.
pub fn reference_time(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::seconds(REFERENCE_SKEW_SECS)
}

/// Decode the newest realtime record from a data buffer read at `now`.
///
/// Returns `None` if the buffer holds no realtime record before decoding stops.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use dosimeter_link::codec::decode_realtime;
///
/// assert!(decode_realtime(&[], Utc::now()).is_none());
/// ```
pub fn decode_realtime(buf: &[u8], now: DateTime<Utc>) -> Option<RealTimeData> {
    decode_realtime_at(buf, reference_time(now))
}

/// Decode with an explicit reference time (already skewed).
pub fn decode_realtime_at(mut buf: &[u8], reference: DateTime<Utc>) -> Option<RealTimeData> {
    let mut latest = None;
    let mut records = 0usize;

    while buf.remaining() >= RECORD_PREFIX_SIZE {
        let seq = buf.get_u8();
        let entity = buf.get_u8();
        let group = buf.get_u8();
        let offset = buf.get_i32_le();

        let Some(layout) = layout_for(entity, group) else {
            tracing::debug!(
                "Unknown record entity={} group={} (seq {}) after {} records, stopping",
                entity,
                group,
                seq,
                records
            );
            break;
        };

        match layout {
            Layout::RealTime => {
                if buf.remaining() < REALTIME_BODY_SIZE {
                    tracing::debug!("Truncated realtime record (seq {})", seq);
                    break;
                }
                let count_rate = buf.get_f32_le();
                let dose_rate = buf.get_f32_le();
                let count_rate_err = buf.get_u16_le();
                let dose_rate_err = buf.get_u16_le();
                let flags = buf.get_u16_le();
                let real_time_flags = buf.get_u8();

                latest = Some(RealTimeData {
                    timestamp: reference + Duration::milliseconds(i64::from(offset) * 10),
                    count_rate,
                    dose_rate,
                    count_rate_err: f32::from(count_rate_err) / 10.0,
                    dose_rate_err: f32::from(dose_rate_err) / 10.0,
                    flags,
                    real_time_flags,
                });
            }
            Layout::Fixed(len) => {
                if buf.remaining() < len {
                    tracing::debug!("Truncated record entity={} group={}", entity, group);
                    break;
                }
                buf.advance(len);
            }
            Layout::SampleBlock(sample_size) => {
                if buf.remaining() < SAMPLE_BLOCK_HEADER_SIZE {
                    break;
                }
                let samples = buf.get_u16_le() as usize;
                let _sample_time_ms = buf.get_u32_le();
                let len = samples * sample_size;
                if buf.remaining() < len {
                    tracing::debug!("Truncated sample block ({} samples)", samples);
                    break;
                }
                buf.advance(len);
            }
        }
        records += 1;
    }

    tracing::trace!("Data buffer walk: {} records", records);
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn prefix(buf: &mut Vec<u8>, seq: u8, entity: u8, group: u8, offset: i32) {
        buf.put_u8(seq);
        buf.put_u8(entity);
        buf.put_u8(group);
        buf.put_i32_le(offset);
    }

    fn realtime(buf: &mut Vec<u8>, seq: u8, offset: i32, count_rate: f32, dose_rate: f32) {
        prefix(buf, seq, 0, 0, offset);
        buf.put_f32_le(count_rate);
        buf.put_f32_le(dose_rate);
        buf.put_u16_le(125); // 12.5 %
        buf.put_u16_le(40); // 4.0 %
        buf.put_u16_le(0x0041);
        buf.put_u8(0x03);
    }

    #[test]
    fn test_realtime_followed_by_raw_record() {
        let mut buf = Vec::new();
        realtime(&mut buf, 1, -50, 4.5, 0.12);
        prefix(&mut buf, 2, 0, 1, -40);
        buf.put_f32_le(9.0);
        buf.put_f32_le(1.0);

        let data = decode_realtime_at(&buf, reference()).unwrap();
        assert_eq!(data.count_rate, 4.5);
        assert_eq!(data.dose_rate, 0.12);
        assert!((data.count_rate_err - 12.5).abs() < 1e-6);
        assert!((data.dose_rate_err - 4.0).abs() < 1e-6);
        assert_eq!(data.flags, 0x0041);
        assert_eq!(data.real_time_flags, 0x03);
        assert_eq!(data.timestamp, reference() - Duration::milliseconds(500));
    }

    #[test]
    fn test_last_realtime_record_wins() {
        let mut buf = Vec::new();
        realtime(&mut buf, 1, 0, 1.0, 0.1);
        prefix(&mut buf, 2, 0, 6, 5);
        buf.put_u16_le(1);
        buf.put_u16_le(2);
        buf.put_u16_le(3);
        realtime(&mut buf, 3, 100, 2.0, 0.2);

        let data = decode_realtime_at(&buf, reference()).unwrap();
        assert_eq!(data.count_rate, 2.0);
        assert_eq!(data.timestamp, reference() + Duration::seconds(1));
    }

    #[test]
    fn test_every_fixed_layout_is_skipped_exactly() {
        let mut buf = Vec::new();
        for (group, len) in [(1u8, 8usize), (2, 16), (3, 14), (4, 16), (5, 16), (6, 6), (7, 4), (8, 6), (9, 6)] {
            prefix(&mut buf, group, 0, group, 0);
            buf.extend(std::iter::repeat(0xA5).take(len));
        }
        realtime(&mut buf, 10, 0, 7.0, 0.7);

        let data = decode_realtime_at(&buf, reference()).unwrap();
        assert_eq!(data.count_rate, 7.0);
    }

    #[test]
    fn test_sample_blocks_skip_by_group_size() {
        let mut buf = Vec::new();
        for (group, sample_size) in [(1u8, 8usize), (2, 16), (3, 14)] {
            prefix(&mut buf, group, 1, group, 0);
            buf.put_u16_le(3);
            buf.put_u32_le(1000);
            buf.extend(std::iter::repeat(0x5A).take(3 * sample_size));
        }
        realtime(&mut buf, 4, 0, 3.0, 0.3);

        let data = decode_realtime_at(&buf, reference()).unwrap();
        assert_eq!(data.count_rate, 3.0);
    }

    #[test]
    fn test_unknown_record_stops_decoding() {
        let mut buf = Vec::new();
        realtime(&mut buf, 1, 0, 1.0, 0.1);
        prefix(&mut buf, 2, 0, 42, 0);
        buf.extend_from_slice(&[0u8; 32]);
        realtime(&mut buf, 3, 0, 99.0, 9.9);

        let data = decode_realtime_at(&buf, reference()).unwrap();
        assert_eq!(data.count_rate, 1.0);
    }

    #[test]
    fn test_truncated_realtime_is_ignored() {
        let mut buf = Vec::new();
        realtime(&mut buf, 1, 0, 1.0, 0.1);
        let mut partial = Vec::new();
        realtime(&mut partial, 2, 0, 2.0, 0.2);
        buf.extend_from_slice(&partial[..partial.len() - 3]);

        let data = decode_realtime_at(&buf, reference()).unwrap();
        assert_eq!(data.count_rate, 1.0);
    }

    #[test]
    fn test_no_realtime_record() {
        let mut buf = Vec::new();
        prefix(&mut buf, 1, 0, 7, 0);
        buf.extend_from_slice(&[1, 2, 3, 4]);
        assert!(decode_realtime_at(&buf, reference()).is_none());
    }

    #[test]
    fn test_reference_time_skew() {
        assert_eq!(
            reference_time(reference()),
            reference() + Duration::seconds(128)
        );
    }
}
