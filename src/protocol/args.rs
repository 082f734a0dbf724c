//! Fixed-layout argument packers.

use chrono::{Datelike, Timelike};

/// Pack a 32-bit value (register address/value, virtual string id).
#[inline]
pub fn pack_u32(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Pack a virtual-register write: address followed by value.
pub fn pack_register_write(address: u32, value: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[..4].copy_from_slice(&pack_u32(address));
    buf[4..].copy_from_slice(&pack_u32(value));
    buf
}

/// Pack the `SET_TIME` payload.
///
/// Layout is `[day, month, year-2000, 0, second, minute, hour, 0]`. Note that the
/// time fields run second, minute, hour. The year byte covers 2000..=2255; years
/// outside that range are clamped.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use dosimeter_link::protocol::pack_local_time;
///
/// let t = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(13, 45, 30).unwrap();
/// assert_eq!(pack_local_time(&t), [15, 3, 24, 0, 30, 45, 13, 0]);
/// ```
pub fn pack_local_time<T: Datelike + Timelike>(time: &T) -> [u8; 8] {
    let year = u8::try_from(time.year() - 2000)
        .unwrap_or(if time.year() < 2000 { 0 } else { u8::MAX });
    [
        time.day() as u8,
        time.month() as u8,
        year,
        0,
        time.second() as u8,
        time.minute() as u8,
        time.hour() as u8,
        0,
    ]
}
