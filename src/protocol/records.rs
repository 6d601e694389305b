//! Stored-record parsing.
//!
//! After the unlock write, the sync data-switch characteristic notifies the
//! logger's history two records at a time. Each record is 7 bytes:
//!
//! ```text
//! 0        4         7
//! +--------+---------+
//! | time   | packed  |
//! | u32 BE | u24 BE  |
//! +--------+---------+
//! ```
//!
//! The packed field holds an 11-bit temperature in bits 6-16 (0.1 °C
//! steps) and a 7-bit humidity in the top 7 bits of its first byte.

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta};
use tracing::{debug, trace};

use crate::data::Reading;
use crate::error::{Error, Result};
use crate::utils::{from_hex, round_to};

/// Size of a single stored sub-record in bytes.
pub const STORED_RECORD_LEN: usize = 7;

/// Size of the timestamp field at the start of a sub-record.
pub const TIMESTAMP_LEN: usize = 4;

/// Number of sub-records carried by one notification.
pub const RECORDS_PER_PACKET: usize = 2;

/// Hours added to the device clock to obtain its local wall time.
pub const DEVICE_CLOCK_OFFSET_HOURS: i64 = 12;

/// Mask of the 11 temperature bits once shifted down.
const TEMPERATURE_MASK: u32 = 0x7FF;

/// Position of the lowest temperature bit in the packed field.
const TEMPERATURE_SHIFT: u32 = 6;

/// Time zone the device clock is read in before the offset is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecordClock {
    /// Read the epoch seconds as UTC. Output is the same on every host.
    #[default]
    Utc,
    /// Read the epoch seconds in the host time zone, as the vendor app does.
    HostLocal,
}

/// Parse a stored-data notification into readings.
///
/// Up to [`RECORDS_PER_PACKET`] sub-records are decoded in payload order.
/// A trailing sub-record that carries only its timestamp is skipped
/// without error. Any other short sub-record is reported as
/// [`Error::TruncatedPacket`].
///
/// # Example
///
/// ```
/// use tzone_ble::protocol::records::parse_stored_records;
///
/// let payload = [0x64, 0x00, 0x00, 0x00, 0x5A, 0x3A, 0xC0];
/// let readings = parse_stored_records(&payload).unwrap();
/// assert_eq!(readings.len(), 1);
/// assert_eq!(readings[0].temperature_celsius, 23.5);
/// ```
pub fn parse_stored_records(data: &[u8]) -> Result<Vec<Reading>> {
    parse_stored_records_with(data, RecordClock::Utc)
}

/// Parse a stored-data notification, reading timestamps with `clock`.
pub fn parse_stored_records_with(data: &[u8], clock: RecordClock) -> Result<Vec<Reading>> {
    if data.is_empty() {
        return Err(Error::TruncatedPacket {
            expected: STORED_RECORD_LEN,
            actual: 0,
        });
    }

    let usable = data.len().min(STORED_RECORD_LEN * RECORDS_PER_PACKET);
    if usable < data.len() {
        debug!(
            "Ignoring {} trailing bytes after stored records",
            data.len() - usable
        );
    }

    let mut readings = Vec::with_capacity(RECORDS_PER_PACKET);
    for chunk in data[..usable].chunks(STORED_RECORD_LEN) {
        if let Some(reading) = decode_sub_record(chunk, clock)? {
            readings.push(reading);
        }
    }

    Ok(readings)
}

/// Parse the hexadecimal form of a stored-data notification.
pub fn parse_stored_hex(hex: &str) -> Result<Vec<Reading>> {
    parse_stored_records(&from_hex(hex)?)
}

/// Decode one sub-record.
///
/// Returns `Ok(None)` when the value field is absent.
pub fn parse_sub_record(record: &[u8]) -> Result<Option<Reading>> {
    decode_sub_record(record, RecordClock::Utc)
}

fn decode_sub_record(record: &[u8], clock: RecordClock) -> Result<Option<Reading>> {
    trace!("Stored sub-record: {:02X?}", record);

    match record.len() {
        TIMESTAMP_LEN => {
            debug!("Stored sub-record has no value field, skipping");
            Ok(None)
        }
        STORED_RECORD_LEN => {
            let seconds = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
            let timestamp = device_timestamp_with(seconds, clock)?;
            let (temperature, humidity) = decode_packed_value([record[4], record[5], record[6]]);
            Ok(Some(Reading::stored(timestamp, temperature, humidity)))
        }
        actual => Err(Error::TruncatedPacket {
            expected: STORED_RECORD_LEN,
            actual,
        }),
    }
}

/// Convert a device timestamp to its local wall time.
pub fn device_timestamp(seconds: u32) -> Result<NaiveDateTime> {
    device_timestamp_with(seconds, RecordClock::Utc)
}

/// Convert a device timestamp to its local wall time, reading it with `clock`.
pub fn device_timestamp_with(seconds: u32, clock: RecordClock) -> Result<NaiveDateTime> {
    let utc = DateTime::from_timestamp(seconds as i64, 0).ok_or_else(|| Error::InvalidData {
        context: format!("Timestamp out of range: {}", seconds),
    })?;

    let wall = match clock {
        RecordClock::Utc => utc.naive_utc(),
        RecordClock::HostLocal => utc.with_timezone(&Local).naive_local(),
    };
    Ok(wall + TimeDelta::hours(DEVICE_CLOCK_OFFSET_HOURS))
}

/// Decode the packed 3-byte value into `(temperature_celsius, humidity_percent)`.
pub fn decode_packed_value(packed: [u8; 3]) -> (f64, u8) {
    let value = u32::from_be_bytes([0, packed[0], packed[1], packed[2]]);
    let raw_temperature = (value >> TEMPERATURE_SHIFT) & TEMPERATURE_MASK;
    let temperature = round_to(raw_temperature as f64 * 0.1, 1);
    let humidity = packed[0] >> 1;
    (temperature, humidity)
}

/// Build a stored sub-record from its components.
///
/// This is the inverse of [`parse_sub_record`]. `local_time` is the wall
/// time the logger would report, so the clock offset is removed before
/// encoding. Temperatures are clamped to the representable 0.0-204.7 °C
/// range and humidity to 0-127 %.
pub fn encode_stored_record(
    local_time: NaiveDateTime,
    temperature_celsius: f64,
    humidity_percent: u8,
) -> Result<[u8; STORED_RECORD_LEN]> {
    let device_time = local_time - TimeDelta::hours(DEVICE_CLOCK_OFFSET_HOURS);
    let seconds = u32::try_from(device_time.and_utc().timestamp()).map_err(|_| {
        Error::InvalidParameter {
            name: "local_time".to_string(),
            value: local_time.to_string(),
        }
    })?;

    let raw_temperature =
        ((temperature_celsius * 10.0).round().max(0.0) as u32).min(TEMPERATURE_MASK);
    let humidity = humidity_percent.min(0x7F) as u32;

    // Humidity owns bits 17-23; bit 16 is the temperature MSB.
    let packed = (humidity << 17) | (raw_temperature << TEMPERATURE_SHIFT);
    let packed_bytes = packed.to_be_bytes();
    let time_bytes = seconds.to_be_bytes();

    Ok([
        time_bytes[0],
        time_bytes[1],
        time_bytes[2],
        time_bytes[3],
        packed_bytes[1],
        packed_bytes[2],
        packed_bytes[3],
    ])
}
