//! Live characteristic parsing.
//!
//! While connected in live mode the logger notifies the standard GATT
//! temperature, humidity and battery characteristics. Unlike the stored
//! and broadcast formats these are little-endian.

use crate::data::LiveValue;
use crate::error::{Error, Result};

/// Longest integer a live notification may carry.
const MAX_LIVE_LEN: usize = 4;

/// Decode a temperature notification: signed little-endian, 0.01 °C.
pub fn parse_temperature(data: &[u8]) -> Result<LiveValue> {
    let raw = le_signed(data)?;
    Ok(LiveValue::Temperature(raw as f64 / 100.0))
}

/// Decode a humidity notification: unsigned little-endian, 0.01 %.
pub fn parse_humidity(data: &[u8]) -> Result<LiveValue> {
    let raw = le_unsigned(data)?;
    Ok(LiveValue::Humidity(raw as f64 / 100.0))
}

/// Decode a battery level notification: one byte, percent.
pub fn parse_battery(data: &[u8]) -> Result<LiveValue> {
    match data.first() {
        Some(level) => Ok(LiveValue::Battery(*level)),
        None => Err(Error::TruncatedPacket {
            expected: 1,
            actual: 0,
        }),
    }
}

fn check_len(data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(Error::TruncatedPacket {
            expected: 1,
            actual: 0,
        });
    }
    if data.len() > MAX_LIVE_LEN {
        return Err(Error::InvalidData {
            context: format!(
                "Live notification too long: {} bytes (max {})",
                data.len(),
                MAX_LIVE_LEN
            ),
        });
    }
    Ok(())
}

fn le_unsigned(data: &[u8]) -> Result<u32> {
    check_len(data)?;
    Ok(data
        .iter()
        .rev()
        .fold(0u32, |acc, byte| (acc << 8) | *byte as u32))
}

fn le_signed(data: &[u8]) -> Result<i32> {
    let unsigned = le_unsigned(data)?;
    // Sign-extend from the top bit of the last byte.
    let unused_bits = 32 - 8 * data.len() as u32;
    Ok(((unsigned << unused_bits) as i32) >> unused_bits)
}
