//! Broadcast service-data parsing.
//!
//! Loggers advertise their current reading as service data under
//! [`TZONE_SERVICE_DATA_UUID`]. Offsets below are in hex characters of the
//! blob's lowercase hex form (two characters per byte):
//!
//! | chars   | field                          |
//! |---------|--------------------------------|
//! | 8..16   | device id (kept as raw hex)    |
//! | 16..18  | battery percent                |
//! | 20..24  | temperature, 0.01 °C (BE)      |
//! | 24..28  | humidity, 0.01 % (BE)          |

use std::collections::HashMap;

use chrono::{Local, NaiveDateTime};
use uuid::Uuid;

use crate::ble::uuids::TZONE_SERVICE_DATA_UUID;
use crate::data::Reading;
use crate::error::{Error, Result};
use crate::utils::{hex_field, round_to, to_hex};

/// Minimum length, in hex characters, of a decodable service-data blob.
pub const MIN_SERVICE_DATA_HEX_LEN: usize = 28;

/// Parse a service-data blob given as hex, stamping it with the current time.
///
/// # Example
///
/// ```
/// use tzone_ble::protocol::broadcast::parse_broadcast;
///
/// let reading = parse_broadcast("0000000012345678570009d011d7").unwrap();
/// assert_eq!(reading.device_id.as_deref(), Some("12345678"));
/// assert_eq!(reading.battery_percent, Some(87));
/// assert_eq!(reading.temperature_celsius, 25.1);
/// ```
pub fn parse_broadcast(service_data_hex: &str) -> Result<Reading> {
    parse_broadcast_at(service_data_hex, Local::now().naive_local())
}

/// Parse a service-data blob given as hex with an explicit timestamp.
pub fn parse_broadcast_at(service_data_hex: &str, received_at: NaiveDateTime) -> Result<Reading> {
    if service_data_hex.len() < MIN_SERVICE_DATA_HEX_LEN {
        return Err(Error::TruncatedPacket {
            expected: MIN_SERVICE_DATA_HEX_LEN / 2,
            actual: service_data_hex.len() / 2,
        });
    }

    let device_id = service_data_hex
        .get(8..16)
        .ok_or_else(|| Error::InvalidHex {
            input: service_data_hex.to_string(),
        })?;
    // The id is not decoded further, but it still has to be hex.
    hex_field(service_data_hex, 8, 16)?;

    let battery = hex_field(service_data_hex, 16, 18)? as u8;
    let raw_temperature = hex_field(service_data_hex, 20, 24)?;
    let raw_humidity = hex_field(service_data_hex, 24, 28)?;

    Ok(Reading::broadcast(
        received_at,
        device_id.to_ascii_lowercase(),
        battery,
        round_to(raw_temperature as f64 * 0.01, 1),
        round_to(raw_humidity as f64 * 0.01, 1),
    ))
}

/// Decode the vendor entry of an advertisement's service-data map.
///
/// Returns [`Error::MissingServiceData`] if the advertisement does not
/// carry the vendor entry; callers treat that as "not ours".
pub fn parse_service_data(service_data: &HashMap<Uuid, Vec<u8>>) -> Result<Reading> {
    let blob = service_data
        .get(&TZONE_SERVICE_DATA_UUID)
        .ok_or_else(|| Error::MissingServiceData {
            uuid: TZONE_SERVICE_DATA_UUID.to_string(),
        })?;

    parse_broadcast(&to_hex(blob))
}
