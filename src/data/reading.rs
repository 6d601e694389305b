//! Decoded reading data structures.
//!
//! Contains the values produced by the payload parsers and their
//! console representations.

use chrono::NaiveDateTime;

/// Timestamp format used in every reading line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Relative humidity as reported by the logger.
///
/// Stored records carry a whole percent, broadcasts carry hundredths that
/// are reported with one decimal.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Humidity {
    /// Whole percent (stored records).
    Whole(u8),
    /// Percent with one fractional digit (broadcasts).
    Decimal(f64),
}

impl Humidity {
    /// Get the humidity as a floating point percentage.
    pub fn percent(&self) -> f64 {
        match self {
            Self::Whole(value) => *value as f64,
            Self::Decimal(value) => *value,
        }
    }
}

impl std::fmt::Display for Humidity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Whole(value) => write!(f, "{}", value),
            Self::Decimal(value) => write!(f, "{:.1}", value),
        }
    }
}

/// A complete temperature/humidity reading.
///
/// Produced either from a stored sub-record (timestamp from the device
/// clock) or from a broadcast advertisement (timestamp at reception, with
/// battery level and device identity).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    /// Device-local time of the measurement.
    pub timestamp: NaiveDateTime,

    /// Temperature in degrees Celsius, one fractional digit.
    pub temperature_celsius: f64,

    /// Relative humidity.
    pub humidity: Humidity,

    /// Battery level in percent (broadcasts only).
    pub battery_percent: Option<u8>,

    /// Raw hex identity of the broadcasting device (broadcasts only).
    pub device_id: Option<String>,
}

impl Reading {
    /// Create a reading decoded from a stored record.
    pub fn stored(timestamp: NaiveDateTime, temperature_celsius: f64, humidity: u8) -> Self {
        Self {
            timestamp,
            temperature_celsius,
            humidity: Humidity::Whole(humidity),
            battery_percent: None,
            device_id: None,
        }
    }

    /// Create a reading decoded from a broadcast advertisement.
    pub fn broadcast(
        timestamp: NaiveDateTime,
        device_id: String,
        battery_percent: u8,
        temperature_celsius: f64,
        humidity_percent: f64,
    ) -> Self {
        Self {
            timestamp,
            temperature_celsius,
            humidity: Humidity::Decimal(humidity_percent),
            battery_percent: Some(battery_percent),
            device_id: Some(device_id),
        }
    }

    /// Check if this reading came from a broadcast advertisement.
    pub fn is_broadcast(&self) -> bool {
        self.device_id.is_some()
    }

    /// Get the timestamp formatted as `YYYY-MM-DD HH:MM:SS`.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.device_id, self.battery_percent) {
            (Some(device_id), Some(battery)) => write!(
                f,
                "DEVICE ID: {} | BATTERY: {}% | TEMP: {:.1}°C | HUMIDITY: {}%",
                device_id, battery, self.temperature_celsius, self.humidity
            ),
            _ => write!(
                f,
                "{} | TEMP: {:.1}°C | HUMIDITY: {}%",
                self.timestamp_string(),
                self.temperature_celsius,
                self.humidity
            ),
        }
    }
}

/// Quantity carried by a single live-mode notification.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LiveValue {
    /// Temperature in degrees Celsius.
    Temperature(f64),
    /// Relative humidity in percent.
    Humidity(f64),
    /// Battery level in percent.
    Battery(u8),
}

/// A single-channel value received while connected in live mode.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LiveSample {
    /// Host time the notification was received.
    pub received_at: NaiveDateTime,
    /// The decoded value.
    pub value: LiveValue,
}

impl LiveSample {
    /// Create a new sample.
    pub fn new(received_at: NaiveDateTime, value: LiveValue) -> Self {
        Self { received_at, value }
    }
}

// Debug formatting keeps the decimal point on whole values ("23.0").
impl std::fmt::Display for LiveSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value {
            LiveValue::Temperature(celsius) => write!(f, "Temperature: {:?} Celsius", celsius),
            LiveValue::Humidity(percent) => write!(f, "Humidity: {:?} %", percent),
            LiveValue::Battery(percent) => write!(f, "Battery: {} %", percent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 5, 17)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_stored_reading_display() {
        let reading = Reading::stored(at(14, 3, 9), 23.5, 45);
        assert_eq!(
            reading.to_string(),
            "2023-05-17 14:03:09 | TEMP: 23.5°C | HUMIDITY: 45%"
        );
        assert!(!reading.is_broadcast());
    }

    #[test]
    fn test_broadcast_reading_display() {
        let reading = Reading::broadcast(at(0, 0, 0), "12345678".to_string(), 87, 25.1, 45.7);
        assert_eq!(
            reading.to_string(),
            "DEVICE ID: 12345678 | BATTERY: 87% | TEMP: 25.1°C | HUMIDITY: 45.7%"
        );
        assert!(reading.is_broadcast());
    }

    #[test]
    fn test_whole_temperature_keeps_decimal() {
        let reading = Reading::stored(at(0, 0, 0), 4.0, 0);
        assert!(reading.to_string().contains("TEMP: 4.0°C"));
    }

    #[test]
    fn test_humidity_percent() {
        assert_eq!(Humidity::Whole(45).percent(), 45.0);
        assert_eq!(Humidity::Decimal(45.7).percent(), 45.7);
        assert_eq!(Humidity::Decimal(50.0).to_string(), "50.0");
    }

    #[test]
    fn test_live_sample_display() {
        let sample = LiveSample::new(at(0, 0, 0), LiveValue::Temperature(-1.5));
        assert_eq!(sample.to_string(), "Temperature: -1.5 Celsius");

        let sample = LiveSample::new(at(0, 0, 0), LiveValue::Humidity(55.25));
        assert_eq!(sample.to_string(), "Humidity: 55.25 %");

        let sample = LiveSample::new(at(0, 0, 0), LiveValue::Battery(90));
        assert_eq!(sample.to_string(), "Battery: 90 %");
    }

    #[test]
    fn test_live_sample_display_keeps_whole_values_decimal() {
        let sample = LiveSample::new(at(0, 0, 0), LiveValue::Temperature(23.0));
        assert_eq!(sample.to_string(), "Temperature: 23.0 Celsius");

        let sample = LiveSample::new(at(0, 0, 0), LiveValue::Humidity(40.0));
        assert_eq!(sample.to_string(), "Humidity: 40.0 %");
    }
}
