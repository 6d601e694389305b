//! Utility functions for the tzone-ble crate.

use crate::error::{Error, Result};

/// Round a value to a fixed number of decimal places.
///
/// # Example
///
/// ```
/// use tzone_ble::round_to;
///
/// assert_eq!(round_to(23.456, 1), 23.5);
/// assert_eq!(round_to(0.04, 1), 0.0);
/// ```
#[inline]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Encode bytes as lowercase hexadecimal.
///
/// # Example
///
/// ```
/// use tzone_ble::to_hex;
///
/// assert_eq!(to_hex(&[0x00, 0x0a, 0xff]), "000aff");
/// ```
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode a hexadecimal string into bytes.
///
/// Accepts upper and lower case digits. Odd lengths and non-hex characters
/// are rejected with [`Error::InvalidHex`].
pub fn from_hex(input: &str) -> Result<Vec<u8>> {
    hex::decode(input).map_err(|_| Error::InvalidHex {
        input: input.to_string(),
    })
}

/// Parse the hex digits in `hex[start..end]` as an unsigned integer.
///
/// Returns [`Error::TruncatedPacket`] (counted in hex characters) when the
/// string is too short and [`Error::InvalidHex`] on non-hex digits.
pub(crate) fn hex_field(hex: &str, start: usize, end: usize) -> Result<u32> {
    let field = hex.get(start..end).ok_or(Error::TruncatedPacket {
        expected: end,
        actual: hex.len(),
    })?;

    u32::from_str_radix(field, 16).map_err(|_| Error::InvalidHex {
        input: field.to_string(),
    })
}
