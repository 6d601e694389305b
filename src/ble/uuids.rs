//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for TZONE logger communication.

use uuid::Uuid;

// Standard GATT characteristics (live mode)
/// Temperature Measurement characteristic UUID (0x2A1C).
pub const TEMPERATURE_UUID: Uuid = Uuid::from_u128(0x0000_2a1c_0000_1000_8000_00805f9b34fb);
/// Humidity characteristic UUID (0x2A6F).
pub const HUMIDITY_UUID: Uuid = Uuid::from_u128(0x0000_2a6f_0000_1000_8000_00805f9b34fb);
/// Battery Level characteristic UUID (0x2A19).
pub const BATTERY_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);

// TZONE vendor service
/// Password characteristic; the unlock payload is written here before a sync.
pub const PASSWORD_UUID: Uuid = Uuid::from_u128(0x2776_3b13_999c_4d6a_9fc4_c7272be10900);
/// Data mode characteristic.
pub const DATA_MODE_UUID: Uuid = Uuid::from_u128(0x2776_3b31_999c_4d6a_9fc4_c7272be10900);
/// Sync data-switch characteristic (notifications carry stored records).
pub const SYNC_DATASWITCH_UUID: Uuid = Uuid::from_u128(0x2776_3b21_999c_4d6a_9fc4_c7272be10900);

/// Service-data UUID under which loggers broadcast their current reading.
pub const TZONE_SERVICE_DATA_UUID: Uuid =
    Uuid::from_u128(0x0000_cbff_0000_1000_8000_00805f9b34fb);

// UART Service (Nordic NUS - Nordic UART Service)
/// Nordic UART Service UUID.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// UART RX characteristic UUID (write to device).
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// UART TX characteristic UUID (notifications from device).
///
/// Host-side tools that "receive" from the logger listen here.
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

/// Payload written to [`PASSWORD_UUID`] to unlock stored-data sync.
pub const UNLOCK_PAYLOAD: [u8; 6] = [0x00; 6];

/// Check if a characteristic belongs to the TZONE vendor service.
pub fn is_tzone_characteristic(uuid: &Uuid) -> bool {
    *uuid == PASSWORD_UUID || *uuid == DATA_MODE_UUID || *uuid == SYNC_DATASWITCH_UUID
}

/// Check if a characteristic is one of the live-mode standard characteristics.
pub fn is_live_characteristic(uuid: &Uuid) -> bool {
    *uuid == TEMPERATURE_UUID || *uuid == HUMIDITY_UUID || *uuid == BATTERY_UUID
}

/// Check if a characteristic belongs to the Nordic UART service.
pub fn is_uart_characteristic(uuid: &Uuid) -> bool {
    *uuid == UART_RX_UUID || *uuid == UART_TX_UUID
}

/// Short label for the family a known characteristic belongs to.
pub fn characteristic_family(uuid: &Uuid) -> Option<&'static str> {
    if is_live_characteristic(uuid) {
        Some("live")
    } else if is_tzone_characteristic(uuid) {
        Some("tzone")
    } else if is_uart_characteristic(uuid) {
        Some("uart")
    } else {
        None
    }
}
