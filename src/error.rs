//! Error types for the tzone-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The target device was not seen during discovery.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// The address that was searched for.
        address: String,
    },

    /// Failed to establish a connection to the logger.
    #[error("Connection to {address} failed: {reason}")]
    TransportConnectFailure {
        /// Address of the device we tried to reach.
        address: String,
        /// Description of why the connection failed.
        reason: String,
    },

    /// Failed to enable (or write before enabling) notifications on a channel.
    #[error("Subscription to {channel} failed: {reason}")]
    SubscriptionFailure {
        /// Characteristic UUID of the channel.
        channel: String,
        /// Description of why the subscription failed.
        reason: String,
    },

    /// The handle no longer refers to a live connection.
    #[error("Device disconnected unexpectedly")]
    UnexpectedDisconnect,

    /// A payload was shorter than its fixed layout requires.
    #[error("Truncated packet: expected {expected} bytes, got {actual}")]
    TruncatedPacket {
        /// Number of bytes the layout requires.
        expected: usize,
        /// Number of bytes actually available.
        actual: usize,
    },

    /// A hexadecimal payload contained non-hex characters or an odd length.
    #[error("Invalid hex payload: {input:?}")]
    InvalidHex {
        /// The offending input.
        input: String,
    },

    /// The advertisement did not carry the vendor service-data entry.
    #[error("Missing service data for {uuid}")]
    MissingServiceData {
        /// The service-data UUID that was looked up.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Invalid data was received from the device.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// The operation was interrupted by a shutdown request.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error came from decoding a payload.
    ///
    /// Decode errors only ever drop the offending packet.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::TruncatedPacket { .. }
                | Self::InvalidHex { .. }
                | Self::MissingServiceData { .. }
                | Self::InvalidData { .. }
        )
    }

    /// Whether this error came from the BLE transport.
    ///
    /// Transport errors are recovered by the session's back-off cycle.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::BluetoothUnavailable
                | Self::DeviceNotFound { .. }
                | Self::TransportConnectFailure { .. }
                | Self::SubscriptionFailure { .. }
                | Self::UnexpectedDisconnect
                | Self::CharacteristicNotFound { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
