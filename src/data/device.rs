//! Target device identity.

/// A logger the session should connect to.
///
/// Chosen once per selection and never mutated; picking another device
/// means going back through the selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetDevice {
    /// BLE MAC-style address, e.g. `CA:84:BC:CC:11:21`.
    pub address: String,
    /// Human-readable model name.
    pub display_name: String,
}

impl TargetDevice {
    /// Create a new target.
    pub fn new(address: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.into(),
        }
    }

    /// Check whether a transport-reported address refers to this device.
    ///
    /// Platforms disagree on the case of hex digits, so the comparison
    /// ignores it.
    pub fn matches_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

impl std::fmt::Display for TargetDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Name: {} | Address: {}", self.display_name, self.address)
    }
}

/// Address of the LOG-IC 360 logger.
pub const LOGIC_360_ADDRESS: &str = "FE:A9:04:78:B6:C9";

/// Address of the TZ-BT04 logger.
pub const TZ_BT04_ADDRESS: &str = "CA:84:BC:CC:11:21";

/// Known loggers offered by the console selector, by index.
pub const KNOWN_DEVICES: [(&str, &str); 2] = [
    (LOGIC_360_ADDRESS, "LOG-IC 360"),
    (TZ_BT04_ADDRESS, "TZ-BT04"),
];

/// Get the known device at `index`.
pub fn known_device(index: usize) -> Option<TargetDevice> {
    KNOWN_DEVICES
        .get(index)
        .map(|(address, name)| TargetDevice::new(*address, *name))
}
