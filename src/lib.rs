// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # tzone-ble
//!
//! A cross-platform Rust library for reading TZONE temperature/humidity
//! loggers (TZ-BT04, Logic 360) over Bluetooth Low Energy.
//!
//! ## Features
//!
//! - **Stored Sync**: Unlock the logger and decode its stored records
//! - **Live Readings**: Subscribe to the live temperature and humidity characteristics
//! - **Broadcast Mode**: Decode readings from advertisements without connecting
//! - **Resilient Sessions**: Reconnect with a fixed back-off until cancelled
//! - **Pluggable Sinks**: Console, `tracing`, in-memory buffer or broadcast channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use tzone_ble::{
//!     known_device, BtleplugLink, ConsoleSink, FixedSelector, Result, SessionConfig,
//!     SessionController,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let link = Arc::new(BtleplugLink::new().await?);
//!     let session = SessionController::new(
//!         link,
//!         SessionConfig::stored_sync(),
//!         Arc::new(ConsoleSink),
//!     )?;
//!
//!     let target = known_device(1).expect("known device");
//!     let cancel = CancellationToken::new();
//!     let stats = session.run(&FixedSelector::new(target), cancel).await?;
//!     println!("{} readings", stats.readings_emitted);
//!     Ok(())
//! }
//! ```
//!
//! Payloads can also be decoded without a radio:
//!
//! ```
//! use tzone_ble::protocol::parse_broadcast;
//!
//! let reading = parse_broadcast("0000000012345678570009d011d7").unwrap();
//! assert_eq!(reading.battery_percent, Some(87));
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Peripherals are addressed by their
//! platform identifier rather than their MAC address.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data and config types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod router;
pub mod selector;
pub mod session;
pub mod sink;
pub mod utils;

// Re-exports for convenience
pub use ble::{Advertisement, BleLink, BtleplugLink, LinkHandle, RawPacket, ServiceInfo};
pub use config::{CyclePolicy, MonitorConfig, SessionConfig, SessionMode};
pub use data::{
    known_device, Humidity, LiveSample, LiveValue, Reading, ReadingBuffer, TargetDevice,
    KNOWN_DEVICES,
};
pub use error::{Error, Result};
pub use monitor::{BroadcastMonitor, MonitorStats};
pub use protocol::RecordClock;
pub use router::{ChannelKind, NotificationRouter, RouterStats};
pub use selector::{ConsoleSelector, DeviceSelector, FixedSelector};
pub use session::{CycleOutcome, SessionController, SessionEvent, SessionState, SessionStats};
pub use sink::{BufferSink, ChannelSink, ConsoleSink, FanoutSink, Telemetry, TelemetrySink, TracingSink};
pub use utils::{from_hex, round_to, to_hex};
