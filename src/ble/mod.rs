//! BLE communication module.
//!
//! This module provides the transport seam used by the session and the
//! broadcast monitor, its btleplug implementation, and the UUIDs of the
//! logger's characteristics.

pub mod link;
pub mod transport;
pub mod uuids;

pub use link::{
    Advertisement, AdvertisementSender, BleLink, CharacteristicInfo, LinkHandle, PacketSender,
    RawPacket, ServiceInfo,
};
pub use transport::{BtleplugLink, DEFAULT_CONNECT_TIMEOUT, DEFAULT_DISCOVERY_TIMEOUT};
pub use uuids::*;
