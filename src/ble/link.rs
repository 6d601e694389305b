//! Transport capability consumed by the session.
//!
//! The session and monitor only talk to the radio through [`BleLink`], so
//! they can be driven by the btleplug transport or by a scripted link in
//! tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;

/// Queue the transport pushes notification payloads into.
pub type PacketSender = mpsc::UnboundedSender<RawPacket>;

/// Queue the transport pushes scanned advertisements into.
pub type AdvertisementSender = mpsc::UnboundedSender<Advertisement>;

/// Opaque reference to an open connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkHandle {
    /// Transport-assigned connection id.
    pub id: u64,
    /// Address of the connected device.
    pub address: String,
}

impl LinkHandle {
    /// Create a new handle.
    pub fn new(id: u64, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

impl std::fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.address, self.id)
    }
}

/// A notification payload as received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Characteristic that produced the notification.
    pub channel: Uuid,
    /// Payload bytes.
    pub payload: Bytes,
}

impl RawPacket {
    /// Create a new packet.
    pub fn new(channel: Uuid, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}

/// An advertisement seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Address of the advertising device.
    pub address: String,
    /// Service data entries keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// A characteristic exposed by a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Human-readable property flags (read, notify, ...).
    pub properties: String,
}

impl std::fmt::Display for CharacteristicInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.uuid, self.properties)?;
        if let Some(family) = crate::ble::uuids::characteristic_family(&self.uuid) {
            write!(f, " ({})", family)?;
        }
        Ok(())
    }
}

/// A GATT service exposed by a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
    /// Characteristics of this service.
    pub characteristics: Vec<CharacteristicInfo>,
}

impl std::fmt::Display for ServiceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} characteristics{})",
            self.uuid,
            self.characteristics.len(),
            if self.primary { ", primary" } else { "" }
        )
    }
}

/// BLE operations the telemetry core needs from a transport.
///
/// Implementations must tolerate `unsubscribe` and `disconnect` on a handle
/// that is already gone by returning
/// [`Error::UnexpectedDisconnect`](crate::Error::UnexpectedDisconnect)
/// rather than panicking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Connect to the device at `address`.
    async fn connect(&self, address: &str) -> Result<LinkHandle>;

    /// Close a connection.
    async fn disconnect(&self, handle: &LinkHandle) -> Result<()>;

    /// Enable notifications on `channel`, delivering payloads to `sender`.
    async fn subscribe(
        &self,
        handle: &LinkHandle,
        channel: Uuid,
        sender: PacketSender,
    ) -> Result<()>;

    /// Disable notifications on `channel`.
    async fn unsubscribe(&self, handle: &LinkHandle, channel: Uuid) -> Result<()>;

    /// Write `data` to `channel` with response.
    async fn write(&self, handle: &LinkHandle, channel: Uuid, data: &[u8]) -> Result<()>;

    /// Scan for `duration`, delivering every advertisement to `sender`.
    ///
    /// Returns early once `cancel` fires. The scanner is stopped on every
    /// return path.
    async fn scan(
        &self,
        duration: Duration,
        sender: AdvertisementSender,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// List the services of a connected device.
    async fn services(&self, handle: &LinkHandle) -> Result<Vec<ServiceInfo>>;
}
