//! btleplug implementation of [`BleLink`].
//!
//! Owns the adapter and a table of open connections. Each connection runs
//! a forwarding task that moves notifications from the peripheral's stream
//! into the queue registered for their characteristic.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::link::{
    Advertisement, AdvertisementSender, BleLink, CharacteristicInfo, LinkHandle, PacketSender,
    RawPacket, ServiceInfo,
};
use crate::error::{Error, Result};

/// How long `connect` scans for a device it has not seen yet.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// How long `connect` waits for the link layer to come up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval between peripheral list checks while discovering.
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(250);

type ChannelTable = Arc<RwLock<HashMap<Uuid, PacketSender>>>;

type Cleanup = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs a cleanup future if dropped while still armed.
///
/// Covers the case where the caller drops an in-flight `connect` or `scan`,
/// which would otherwise leave the adapter scanning or a peripheral connected.
struct CleanupGuard {
    cleanup: Option<Cleanup>,
}

impl CleanupGuard {
    fn new(cleanup: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            cleanup: Some(Box::pin(cleanup)),
        }
    }

    /// Take the cleanup back to run it inline.
    fn take(mut self) -> Option<Cleanup> {
        self.cleanup.take()
    }

    /// Drop the cleanup without running it.
    fn disarm(mut self) {
        self.cleanup = None;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(cleanup);
            }
            Err(_) => debug!("No runtime left to run transport cleanup"),
        }
    }
}

fn stop_scan_cleanup(adapter: &Adapter) -> CleanupGuard {
    let adapter = adapter.clone();
    CleanupGuard::new(async move {
        if let Err(e) = adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }
    })
}

fn disconnect_cleanup(peripheral: &Peripheral) -> CleanupGuard {
    let peripheral = peripheral.clone();
    CleanupGuard::new(async move {
        if let Err(e) = peripheral.disconnect().await {
            debug!("Cleanup disconnect failed: {}", e);
        }
    })
}

/// An open connection.
struct Connection {
    peripheral: Peripheral,
    channels: ChannelTable,
    forwarder: tokio::task::JoinHandle<()>,
}

/// BLE transport backed by the platform adapter.
pub struct BtleplugLink {
    /// The BLE adapter.
    adapter: Adapter,
    /// Open connections by handle id.
    connections: Arc<RwLock<HashMap<u64, Connection>>>,
    /// Next handle id.
    next_id: AtomicU64,
    /// Discovery timeout used by `connect`.
    discovery_timeout: Duration,
    /// Link-layer connect timeout used by `connect`.
    connect_timeout: Duration,
}

impl BtleplugLink {
    /// Create a link on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a link on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set how long `connect` scans for an unknown device.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set how long `connect` waits for the peripheral to accept.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Number of connections currently open.
    pub fn open_connections(&self) -> usize {
        self.connections.read().len()
    }

    /// Find a known peripheral by address (or platform id on macOS).
    async fn lookup(&self, address: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.id().to_string().eq_ignore_ascii_case(address) {
                return Ok(Some(peripheral));
            }
            if let Ok(Some(properties)) = peripheral.properties().await {
                if properties.address.to_string().eq_ignore_ascii_case(address) {
                    return Ok(Some(peripheral));
                }
            }
        }
        Ok(None)
    }

    /// Find a peripheral, scanning for it if it has not been seen yet.
    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        if let Some(peripheral) = self.lookup(address).await? {
            return Ok(peripheral);
        }

        debug!("{} not known yet, scanning", address);
        self.adapter.start_scan(ScanFilter::default()).await?;
        let scanning = stop_scan_cleanup(&self.adapter);

        let deadline = Instant::now() + self.discovery_timeout;
        let found = loop {
            match self.lookup(address).await {
                Ok(Some(peripheral)) => break Some(peripheral),
                Ok(None) => {}
                Err(e) => trace!("Peripheral lookup failed: {}", e),
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(DISCOVERY_POLL_INTERVAL).await;
        };

        if let Some(stop) = scanning.take() {
            stop.await;
        }

        found.ok_or_else(|| Error::DeviceNotFound {
            address: address.to_string(),
        })
    }

    /// Get the peripheral and channel table behind a handle.
    fn connection(&self, handle: &LinkHandle) -> Result<(Peripheral, ChannelTable)> {
        self.connections
            .read()
            .get(&handle.id)
            .map(|c| (c.peripheral.clone(), c.channels.clone()))
            .ok_or(Error::UnexpectedDisconnect)
    }

    fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Spawn the task moving notifications into their registered queues.
    async fn spawn_forwarder(
        peripheral: &Peripheral,
        channels: ChannelTable,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let mut notifications = peripheral.notifications().await?;

        Ok(tokio::spawn(async move {
            debug!("Notification forwarder started");

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {:02X?}",
                    notification.uuid,
                    notification.value
                );

                let sender = channels.read().get(&notification.uuid).cloned();
                match sender {
                    Some(sender) => {
                        let packet = RawPacket::new(notification.uuid, notification.value);
                        if sender.send(packet).is_err() {
                            debug!("Receiver for {} dropped", notification.uuid);
                        }
                    }
                    None => trace!("No subscriber for {}", notification.uuid),
                }
            }

            // Dropping the senders tells every listener the link is gone.
            channels.write().clear();
            debug!("Notification forwarder stopped");
        }))
    }
}

#[async_trait]
impl BleLink for BtleplugLink {
    async fn connect(&self, address: &str) -> Result<LinkHandle> {
        let connect_failure = |reason: String| Error::TransportConnectFailure {
            address: address.to_string(),
            reason,
        };

        let peripheral = self
            .find_peripheral(address)
            .await
            .map_err(|e| connect_failure(e.to_string()))?;

        let connected = disconnect_cleanup(&peripheral);

        if !peripheral.is_connected().await.unwrap_or(false) {
            match tokio::time::timeout(self.connect_timeout, peripheral.connect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(connect_failure(e.to_string())),
                Err(_) => {
                    return Err(connect_failure(format!(
                        "no connection after {:?}",
                        self.connect_timeout
                    )))
                }
            }
        }

        let setup = async {
            peripheral.discover_services().await?;
            let channels: ChannelTable = Arc::new(RwLock::new(HashMap::new()));
            let forwarder = Self::spawn_forwarder(&peripheral, channels.clone()).await?;
            Ok::<_, Error>((channels, forwarder))
        };

        let (channels, forwarder) = match setup.await {
            Ok(parts) => parts,
            Err(e) => {
                // Do not leave a half-open link behind.
                if let Some(disconnect) = connected.take() {
                    disconnect.await;
                }
                return Err(connect_failure(e.to_string()));
            }
        };
        connected.disarm();

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.connections.write().insert(
            id,
            Connection {
                peripheral,
                channels,
                forwarder,
            },
        );

        info!("Connected to {}", address);
        Ok(LinkHandle::new(id, address))
    }

    async fn disconnect(&self, handle: &LinkHandle) -> Result<()> {
        let connection = self
            .connections
            .write()
            .remove(&handle.id)
            .ok_or(Error::UnexpectedDisconnect)?;

        connection.forwarder.abort();
        connection.channels.write().clear();

        match connection.peripheral.disconnect().await {
            Ok(_) => {
                info!("Disconnected from {}", handle.address);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to disconnect from {}: {}", handle.address, e);
                Err(Error::Bluetooth(e))
            }
        }
    }

    async fn subscribe(
        &self,
        handle: &LinkHandle,
        channel: Uuid,
        sender: PacketSender,
    ) -> Result<()> {
        let (peripheral, channels) = self.connection(handle)?;
        let characteristic = Self::find_characteristic(&peripheral, channel)?;

        debug!(
            "Subscribing to {}, properties: {:?}",
            channel, characteristic.properties
        );

        // Register first so the earliest notification has somewhere to go.
        channels.write().insert(channel, sender);

        if let Err(e) = peripheral.subscribe(&characteristic).await {
            channels.write().remove(&channel);
            return Err(Error::SubscriptionFailure {
                channel: channel.to_string(),
                reason: e.to_string(),
            });
        }

        debug!("Subscribed to notifications from {}", channel);
        Ok(())
    }

    async fn unsubscribe(&self, handle: &LinkHandle, channel: Uuid) -> Result<()> {
        let (peripheral, channels) = self.connection(handle)?;
        channels.write().remove(&channel);

        if !peripheral.is_connected().await.unwrap_or(false) {
            return Err(Error::UnexpectedDisconnect);
        }

        let characteristic = Self::find_characteristic(&peripheral, channel)?;
        peripheral.unsubscribe(&characteristic).await?;

        debug!("Unsubscribed from notifications from {}", channel);
        Ok(())
    }

    async fn write(&self, handle: &LinkHandle, channel: Uuid, data: &[u8]) -> Result<()> {
        let (peripheral, _) = self.connection(handle)?;
        let characteristic = Self::find_characteristic(&peripheral, channel)?;

        peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await?;

        trace!("Wrote {} bytes to characteristic {}", data.len(), channel);
        Ok(())
    }

    async fn scan(
        &self,
        duration: Duration,
        sender: AdvertisementSender,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        let scanning = stop_scan_cleanup(&self.adapter);
        debug!("Scanning for {:?}", duration);

        let window = tokio::time::sleep(duration);
        tokio::pin!(window);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Scan cancelled");
                    break;
                }
                _ = &mut window => break,
                event = events.next() => {
                    let Some(event) = event else { break };

                    let CentralEvent::ServiceDataAdvertisement { id, service_data } = event else {
                        continue;
                    };

                    let (address, rssi) = match self.adapter.peripheral(&id).await {
                        Ok(peripheral) => match peripheral.properties().await {
                            Ok(Some(properties)) => (properties.address.to_string(), properties.rssi),
                            _ => (id.to_string(), None),
                        },
                        Err(e) => {
                            trace!("Failed to get peripheral: {}", e);
                            continue;
                        }
                    };

                    let advertisement = Advertisement {
                        address,
                        service_data,
                        rssi,
                    };

                    if sender.send(advertisement).is_err() {
                        debug!("Advertisement receiver dropped, ending scan early");
                        break;
                    }
                }
            }
        }

        scanning.disarm();
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn services(&self, handle: &LinkHandle) -> Result<Vec<ServiceInfo>> {
        let (peripheral, _) = self.connection(handle)?;

        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                primary: service.primary,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|c| CharacteristicInfo {
                        uuid: c.uuid,
                        properties: format!("{:?}", c.properties),
                    })
                    .collect(),
            })
            .collect())
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        for connection in self.connections.read().values() {
            connection.forwarder.abort();
        }
    }
}
