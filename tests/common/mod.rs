//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tzone_ble::ble::{AdvertisementSender, PacketSender};
use tzone_ble::{Advertisement, BleLink, Error, LinkHandle, RawPacket, Result, ServiceInfo};

/// A transport call, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    Write(Uuid, Vec<u8>),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Disconnect(u64),
    Scan,
    StopScan,
    Services,
}

/// A `BleLink` that follows a script instead of a radio.
#[derive(Default)]
pub struct ScriptedLink {
    /// Outcome of successive connects; `true` succeeds. Empty means succeed.
    connects: Mutex<VecDeque<bool>>,
    /// Payloads delivered as soon as a channel is subscribed.
    payloads: Mutex<HashMap<Uuid, Vec<Vec<u8>>>>,
    /// Advertisements delivered by every scan.
    advertisements: Mutex<Vec<Advertisement>>,
    /// Drop the connection right after the last subscribe.
    vanish_after_subscribe: Mutex<Option<usize>>,
    /// How long a connect takes before it resolves.
    connect_delay: Duration,
    /// How long a subscribe takes before it resolves.
    subscribe_delay: Duration,
    open: Mutex<HashSet<u64>>,
    /// Notification queues held per connection, dropped when it goes away.
    senders: Mutex<HashMap<u64, Vec<PacketSender>>>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connects(self, outcomes: &[bool]) -> Self {
        self.connects.lock().extend(outcomes.iter().copied());
        self
    }

    pub fn with_payload(self, channel: Uuid, payload: Vec<u8>) -> Self {
        self.payloads.lock().entry(channel).or_default().push(payload);
        self
    }

    pub fn with_advertisement(self, advertisement: Advertisement) -> Self {
        self.advertisements.lock().push(advertisement);
        self
    }

    /// Lose the connection once `subscriptions` channels are subscribed.
    pub fn vanishing_after(self, subscriptions: usize) -> Self {
        *self.vanish_after_subscribe.lock() = Some(subscriptions);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_subscribe_delay(mut self, delay: Duration) -> Self {
        self.subscribe_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn open_connections(&self) -> usize {
        self.open.lock().len()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(c)).count()
    }

    fn drop_connection(&self, id: u64) -> bool {
        self.senders.lock().remove(&id);
        self.open.lock().remove(&id)
    }

    fn check_open(&self, handle: &LinkHandle) -> Result<()> {
        if self.open.lock().contains(&handle.id) {
            Ok(())
        } else {
            Err(Error::UnexpectedDisconnect)
        }
    }
}

#[async_trait]
impl BleLink for ScriptedLink {
    async fn connect(&self, address: &str) -> Result<LinkHandle> {
        self.calls.lock().push(Call::Connect(address.to_string()));
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        if !self.connects.lock().pop_front().unwrap_or(true) {
            return Err(Error::TransportConnectFailure {
                address: address.to_string(),
                reason: "scripted failure".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.open.lock().insert(id);
        Ok(LinkHandle::new(id, address))
    }

    async fn disconnect(&self, handle: &LinkHandle) -> Result<()> {
        self.calls.lock().push(Call::Disconnect(handle.id));
        if self.drop_connection(handle.id) {
            Ok(())
        } else {
            Err(Error::UnexpectedDisconnect)
        }
    }

    async fn subscribe(
        &self,
        handle: &LinkHandle,
        channel: Uuid,
        sender: PacketSender,
    ) -> Result<()> {
        self.check_open(handle)?;
        self.calls.lock().push(Call::Subscribe(channel));
        if !self.subscribe_delay.is_zero() {
            tokio::time::sleep(self.subscribe_delay).await;
        }

        if let Some(payloads) = self.payloads.lock().get(&channel) {
            for payload in payloads {
                let _ = sender.send(RawPacket::new(channel, payload.clone()));
            }
        }

        self.senders
            .lock()
            .entry(handle.id)
            .or_default()
            .push(sender);

        let subscribed = self.count(|c| matches!(c, Call::Subscribe(_)));
        if *self.vanish_after_subscribe.lock() == Some(subscribed) {
            self.drop_connection(handle.id);
        }
        Ok(())
    }

    async fn unsubscribe(&self, handle: &LinkHandle, channel: Uuid) -> Result<()> {
        self.calls.lock().push(Call::Unsubscribe(channel));
        self.check_open(handle)
    }

    async fn write(&self, handle: &LinkHandle, channel: Uuid, data: &[u8]) -> Result<()> {
        self.check_open(handle)?;
        self.calls.lock().push(Call::Write(channel, data.to_vec()));
        Ok(())
    }

    async fn scan(
        &self,
        duration: Duration,
        sender: AdvertisementSender,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.calls.lock().push(Call::Scan);
        let advertisements = self.advertisements.lock().clone();
        for advertisement in advertisements {
            let _ = sender.send(advertisement);
        }
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
        self.calls.lock().push(Call::StopScan);
        Ok(())
    }

    async fn services(&self, handle: &LinkHandle) -> Result<Vec<ServiceInfo>> {
        self.check_open(handle)?;
        self.calls.lock().push(Call::Services);
        Ok(vec![ServiceInfo {
            uuid: tzone_ble::ble::UART_SERVICE_UUID,
            primary: true,
            characteristics: Vec::new(),
        }])
    }
}
