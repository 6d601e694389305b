//! Notification routing.
//!
//! Maps each subscribed characteristic to the decoder that understands it
//! and hands decoded values to the configured sink. Decode failures never
//! leave this module: the offending packet is logged and dropped.

use chrono::Local;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::link::{Advertisement, RawPacket};
use crate::ble::uuids::{
    BATTERY_UUID, HUMIDITY_UUID, SYNC_DATASWITCH_UUID, TEMPERATURE_UUID, TZONE_SERVICE_DATA_UUID,
};
use crate::data::{LiveSample, TargetDevice};
use crate::error::Error;
use crate::protocol::{broadcast, live, records, RecordClock};
use crate::sink::TelemetrySink;

/// Decoder family bound to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Live temperature characteristic.
    Temperature,
    /// Live humidity characteristic.
    Humidity,
    /// Live battery level characteristic.
    Battery,
    /// Stored-record sync characteristic.
    StoredData,
}

/// Counters kept by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterStats {
    /// Packets and advertisements received.
    pub received: u64,
    /// Values handed to the sink.
    pub emitted: u64,
    /// Packets dropped because they failed to decode.
    pub decode_failures: u64,
    /// Packets or advertisements ignored (unbound channel, other device).
    pub ignored: u64,
}

/// Dispatches raw payloads to decoders and decoded values to a sink.
pub struct NotificationRouter {
    bindings: HashMap<Uuid, ChannelKind>,
    sink: Arc<dyn TelemetrySink>,
    record_clock: RecordClock,
    received: AtomicU64,
    emitted: AtomicU64,
    decode_failures: AtomicU64,
    ignored: AtomicU64,
}

impl NotificationRouter {
    /// Create a router with no channel bindings.
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            bindings: HashMap::new(),
            sink,
            record_clock: RecordClock::default(),
            received: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
        }
    }

    /// Create a router bound to the standard logger characteristics.
    pub fn with_default_bindings(sink: Arc<dyn TelemetrySink>) -> Self {
        Self::new(sink)
            .bind(TEMPERATURE_UUID, ChannelKind::Temperature)
            .bind(HUMIDITY_UUID, ChannelKind::Humidity)
            .bind(BATTERY_UUID, ChannelKind::Battery)
            .bind(SYNC_DATASWITCH_UUID, ChannelKind::StoredData)
    }

    /// Bind a channel to a decoder, replacing any previous binding.
    pub fn bind(mut self, channel: Uuid, kind: ChannelKind) -> Self {
        self.bindings.insert(channel, kind);
        self
    }

    /// Set the time zone stored-record timestamps are read in.
    pub fn with_record_clock(mut self, clock: RecordClock) -> Self {
        self.record_clock = clock;
        self
    }

    /// Get the decoder bound to a channel.
    pub fn binding(&self, channel: &Uuid) -> Option<ChannelKind> {
        self.bindings.get(channel).copied()
    }

    /// Decode a notification and forward the result.
    ///
    /// Returns the number of values handed to the sink.
    pub fn route(&self, packet: &RawPacket) -> usize {
        self.received.fetch_add(1, Ordering::Relaxed);

        let Some(kind) = self.binding(&packet.channel) else {
            debug!("Dropping packet from unbound channel {}", packet.channel);
            self.ignored.fetch_add(1, Ordering::Relaxed);
            return 0;
        };

        trace!(
            "Routing {} bytes from {} as {:?}",
            packet.payload.len(),
            packet.channel,
            kind
        );

        let emitted = match kind {
            ChannelKind::StoredData => match records::parse_stored_records_with(&packet.payload, self.record_clock) {
                Ok(readings) => {
                    for reading in &readings {
                        self.sink.on_reading(reading);
                    }
                    readings.len()
                }
                Err(e) => return self.drop_packet(&packet.channel, e),
            },
            ChannelKind::Temperature | ChannelKind::Humidity | ChannelKind::Battery => {
                let decoded = match kind {
                    ChannelKind::Temperature => live::parse_temperature(&packet.payload),
                    ChannelKind::Humidity => live::parse_humidity(&packet.payload),
                    _ => live::parse_battery(&packet.payload),
                };
                match decoded {
                    Ok(value) => {
                        let sample = LiveSample::new(Local::now().naive_local(), value);
                        self.sink.on_live_sample(&sample);
                        1
                    }
                    Err(e) => return self.drop_packet(&packet.channel, e),
                }
            }
        };

        self.emitted.fetch_add(emitted as u64, Ordering::Relaxed);
        emitted
    }

    /// Decode an advertisement from `target` and forward the reading.
    ///
    /// Advertisements from other devices, or without the vendor service
    /// data, are ignored. Returns the number of readings handed to the sink.
    pub fn route_advertisement(&self, advertisement: &Advertisement, target: &TargetDevice) -> usize {
        self.received.fetch_add(1, Ordering::Relaxed);

        if !target.matches_address(&advertisement.address) {
            trace!("Ignoring advertisement from {}", advertisement.address);
            self.ignored.fetch_add(1, Ordering::Relaxed);
            return 0;
        }

        match broadcast::parse_service_data(&advertisement.service_data) {
            Ok(reading) => {
                self.sink.on_reading(&reading);
                self.emitted.fetch_add(1, Ordering::Relaxed);
                1
            }
            Err(Error::MissingServiceData { .. }) => {
                trace!("Advertisement from {} has no vendor data", advertisement.address);
                self.ignored.fetch_add(1, Ordering::Relaxed);
                0
            }
            Err(e) => self.drop_packet(&TZONE_SERVICE_DATA_UUID, e),
        }
    }

    /// Get a snapshot of the router counters.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            received: self.received.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }

    fn drop_packet(&self, channel: &Uuid, error: Error) -> usize {
        if error.is_decode() {
            warn!("Dropping malformed packet from {}: {}", channel, error);
            self.decode_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            warn!("Dropping packet from {}: {}", channel, error);
            self.ignored.fetch_add(1, Ordering::Relaxed);
        }
        0
    }
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("bindings", &self.bindings)
            .field("stats", &self.stats())
            .finish()
    }
}
