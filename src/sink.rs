//! Destinations for decoded telemetry.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::data::{LiveSample, Reading, ReadingBuffer};

/// Something decoded values are handed to, one call per value.
pub trait TelemetrySink: Send + Sync {
    /// Receive a complete reading.
    fn on_reading(&self, reading: &Reading);

    /// Receive a live single-channel sample.
    fn on_live_sample(&self, sample: &LiveSample) {
        let _ = sample;
    }
}

/// Prints every value as a console line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl TelemetrySink for ConsoleSink {
    fn on_reading(&self, reading: &Reading) {
        println!("{}", reading);
    }

    fn on_live_sample(&self, sample: &LiveSample) {
        println!("{}", sample);
    }
}

/// Logs every value through `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn on_reading(&self, reading: &Reading) {
        info!(
            target: "tzone_ble::readings",
            timestamp = %reading.timestamp_string(),
            temperature = reading.temperature_celsius,
            humidity = reading.humidity.percent(),
            battery = ?reading.battery_percent,
            device_id = ?reading.device_id,
            "reading"
        );
    }

    fn on_live_sample(&self, sample: &LiveSample) {
        info!(target: "tzone_ble::readings", "{}", sample);
    }
}

/// Keeps the most recent values in memory.
#[derive(Debug)]
pub struct BufferSink {
    readings: Mutex<ReadingBuffer>,
    samples: Mutex<VecDeque<LiveSample>>,
    sample_capacity: usize,
}

impl BufferSink {
    /// Create a sink keeping at most `capacity` readings and at most
    /// `capacity` live samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: Mutex::new(ReadingBuffer::new(capacity)),
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            sample_capacity: capacity,
        }
    }

    /// Copy the buffered readings, oldest first.
    pub fn readings(&self) -> Vec<Reading> {
        self.readings.lock().iter().cloned().collect()
    }

    /// Copy the buffered live samples, oldest first.
    pub fn live_samples(&self) -> Vec<LiveSample> {
        self.samples.lock().iter().cloned().collect()
    }

    /// Remove and return the buffered readings.
    pub fn take_readings(&self) -> Vec<Reading> {
        self.readings.lock().drain()
    }

    /// Number of buffered readings.
    pub fn len(&self) -> usize {
        self.readings.lock().len()
    }

    /// Check if no readings are buffered.
    pub fn is_empty(&self) -> bool {
        self.readings.lock().is_empty()
    }
}

impl TelemetrySink for BufferSink {
    fn on_reading(&self, reading: &Reading) {
        self.readings.lock().push(reading.clone());
    }

    fn on_live_sample(&self, sample: &LiveSample) {
        let mut samples = self.samples.lock();
        if samples.len() == self.sample_capacity {
            samples.pop_front();
        }
        samples.push_back(sample.clone());
    }
}

/// A decoded value published on a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    /// A complete reading.
    Reading(Reading),
    /// A live single-channel sample.
    Live(LiveSample),
}

/// Publishes values on a broadcast channel.
pub struct ChannelSink {
    tx: broadcast::Sender<Telemetry>,
}

impl ChannelSink {
    /// Create a sink whose channel holds up to `capacity` pending values.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to published values.
    pub fn subscribe(&self) -> broadcast::Receiver<Telemetry> {
        self.tx.subscribe()
    }
}

impl TelemetrySink for ChannelSink {
    fn on_reading(&self, reading: &Reading) {
        let _ = self.tx.send(Telemetry::Reading(reading.clone()));
    }

    fn on_live_sample(&self, sample: &LiveSample) {
        let _ = self.tx.send(Telemetry::Live(sample.clone()));
    }
}

/// Forwards every value to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    /// Create an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for FanoutSink {
    fn on_reading(&self, reading: &Reading) {
        for sink in &self.sinks {
            sink.on_reading(reading);
        }
    }

    fn on_live_sample(&self, sample: &LiveSample) {
        for sink in &self.sinks {
            sink.on_live_sample(sample);
        }
    }
}
