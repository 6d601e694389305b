//! Bounded in-memory reading history.

use std::collections::VecDeque;

use super::reading::Reading;

/// Default number of readings kept by a [`ReadingBuffer`].
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Fixed-capacity FIFO of recent readings.
///
/// When full, pushing a reading evicts the oldest one. Readings stay in
/// arrival order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadingBuffer {
    capacity: usize,
    readings: VecDeque<Reading>,
    evicted: u64,
}

impl ReadingBuffer {
    /// Create an empty buffer holding at most `capacity` readings.
    ///
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: VecDeque::with_capacity(capacity),
            evicted: 0,
        }
    }

    /// Append a reading, evicting the oldest if the buffer is full.
    pub fn push(&mut self, reading: Reading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
            self.evicted += 1;
        }
        self.readings.push_back(reading);
    }

    /// Get the maximum number of readings kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of readings currently held.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Number of readings dropped to make room since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Get the most recent reading.
    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    /// Iterate readings from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// Remove and return all readings, oldest first.
    pub fn drain(&mut self) -> Vec<Reading> {
        self.readings.drain(..).collect()
    }

    /// Export the buffer to CSV format.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("Timestamp,TemperatureC,HumidityPercent,BatteryPercent,DeviceId\n");

        for reading in &self.readings {
            csv.push_str(&format!(
                "{},{:.1},{},{},{}\n",
                reading.timestamp_string(),
                reading.temperature_celsius,
                reading.humidity,
                reading
                    .battery_percent
                    .map(|b| b.to_string())
                    .unwrap_or_default(),
                reading.device_id.as_deref().unwrap_or_default()
            ));
        }

        csv
    }
}

impl Default for ReadingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
