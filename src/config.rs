//! Session and monitor configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::{HUMIDITY_UUID, SYNC_DATASWITCH_UUID, TEMPERATURE_UUID, UNLOCK_PAYLOAD};
use crate::error::{Error, Result};

/// Default delay between connection attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// Default dwell window in live mode.
pub const LIVE_DWELL: Duration = Duration::from_secs(2);

/// Default dwell window in stored-sync mode.
pub const STORED_SYNC_DWELL: Duration = Duration::from_secs(10);

/// Default broadcast scan window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(30);

/// What a connected session does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionMode {
    /// Subscribe to the live temperature and humidity characteristics.
    Live,
    /// Unlock the logger and subscribe to its stored records.
    StoredSync,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::StoredSync => write!(f, "stored-sync"),
        }
    }
}

/// When the session stops cycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CyclePolicy {
    /// Reconnect after every cycle until cancelled.
    #[default]
    Forever,
    /// Return after the first cycle that reached listening.
    UntilFirstSuccess,
}

/// Immutable configuration of a [`SessionController`](crate::SessionController).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Session mode.
    pub mode: SessionMode,
    /// Channels subscribed on every cycle, in order.
    pub channels: Vec<Uuid>,
    /// How long to stay subscribed per cycle.
    pub dwell: Duration,
    /// Delay before the next connection attempt.
    pub backoff: Duration,
    /// When to stop cycling.
    pub cycle_policy: CyclePolicy,
    /// Bytes written to the password characteristic before a stored sync.
    pub unlock_payload: Vec<u8>,
}

impl SessionConfig {
    /// Live mode: temperature and humidity for 2 s per cycle.
    pub fn live() -> Self {
        Self {
            mode: SessionMode::Live,
            channels: vec![TEMPERATURE_UUID, HUMIDITY_UUID],
            dwell: LIVE_DWELL,
            backoff: DEFAULT_BACKOFF,
            cycle_policy: CyclePolicy::Forever,
            unlock_payload: UNLOCK_PAYLOAD.to_vec(),
        }
    }

    /// Stored-sync mode: record stream for 10 s per cycle.
    pub fn stored_sync() -> Self {
        Self {
            mode: SessionMode::StoredSync,
            channels: vec![SYNC_DATASWITCH_UUID],
            dwell: STORED_SYNC_DWELL,
            ..Self::live()
        }
    }

    /// Default configuration for `mode`.
    pub fn for_mode(mode: SessionMode) -> Self {
        match mode {
            SessionMode::Live => Self::live(),
            SessionMode::StoredSync => Self::stored_sync(),
        }
    }

    /// Set the subscribed channels.
    pub fn with_channels(mut self, channels: Vec<Uuid>) -> Self {
        self.channels = channels;
        self
    }

    /// Set the dwell window.
    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    /// Set the reconnect delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the cycle policy.
    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    /// Set the unlock payload.
    pub fn with_unlock_payload(mut self, payload: Vec<u8>) -> Self {
        self.unlock_payload = payload;
        self
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for a zero dwell window, an
    /// empty channel list, or an empty unlock payload in stored-sync mode.
    pub fn validate(&self) -> Result<()> {
        if self.dwell.is_zero() {
            return Err(Error::InvalidParameter {
                name: "dwell".to_string(),
                value: format!("{:?}", self.dwell),
            });
        }
        if self.channels.is_empty() {
            return Err(Error::InvalidParameter {
                name: "channels".to_string(),
                value: "[]".to_string(),
            });
        }
        if self.mode == SessionMode::StoredSync && self.unlock_payload.is_empty() {
            return Err(Error::InvalidParameter {
                name: "unlock_payload".to_string(),
                value: "[]".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::live()
    }
}

/// Configuration of a [`BroadcastMonitor`](crate::BroadcastMonitor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonitorConfig {
    /// Length of each scan window.
    pub scan_window: Duration,
    /// Delay after a failed scan.
    pub backoff: Duration,
    /// Stop after this many windows; `None` runs until cancelled.
    pub max_windows: Option<u32>,
}

impl MonitorConfig {
    /// Set the scan window.
    pub fn with_scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    /// Set the delay after a failed scan.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Stop after `windows` scan windows.
    pub fn with_max_windows(mut self, windows: u32) -> Self {
        self.max_windows = Some(windows);
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.scan_window.is_zero() {
            return Err(Error::InvalidParameter {
                name: "scan_window".to_string(),
                value: format!("{:?}", self.scan_window),
            });
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_window: DEFAULT_SCAN_WINDOW,
            backoff: DEFAULT_BACKOFF,
            max_windows: None,
        }
    }
}
