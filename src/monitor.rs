//! Broadcast mode: decode advertisements without connecting.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::link::{Advertisement, BleLink};
use crate::config::MonitorConfig;
use crate::data::TargetDevice;
use crate::error::Result;
use crate::router::NotificationRouter;
use crate::sink::TelemetrySink;

/// Counters kept by a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorStats {
    /// Scan windows started.
    pub windows: u64,
    /// Scan windows that ended in an error.
    pub scan_failures: u64,
    /// Readings handed to the sink.
    pub readings_emitted: u64,
}

/// Scans in fixed windows and decodes the target's advertisements.
pub struct BroadcastMonitor<L> {
    link: Arc<L>,
    config: MonitorConfig,
    router: Arc<NotificationRouter>,
}

impl<L: BleLink> BroadcastMonitor<L> {
    /// Create a monitor routing to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn new(link: Arc<L>, config: MonitorConfig, sink: Arc<dyn TelemetrySink>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            link,
            config,
            router: Arc::new(NotificationRouter::new(sink)),
        })
    }

    /// Get the router.
    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    /// Scan until cancelled (or `max_windows` windows have run).
    ///
    /// The scanner is restarted after every window. A failed window is
    /// followed by the configured back-off. Cancellation is handed to the
    /// scan itself, so the window in progress is always stopped by the
    /// transport before this returns.
    pub async fn run(&self, target: &TargetDevice, cancel: CancellationToken) -> MonitorStats {
        info!("Monitoring broadcasts from {}", target);
        let mut stats = MonitorStats::default();

        while !cancel.is_cancelled() {
            if let Some(max) = self.config.max_windows {
                if stats.windows >= u64::from(max) {
                    break;
                }
            }
            stats.windows += 1;

            let (tx, mut rx) = mpsc::unbounded_channel::<Advertisement>();
            let scan = self.link.scan(self.config.scan_window, tx, cancel.clone());
            tokio::pin!(scan);

            let result = loop {
                tokio::select! {
                    Some(advertisement) = rx.recv() => {
                        stats.readings_emitted +=
                            self.router.route_advertisement(&advertisement, target) as u64;
                    }
                    result = &mut scan => break result,
                }
            };

            while let Ok(advertisement) = rx.try_recv() {
                stats.readings_emitted += self.router.route_advertisement(&advertisement, target) as u64;
            }

            if cancel.is_cancelled() {
                debug!("Scan window {} cut short by cancellation", stats.windows);
                break;
            }

            match result {
                Ok(()) => debug!("Scan window {} finished", stats.windows),
                Err(e) => {
                    warn!("Scan window {} failed: {}", stats.windows, e);
                    stats.scan_failures += 1;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.backoff) => {}
                    }
                }
            }
        }

        info!(
            "Broadcast monitor stopped after {} windows ({} readings)",
            stats.windows, stats.readings_emitted
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::link::MockBleLink;
    use crate::ble::uuids::TZONE_SERVICE_DATA_UUID;
    use crate::data::TZ_BT04_ADDRESS;
    use crate::error::Error;
    use crate::sink::BufferSink;
    use crate::utils::from_hex;
    use std::collections::HashMap;
    use std::time::Duration;

    fn advertisement(address: &str) -> Advertisement {
        let mut service_data = HashMap::new();
        service_data.insert(
            TZONE_SERVICE_DATA_UUID,
            from_hex("00000000abcdef01640008fc1194").unwrap(),
        );
        Advertisement {
            address: address.to_string(),
            service_data,
            rssi: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_filters_on_target() {
        let mut link = MockBleLink::new();
        link.expect_scan().times(2).returning(|_, sender, _| {
            sender.send(advertisement("11:22:33:44:55:66")).unwrap();
            sender.send(advertisement(TZ_BT04_ADDRESS)).unwrap();
            Ok(())
        });

        let sink = Arc::new(BufferSink::new(8));
        let monitor = BroadcastMonitor::new(
            Arc::new(link),
            MonitorConfig::default().with_max_windows(2),
            sink.clone(),
        )
        .unwrap();

        let stats = monitor
            .run(&TargetDevice::new(TZ_BT04_ADDRESS, "TZ-BT04"), CancellationToken::new())
            .await;

        assert_eq!(stats.windows, 2);
        assert_eq!(stats.readings_emitted, 2);
        let reading = &sink.readings()[0];
        assert_eq!(reading.device_id.as_deref(), Some("abcdef01"));
        assert_eq!(reading.battery_percent, Some(100));
        assert_eq!(reading.temperature_celsius, 23.0);
        assert_eq!(reading.humidity.percent(), 45.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_backs_off_after_failed_scan() {
        let mut link = MockBleLink::new();
        link.expect_scan()
            .times(2)
            .returning(|_, _, _| Err(Error::BluetoothUnavailable));

        let sink = Arc::new(BufferSink::new(8));
        let monitor = BroadcastMonitor::new(
            Arc::new(link),
            MonitorConfig::default()
                .with_backoff(Duration::from_secs(5))
                .with_max_windows(2),
            sink,
        )
        .unwrap();

        let start = tokio::time::Instant::now();
        let stats = monitor
            .run(&TargetDevice::new(TZ_BT04_ADDRESS, "TZ-BT04"), CancellationToken::new())
            .await;

        assert_eq!(stats.scan_failures, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_monitor_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let monitor = BroadcastMonitor::new(
            Arc::new(MockBleLink::new()),
            MonitorConfig::default(),
            Arc::new(BufferSink::new(1)),
        )
        .unwrap();

        let stats = monitor
            .run(&TargetDevice::new(TZ_BT04_ADDRESS, "TZ-BT04"), cancel)
            .await;
        assert_eq!(stats, MonitorStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_hands_cancellation_to_scan() {
        let cancel = CancellationToken::new();
        let mut link = MockBleLink::new();
        // Cancelling the scan's token must stop the monitor too.
        link.expect_scan()
            .times(1)
            .returning(|_, sender, token| {
                sender.send(advertisement(TZ_BT04_ADDRESS)).unwrap();
                token.cancel();
                Ok(())
            });

        let sink = Arc::new(BufferSink::new(8));
        let monitor =
            BroadcastMonitor::new(Arc::new(link), MonitorConfig::default(), sink.clone()).unwrap();

        let stats = monitor
            .run(&TargetDevice::new(TZ_BT04_ADDRESS, "TZ-BT04"), cancel.clone())
            .await;

        assert!(cancel.is_cancelled());
        assert_eq!(stats.windows, 1);
        assert_eq!(stats.readings_emitted, 1);
        assert_eq!(sink.readings().len(), 1);
    }
}
