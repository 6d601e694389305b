//! Live monitoring example
//!
//! Cycles a live session against a logger and consumes the decoded samples
//! from a broadcast channel, keeping a running min/max per quantity.
//!
//! Run with: cargo run --example live_monitor
//!
//! To pick the logger by index into the known-device table:
//!   cargo run --example live_monitor -- --device 0

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tzone_ble::{
    known_device, BtleplugLink, ChannelSink, Error, FanoutSink, FixedSelector, LiveValue, Result,
    SessionConfig, SessionController, Telemetry, TracingSink,
};

#[derive(Default)]
struct Range {
    min: Option<f64>,
    max: Option<f64>,
}

impl Range {
    fn update(&mut self, value: f64) {
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,tzone_ble=info")
        .init();

    let args: Vec<String> = std::env::args().collect();
    let index = args
        .iter()
        .position(|arg| arg == "--device")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1);
    let target = known_device(index).ok_or_else(|| Error::InvalidParameter {
        name: "device".to_string(),
        value: index.to_string(),
    })?;

    println!("Live monitor for {}", target);
    println!("Press Ctrl+C to stop\n");

    let channel = Arc::new(ChannelSink::new(64));
    let mut rx = channel.subscribe();
    let sink = FanoutSink::new().with(channel).with(Arc::new(TracingSink));

    let link = Arc::new(BtleplugLink::new().await?);
    let config = SessionConfig::live().with_backoff(Duration::from_secs(2));
    let session = SessionController::new(link, config, Arc::new(sink))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        });
    }

    let printer = tokio::spawn(async move {
        let mut temperature = Range::default();
        let mut humidity = Range::default();

        loop {
            let sample = match rx.recv().await {
                Ok(Telemetry::Live(sample)) => sample,
                Ok(Telemetry::Reading(_)) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            match sample.value {
                LiveValue::Temperature(value) => temperature.update(value),
                LiveValue::Humidity(value) => humidity.update(value),
                LiveValue::Battery(_) => {}
            }
            println!(
                "{}  (temp {:?}..{:?}, humidity {:?}..{:?})",
                sample, temperature.min, temperature.max, humidity.min, humidity.max
            );
        }
    });

    let stats = session.run(&FixedSelector::new(target), cancel).await?;
    drop(session);
    let _ = printer.await;

    println!(
        "\n{} attempts, {} cycles, {} samples",
        stats.attempts, stats.completed_cycles, stats.readings_emitted
    );
    Ok(())
}
