//! Interactive TZONE logger reader
//!
//! Asks for a mode and a device, then runs until Ctrl+C:
//! - Broadcast: decode advertisements without connecting
//! - Stored: unlock the logger and print its stored records
//! - Services: list the GATT services of the logger
//! - Live: print live temperature and humidity notifications
//!
//! Run with: cargo run --example tzone_reader
//!
//! Options:
//!   --host-time     read stored timestamps in the host time zone
//!   --timeout SECS  discovery and connect timeout (default 15)
//!
//! Set `RUST_LOG=tzone_ble=debug` to follow the session state machine.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tzone_ble::{
    BroadcastMonitor, BtleplugLink, ConsoleSelector, ConsoleSink, CyclePolicy, DeviceSelector,
    FixedSelector, MonitorConfig, NotificationRouter, RecordClock, Result, SessionConfig,
    SessionController, SessionMode,
};

#[derive(Debug, Clone, Copy)]
enum Mode {
    Broadcast,
    Stored,
    Services,
    Live,
}

const MODES: [(Mode, &str); 4] = [
    (Mode::Broadcast, "Broadcast (no connection)"),
    (Mode::Stored, "Stored data sync"),
    (Mode::Services, "List services"),
    (Mode::Live, "Live readings"),
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,tzone_ble=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let clock = if args.iter().any(|arg| arg == "--host-time") {
        RecordClock::HostLocal
    } else {
        RecordClock::Utc
    };
    let timeout = args
        .iter()
        .position(|arg| arg == "--timeout")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs);

    println!("TZONE Logger Reader");
    println!("===================\n");

    let mut input = BufReader::new(tokio::io::stdin());

    let mode = loop {
        println!("Select mode:");
        for (index, (_, label)) in MODES.iter().enumerate() {
            println!("{}: {}", index, label);
        }
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if input.read_line(&mut line).await.unwrap_or(0) == 0 {
            return Ok(());
        }
        match line.trim().parse::<usize>().ok().and_then(|i| MODES.get(i)) {
            Some((mode, _)) => break *mode,
            None => println!("Invalid Input"),
        }
    };

    let selector = ConsoleSelector::new(input);
    let target = selector.select().await?;
    println!("\n{}\n", target);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nStopping...");
                cancel.cancel();
            }
        });
    }

    let mut link = BtleplugLink::new().await?;
    if let Some(timeout) = timeout {
        link = link
            .with_discovery_timeout(timeout)
            .with_connect_timeout(timeout);
    }
    let link = Arc::new(link);
    let sink = Arc::new(ConsoleSink);

    match mode {
        Mode::Broadcast => {
            let monitor = BroadcastMonitor::new(link, MonitorConfig::default(), sink)?;
            let stats = monitor.run(&target, cancel).await;
            println!("\n{} readings from {} scan windows", stats.readings_emitted, stats.windows);
        }
        Mode::Stored => {
            let config = SessionConfig::for_mode(SessionMode::StoredSync)
                .with_cycle_policy(CyclePolicy::UntilFirstSuccess);
            let router = NotificationRouter::with_default_bindings(sink).with_record_clock(clock);
            let session = SessionController::with_router(link, config, Arc::new(router))?;
            let stats = session.run(&FixedSelector::new(target), cancel).await?;
            println!("\n{} stored readings", stats.readings_emitted);
        }
        Mode::Services => {
            let session = SessionController::new(link, SessionConfig::live(), sink)?;
            for service in session.list_services(&target, &cancel).await? {
                println!("Service: {}", service);
                for characteristic in &service.characteristics {
                    println!("  Characteristic: {}", characteristic);
                }
            }
        }
        Mode::Live => {
            let config = SessionConfig::for_mode(SessionMode::Live);
            let session = SessionController::new(link, config, sink)?;
            let stats = session.run(&FixedSelector::new(target), cancel).await?;
            println!(
                "\n{} cycles, {} connection failures",
                stats.completed_cycles, stats.connect_failures
            );
        }
    }

    Ok(())
}
