//! Offline decoder example
//!
//! Decodes captured payloads without a Bluetooth adapter. Each line of
//! standard input is a hex string, optionally prefixed with its kind:
//!
//!   stored 6455a2c4...      sync data-switch notification
//!   broadcast 00000000...   vendor service data
//!
//! Lines without a prefix are decoded as stored records.
//!
//! Run with: cargo run --example decode_capture < capture.txt

use std::io::BufRead;

use tzone_ble::protocol::{parse_broadcast, parse_stored_hex};
use tzone_ble::ReadingBuffer;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("warn,tzone_ble=debug")
        .init();

    let mut buffer = ReadingBuffer::new(1024);
    let mut failures = 0usize;

    for (number, line) in std::io::stdin().lock().lines().enumerate() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (kind, hex) = line.split_once(' ').unwrap_or(("stored", line));
        let decoded = match kind {
            "broadcast" => parse_broadcast(hex.trim()).map(|r| vec![r]),
            _ => parse_stored_hex(hex.trim()),
        };

        match decoded {
            Ok(readings) => {
                for reading in readings {
                    println!("{}", reading);
                    buffer.push(reading);
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("line {}: {}", number + 1, e);
            }
        }
    }

    println!("\n{} readings decoded, {} lines failed", buffer.len(), failures);
    if !buffer.is_empty() {
        println!("\n{}", buffer.to_csv());
    }
}
