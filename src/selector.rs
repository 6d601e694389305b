//! Target device selection.
//!
//! The session asks a [`DeviceSelector`] for its target once, before the
//! first connection attempt.

use async_trait::async_trait;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::data::{known_device, TargetDevice, KNOWN_DEVICES};
use crate::error::{Error, Result};

/// Source of the device a session should talk to.
#[async_trait]
pub trait DeviceSelector: Send + Sync {
    /// Produce the target device.
    async fn select(&self) -> Result<TargetDevice>;
}

/// Always selects the same device.
#[derive(Debug, Clone)]
pub struct FixedSelector {
    target: TargetDevice,
}

impl FixedSelector {
    /// Create a selector for `target`.
    pub fn new(target: TargetDevice) -> Self {
        Self { target }
    }
}

#[async_trait]
impl DeviceSelector for FixedSelector {
    async fn select(&self) -> Result<TargetDevice> {
        Ok(self.target.clone())
    }
}

/// Prompts for an index into [`KNOWN_DEVICES`] until a valid one is entered.
pub struct ConsoleSelector<R> {
    input: Mutex<R>,
}

impl ConsoleSelector<tokio::io::BufReader<tokio::io::Stdin>> {
    /// Create a selector reading from standard input.
    pub fn stdin() -> Self {
        Self::new(tokio::io::BufReader::new(tokio::io::stdin()))
    }
}

impl<R> ConsoleSelector<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Create a selector reading lines from `input`.
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }

    fn prompt() {
        println!("Select device:");
        for (index, (address, name)) in KNOWN_DEVICES.iter().enumerate() {
            println!("{}: {} / {}", index, name, address);
        }
        print!("> ");
        let _ = std::io::stdout().flush();
    }
}

/// Parse one line of console input as a known-device index.
pub fn parse_selection(line: &str) -> Option<TargetDevice> {
    line.trim().parse::<usize>().ok().and_then(known_device)
}

#[async_trait]
impl<R> DeviceSelector for ConsoleSelector<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn select(&self) -> Result<TargetDevice> {
        let mut input = self.input.lock().await;
        loop {
            Self::prompt();

            let mut line = String::new();
            let read = input.read_line(&mut line).await.map_err(|e| Error::InvalidData {
                context: format!("Failed to read selection: {}", e),
            })?;
            if read == 0 {
                return Err(Error::Cancelled);
            }

            match parse_selection(&line) {
                Some(target) => {
                    debug!("Selected {}", target);
                    return Ok(target);
                }
                None => println!("Invalid Input"),
            }
        }
    }
}
