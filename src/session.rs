//! Connected session lifecycle.
//!
//! A [`SessionController`] drives one logger through repeated cycles of
//! connect, subscribe, listen for a dwell window, unsubscribe and
//! disconnect, backing off between cycles. Transport failures never end
//! the session; they send the current cycle down the release and back-off
//! path. Only cancellation (or the cycle policy) stops it.

use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::link::{BleLink, LinkHandle, RawPacket, ServiceInfo};
use crate::ble::uuids::PASSWORD_UUID;
use crate::config::{CyclePolicy, SessionConfig, SessionMode};
use crate::data::TargetDevice;
use crate::error::{Error, Result};
use crate::router::NotificationRouter;
use crate::selector::DeviceSelector;
use crate::sink::TelemetrySink;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// Not running.
    #[default]
    Idle,
    /// Waiting for a target device.
    Selecting,
    /// Opening a connection.
    Connecting,
    /// Unlocking and enabling notifications.
    Subscribing,
    /// Receiving notifications for the dwell window.
    Listening,
    /// Disabling notifications.
    Unsubscribing,
    /// Closing the connection.
    Disconnecting,
    /// Waiting before the next connection attempt.
    BackoffWait,
}

impl SessionState {
    /// Check if a connection may be open in this state.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Subscribing | Self::Listening | Self::Unsubscribing | Self::Disconnecting
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Selecting => write!(f, "Selecting"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Subscribing => write!(f, "Subscribing"),
            Self::Listening => write!(f, "Listening"),
            Self::Unsubscribing => write!(f, "Unsubscribing"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::BackoffWait => write!(f, "BackoffWait"),
        }
    }
}

/// Event for session state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// The new state.
    pub state: SessionState,
    /// Connection attempt the transition belongs to (0 before the first).
    pub attempt: u64,
}

/// Counters kept by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionStats {
    /// Connection attempts made.
    pub attempts: u64,
    /// Connection attempts that failed.
    pub connect_failures: u64,
    /// Cycles that reached the end of their dwell window.
    pub completed_cycles: u64,
    /// Values handed to the sink.
    pub readings_emitted: u64,
}

/// How a single cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The dwell window elapsed and the connection was released.
    Completed,
    /// A transport step failed; the connection (if any) was released.
    Failed(Error),
    /// Cancellation was requested; the connection (if any) was released.
    Cancelled,
}

/// Drives connect/subscribe/listen/release cycles against one device.
pub struct SessionController<L> {
    link: Arc<L>,
    config: SessionConfig,
    router: Arc<NotificationRouter>,
    state: RwLock<SessionState>,
    stats: Mutex<SessionStats>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl<L: BleLink> SessionController<L> {
    /// Create a controller routing to `sink` with the standard bindings.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn new(link: Arc<L>, config: SessionConfig, sink: Arc<dyn TelemetrySink>) -> Result<Self> {
        Self::with_router(
            link,
            config,
            Arc::new(NotificationRouter::with_default_bindings(sink)),
        )
    }

    /// Create a controller with a custom router.
    pub fn with_router(
        link: Arc<L>,
        config: SessionConfig,
        router: Arc<NotificationRouter>,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            link,
            config,
            router,
            state: RwLock::new(SessionState::Idle),
            stats: Mutex::new(SessionStats::default()),
            event_tx,
        })
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Get a snapshot of the session counters.
    pub fn stats(&self) -> SessionStats {
        *self.stats.lock()
    }

    /// Get the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the router.
    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    /// Subscribe to state changes.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
        let attempt = self.stats.lock().attempts;
        debug!("Session state: {} (attempt {})", state, attempt);
        let _ = self.event_tx.send(SessionEvent { state, attempt });
    }

    /// Run the session until cancelled or the cycle policy is satisfied.
    ///
    /// Returns the final counters. The only error is a selector failure;
    /// transport failures are retried.
    pub async fn run(
        &self,
        selector: &dyn DeviceSelector,
        cancel: CancellationToken,
    ) -> Result<SessionStats> {
        self.set_state(SessionState::Selecting);

        let target = match until_cancelled(&cancel, selector.select()).await {
            None => {
                debug!("Cancelled while selecting a device");
                self.set_state(SessionState::Idle);
                return Ok(self.stats());
            }
            Some(Ok(target)) => target,
            Some(Err(e)) => {
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        info!("Starting {} session with {}", self.config.mode, target);

        loop {
            match self.run_cycle(&target, &cancel).await {
                CycleOutcome::Cancelled => break,
                CycleOutcome::Completed => {
                    self.stats.lock().completed_cycles += 1;
                    if self.config.cycle_policy == CyclePolicy::UntilFirstSuccess {
                        break;
                    }
                }
                CycleOutcome::Failed(e) if e.is_transport() => debug!("Cycle failed: {}", e),
                CycleOutcome::Failed(e) => warn!("Cycle failed: {}", e),
            }

            if !self.backoff(&cancel).await {
                break;
            }
        }

        self.set_state(SessionState::Idle);
        let stats = self.stats();
        info!(
            "Session with {} ended after {} attempts ({} completed cycles, {} values)",
            target.address, stats.attempts, stats.completed_cycles, stats.readings_emitted
        );
        Ok(stats)
    }

    /// Run one connect/subscribe/listen/release cycle.
    ///
    /// Every handle acquired here is released before returning, including
    /// when `cancel` fires in the middle of a transport call. A link that
    /// drops while listening, or is found already gone on release, fails
    /// the cycle with [`Error::UnexpectedDisconnect`].
    pub async fn run_cycle(&self, target: &TargetDevice, cancel: &CancellationToken) -> CycleOutcome {
        if cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        self.stats.lock().attempts += 1;
        self.set_state(SessionState::Connecting);

        let handle = match until_cancelled(cancel, self.link.connect(&target.address)).await {
            None => {
                debug!("Cancelled while connecting to {}", target.address);
                return CycleOutcome::Cancelled;
            }
            Some(Ok(handle)) => handle,
            Some(Err(e)) => {
                warn!("Failed to connect to {}: {}", target.address, e);
                self.stats.lock().connect_failures += 1;
                return CycleOutcome::Failed(e);
            }
        };
        info!("Connected to {} ({})", target.display_name, handle);

        self.set_state(SessionState::Subscribing);
        let (tx, mut rx) = mpsc::unbounded_channel::<RawPacket>();

        match until_cancelled(cancel, self.unlock(&handle)).await {
            None => {
                self.release(&handle, &[]).await;
                return CycleOutcome::Cancelled;
            }
            Some(Err(e)) => {
                warn!("Failed to unlock {}: {}", handle, e);
                self.release(&handle, &[]).await;
                return CycleOutcome::Failed(e);
            }
            Some(Ok(())) => {}
        }

        let mut subscribed = Vec::with_capacity(self.config.channels.len());
        for channel in &self.config.channels {
            let subscribe = self.link.subscribe(&handle, *channel, tx.clone());
            match until_cancelled(cancel, subscribe).await {
                None => {
                    // The abandoned request may still have gone through.
                    subscribed.push(*channel);
                    self.release(&handle, &subscribed).await;
                    return CycleOutcome::Cancelled;
                }
                Some(Err(e)) => {
                    warn!("Failed to subscribe to {} on {}: {}", channel, handle, e);
                    self.release(&handle, &subscribed).await;
                    return CycleOutcome::Failed(e);
                }
                Some(Ok(())) => subscribed.push(*channel),
            }
        }
        drop(tx);

        self.set_state(SessionState::Listening);
        let window = tokio::time::sleep(self.config.dwell);
        tokio::pin!(window);

        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break ListenEnd::Cancelled,
                _ = &mut window => break ListenEnd::Elapsed,
                packet = rx.recv() => match packet {
                    Some(packet) => self.route(&packet),
                    None => break ListenEnd::LinkLost,
                },
            }
        };

        while let Ok(packet) = rx.try_recv() {
            self.route(&packet);
        }

        let already_gone = self.release(&handle, &subscribed).await;

        match end {
            ListenEnd::Cancelled => CycleOutcome::Cancelled,
            ListenEnd::LinkLost => {
                warn!("Lost {} while listening", handle);
                CycleOutcome::Failed(Error::UnexpectedDisconnect)
            }
            ListenEnd::Elapsed if already_gone => {
                warn!("{} dropped before the dwell window ended", handle);
                CycleOutcome::Failed(Error::UnexpectedDisconnect)
            }
            ListenEnd::Elapsed => CycleOutcome::Completed,
        }
    }

    /// Connect to `target` and list its services.
    ///
    /// Connection failures are retried with the configured back-off until
    /// one succeeds or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if cancelled first.
    pub async fn list_services(
        &self,
        target: &TargetDevice,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServiceInfo>> {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.stats.lock().attempts += 1;
            self.set_state(SessionState::Connecting);

            match until_cancelled(cancel, self.link.connect(&target.address)).await {
                None => break,
                Some(Ok(handle)) => {
                    let services = until_cancelled(cancel, self.link.services(&handle)).await;
                    self.release(&handle, &[]).await;

                    match services {
                        None => break,
                        Some(Ok(services)) => {
                            self.stats.lock().completed_cycles += 1;
                            self.set_state(SessionState::Idle);
                            return Ok(services);
                        }
                        Some(Err(e)) => warn!("Failed to list services of {}: {}", handle, e),
                    }
                }
                Some(Err(e)) => {
                    warn!("Failed to connect to {}: {}", target.address, e);
                    self.stats.lock().connect_failures += 1;
                }
            }

            if !self.backoff(cancel).await {
                break;
            }
        }

        self.set_state(SessionState::Idle);
        Err(Error::Cancelled)
    }

    async fn unlock(&self, handle: &LinkHandle) -> Result<()> {
        if self.config.mode != SessionMode::StoredSync {
            return Ok(());
        }
        debug!("Writing unlock payload to {}", handle);
        self.link
            .write(handle, PASSWORD_UUID, &self.config.unlock_payload)
            .await
    }

    fn route(&self, packet: &RawPacket) {
        let emitted = self.router.route(packet);
        self.stats.lock().readings_emitted += emitted as u64;
    }

    /// Unsubscribe `channels` and disconnect, logging rather than failing.
    ///
    /// Returns true if the transport reported the link as already gone.
    async fn release(&self, handle: &LinkHandle, channels: &[Uuid]) -> bool {
        let mut already_gone = false;

        if !channels.is_empty() {
            self.set_state(SessionState::Unsubscribing);
            for channel in channels {
                match self.link.unsubscribe(handle, *channel).await {
                    Ok(()) => {}
                    Err(Error::UnexpectedDisconnect) => already_gone = true,
                    Err(e) => debug!("Unsubscribe from {} on {} failed: {}", channel, handle, e),
                }
            }
        }

        self.set_state(SessionState::Disconnecting);
        match self.link.disconnect(handle).await {
            Ok(()) => debug!("Released {}", handle),
            Err(Error::UnexpectedDisconnect) => {
                debug!("{} already disconnected", handle);
                already_gone = true;
            }
            Err(e) => warn!("Disconnect of {} failed: {}", handle, e),
        }
        already_gone
    }

    /// Wait out the back-off delay. Returns false if cancelled first.
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        self.set_state(SessionState::BackoffWait);
        until_cancelled(cancel, tokio::time::sleep(self.config.backoff))
            .await
            .is_some()
    }
}

/// Why the listening phase ended.
enum ListenEnd {
    Elapsed,
    Cancelled,
    LinkLost,
}

/// Await `future` unless `cancel` fires first.
///
/// An already-cancelled token wins without polling `future`.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

impl<L> std::fmt::Debug for SessionController<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("config", &self.config)
            .field("state", &*self.state.read())
            .field("stats", &*self.stats.lock())
            .finish()
    }
}
