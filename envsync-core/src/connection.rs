//! Connectivity monitoring with debounced state transitions.
//!
//! ```text
//!   success            failure
//! ┌─────────┐  fail  ┌──────────────┐  N fails  ┌─────────┐
//! │ Online  │ ─────▶ │ Reconnecting │ ────────▶ │ Offline │
//! └─────────┘ ◀───── └──────────────┘ ◀──────── └─────────┘
//!              success              success
//! ```
//!
//! A probe result moves the *observed* state immediately; the *published*
//! state only follows once the observed state has held for the stability
//! window and been confirmed by a later probe, so one flaky probe never
//! flips it.

use crate::remote::RemoteService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reachability of the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Online,
    Reconnecting,
    Offline,
}

impl ConnectionState {
    /// Coarse go/no-go: anything but `Offline` may attempt network calls
    pub fn is_reachable(self) -> bool {
        !matches!(self, Self::Offline)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Reconnecting => "reconnecting",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe cadence and debounce tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Probe interval while online, in seconds
    pub online_probe_interval_secs: u64,
    /// Probe interval while reconnecting or offline, in seconds
    pub degraded_probe_interval_secs: u64,
    /// Per-probe timeout, in seconds
    pub probe_timeout_secs: u64,
    /// How long a new state must hold before it is published, in milliseconds
    pub stability_window_ms: u64,
    /// Consecutive failures while reconnecting before going offline
    pub offline_after_failures: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            online_probe_interval_secs: 30,
            degraded_probe_interval_secs: 5,
            probe_timeout_secs: 5,
            stability_window_ms: 2_000,
            offline_after_failures: 3,
        }
    }
}

impl ConnectionConfig {
    pub fn online_probe_interval(&self) -> Duration {
        Duration::from_secs(self.online_probe_interval_secs)
    }

    pub fn degraded_probe_interval(&self) -> Duration {
        Duration::from_secs(self.degraded_probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }
}

/// Pure state machine behind [`ConnectionMonitor`]
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    config: ConnectionConfig,
    observed: ConnectionState,
    published: ConnectionState,
    pending_since: Option<Instant>,
    consecutive_failures: u32,
    last_good: Option<DateTime<Utc>>,
}

impl ConnectionTracker {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            observed: ConnectionState::Online,
            published: ConnectionState::Online,
            pending_since: None,
            consecutive_failures: 0,
            last_good: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.published
    }

    pub fn observed(&self) -> ConnectionState {
        self.observed
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_good(&self) -> Option<DateTime<Utc>> {
        self.last_good
    }

    /// Feed one probe result. Returns the newly published state, if the
    /// published state changed.
    pub fn record_probe(&mut self, success: bool, now: Instant) -> Option<ConnectionState> {
        let next = if success {
            self.consecutive_failures = 0;
            self.last_good = Some(Utc::now());
            ConnectionState::Online
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            match self.observed {
                ConnectionState::Online => ConnectionState::Reconnecting,
                ConnectionState::Reconnecting
                    if self.consecutive_failures >= self.config.offline_after_failures =>
                {
                    ConnectionState::Offline
                }
                other => other,
            }
        };

        if next != self.observed {
            debug!(from = %self.observed, to = %next, "Observed connection change");
            self.observed = next;
            self.pending_since = (next != self.published).then_some(now);
        } else if next == self.published {
            self.pending_since = None;
        }

        self.settle(now)
    }

    /// Publish the observed state if it has held for the stability window.
    pub fn settle(&mut self, now: Instant) -> Option<ConnectionState> {
        let since = self.pending_since?;
        if self.observed == self.published {
            self.pending_since = None;
            return None;
        }
        if now.duration_since(since) < self.config.stability_window() {
            return None;
        }

        self.pending_since = None;
        self.published = self.observed;
        Some(self.published)
    }

    /// Shorter while not online for faster recovery detection
    pub fn next_probe_delay(&self) -> Duration {
        if self.observed == ConnectionState::Online && self.published == ConnectionState::Online {
            self.config.online_probe_interval()
        } else {
            self.config.degraded_probe_interval()
        }
    }
}

/// Tracks reachability of the remote service and publishes changes.
///
/// Two streams are published, both in emission order: the fine-grained
/// three-state value and a coarse reachable/unreachable boolean that only
/// fires when reachability flips.
pub struct ConnectionMonitor {
    config: ConnectionConfig,
    tracker: Mutex<ConnectionTracker>,
    current: watch::Sender<ConnectionState>,
    states: broadcast::Sender<ConnectionState>,
    reachability: broadcast::Sender<bool>,
}

impl ConnectionMonitor {
    pub fn new(config: ConnectionConfig) -> Self {
        let (current, _) = watch::channel(ConnectionState::Online);
        let (states, _) = broadcast::channel(32);
        let (reachability, _) = broadcast::channel(32);
        Self {
            tracker: Mutex::new(ConnectionTracker::new(config.clone())),
            config,
            current,
            states,
            reachability,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.current.borrow()
    }

    pub fn is_reachable(&self) -> bool {
        self.state().is_reachable()
    }

    /// Latest-value view of the state
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.current.subscribe()
    }

    /// Every published state change
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.states.subscribe()
    }

    /// Reachability flips only
    pub fn subscribe_reachability(&self) -> broadcast::Receiver<bool> {
        self.reachability.subscribe()
    }

    pub fn last_good(&self) -> Option<DateTime<Utc>> {
        self.tracker.lock().ok().and_then(|t| t.last_good())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.tracker
            .lock()
            .map(|t| t.consecutive_failures())
            .unwrap_or(0)
    }

    fn next_probe_delay(&self) -> Duration {
        self.tracker
            .lock()
            .map(|t| t.next_probe_delay())
            .unwrap_or_else(|_| self.config.degraded_probe_interval())
    }

    /// Feed a probe result and publish any resulting transition.
    pub fn record_probe(&self, success: bool) -> Option<ConnectionState> {
        let changed = {
            let mut tracker = match self.tracker.lock() {
                Ok(t) => t,
                Err(_) => {
                    warn!("Connection tracker lock poisoned");
                    return None;
                }
            };
            tracker.record_probe(success, Instant::now())
        };

        if let Some(state) = changed {
            self.publish(state);
        }
        changed
    }

    fn publish(&self, state: ConnectionState) {
        let was_reachable = self.current.borrow().is_reachable();
        self.current.send_replace(state);
        info!(state = %state, "Connection state changed");

        // No receivers is fine
        let _ = self.states.send(state);
        if was_reachable != state.is_reachable() {
            let _ = self.reachability.send(state.is_reachable());
        }
    }

    /// Run one liveness probe with the configured timeout
    pub async fn probe(&self, remote: &dyn RemoteService) -> bool {
        match tokio::time::timeout(self.config.probe_timeout(), remote.health_check()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                debug!("Health probe timed out");
                false
            }
        }
    }

    /// Probe until cancelled. Cancellation interrupts the wait between
    /// probes as well as an in-flight probe.
    pub async fn run(self: Arc<Self>, remote: Arc<dyn RemoteService>, cancel: CancellationToken) {
        info!("Connection monitor started");
        loop {
            let success = tokio::select! {
                _ = cancel.cancelled() => break,
                ok = self.probe(remote.as_ref()) => ok,
            };
            self.record_probe(success);

            let delay = self.next_probe_delay();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Connection monitor stopped");
    }

    pub fn spawn(
        self: &Arc<Self>,
        remote: Arc<dyn RemoteService>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(remote, cancel))
    }
}
