//! Liveness detection for an authenticated connection.
//!
//! The monitor only decides; it never writes to the transport or
//! reconnects. The connection actor asks it what to do whenever its
//! deadline fires and reports every pong it receives.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use tally_core::config::SocketConfig;

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between probes. A probe left unanswered for one full
    /// interval marks the connection stale.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl From<&SocketConfig> for HeartbeatConfig {
    fn from(config: &SocketConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.heartbeat_interval_ms),
        }
    }
}

/// Timestamps of the last probe and the last acknowledgment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatState {
    pub last_probe_sent: Option<Instant>,
    pub last_ack_received: Option<Instant>,
}

/// What the actor must do when the monitor's deadline fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Write a ping envelope.
    SendProbe,
    /// The previous probe was never acknowledged.
    Stale { probe_sent: Instant },
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: HeartbeatState,
    next_tick: Option<Instant>,
    awaiting_ack: bool,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            state: HeartbeatState::default(),
            next_tick: None,
            awaiting_ack: false,
        }
    }

    /// Begin monitoring a freshly connected link. The first probe goes out
    /// one interval from `now`.
    pub fn start(&mut self, now: Instant) {
        self.state = HeartbeatState::default();
        self.awaiting_ack = false;
        self.next_tick = Some(now + self.config.interval);
    }

    /// Cancel monitoring. No deadline is reported until the next `start`.
    pub fn stop(&mut self) {
        self.next_tick = None;
        self.awaiting_ack = false;
    }

    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    /// When the actor must call [`HeartbeatMonitor::on_tick`] next.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        if self.awaiting_ack {
            let probe_sent = self.state.last_probe_sent.unwrap_or(now);
            warn!(
                "heartbeat stale: no pong within {:?} of probe",
                self.config.interval
            );
            self.stop();
            return HeartbeatAction::Stale { probe_sent };
        }

        self.state.last_probe_sent = Some(now);
        self.awaiting_ack = true;
        self.next_tick = Some(now + self.config.interval);
        HeartbeatAction::SendProbe
    }

    pub fn on_ack(&mut self, now: Instant) {
        if !self.awaiting_ack {
            debug!("unsolicited pong");
        }
        self.state.last_ack_received = Some(now);
        self.awaiting_ack = false;
    }
}
