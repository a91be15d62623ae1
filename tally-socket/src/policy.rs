//! Reconnection backoff policy.
//!
//! `delay(attempt) = min(base * growth^attempt, max)`, optionally jittered
//! downwards so a fleet of clients does not reconnect in lockstep.

use std::time::Duration;

use tally_core::config::SocketConfig;

/// Configuration for socket reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether lost connections are retried at all.
    pub enabled: bool,
    /// Base delay between reconnection attempts.
    pub base_delay: Duration,
    /// Multiplier applied per attempt.
    pub growth_factor: f64,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0) removed from each delay at random.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: Duration::from_secs(1),
            growth_factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter_factor: 0.3,
        }
    }
}

impl From<&SocketConfig> for ReconnectConfig {
    fn from(config: &SocketConfig) -> Self {
        Self {
            enabled: config.reconnect_enabled,
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            growth_factor: config.reconnect_growth_factor,
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            max_attempts: config.reconnect_max_attempts,
            jitter_factor: config.reconnect_jitter_factor,
        }
    }
}

impl ReconnectConfig {
    /// Un-jittered backoff for the given zero-based attempt.
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let growth = self.growth_factor.max(1.0);

        let exponential = base * growth.powf(attempt as f64);
        let capped = if exponential.is_finite() {
            exponential.min(max)
        } else {
            max
        };
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Backoff with random jitter subtracted, so the result stays within
    /// `[delay * (1 - jitter), delay]` and never exceeds `max_delay`.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let scale = 1.0 - jitter * rand::random::<f64>();
        delay.mul_f64(scale)
    }

    /// Whether `attempt` (1-based) is past the configured cap.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt > self.max_attempts
    }
}

/// What to do after a failed connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after the delay.
    Retry(Duration),
    /// The attempt cap was exceeded.
    GiveUp,
    /// Automatic reconnection is turned off.
    Disabled,
}

/// Attempt counter and the most recently scheduled delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectContext {
    pub attempt: u32,
    pub next_delay: Option<Duration>,
}

impl ReconnectContext {
    /// Record one failed connection cycle and decide what happens next.
    pub fn record_failure(&mut self, config: &ReconnectConfig) -> ReconnectDecision {
        if !config.enabled {
            self.next_delay = None;
            return ReconnectDecision::Disabled;
        }

        self.attempt = self.attempt.saturating_add(1);
        if config.exhausted(self.attempt) {
            self.next_delay = None;
            return ReconnectDecision::GiveUp;
        }

        let delay = config.jittered_delay(self.attempt - 1);
        self.next_delay = Some(delay);
        ReconnectDecision::Retry(delay)
    }

    /// Called on every transition into `Connected` and on manual recovery.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = None;
    }
}
