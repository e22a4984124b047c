//! Exponential backoff with jitter for transport reconnection (L4).
//!
//! Mirrors the doubling-with-cap backoff a federated upstream reader uses
//! when its peer connection drops: start at `base`, double on every failed
//! attempt, cap at `max_delay`, and reset to `base` the moment a connection
//! attempt succeeds. Jitter is layered on top so a fleet of clients that all
//! drop at once don't all retry in lockstep.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            jitter_ratio: 0.3,
            max_attempts: Some(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAttemptsReached {
    pub attempts: u32,
}

/// Tracks reconnect state for a single transport connection.
///
/// `trigger()` is idempotent: calling it while already in a reconnecting
/// state is a no-op, so concurrent callers (a read-error and a heartbeat
/// timeout firing at once) can't double-count the same outage as two
/// attempts.
pub struct ReconnectController {
    config: BackoffConfig,
    current_delay: Duration,
    attempts: u32,
    reconnecting: bool,
}

impl ReconnectController {
    pub fn new(config: BackoffConfig) -> Self {
        let current_delay = config.base;
        ReconnectController {
            config,
            current_delay,
            attempts: 0,
            reconnecting: false,
        }
    }

    /// Mark the controller as entering a reconnect cycle. Returns `true` if
    /// this call actually started the cycle, `false` if one was already in
    /// progress (idempotent trigger).
    pub fn trigger(&mut self) -> bool {
        if self.reconnecting {
            return false;
        }
        self.reconnecting = true;
        true
    }

    /// Consume one attempt and return the delay to wait before making it,
    /// or `MaxAttemptsReached` once the configured ceiling is hit.
    pub fn next_delay(&mut self) -> Result<Duration, MaxAttemptsReached> {
        if let Some(max) = self.config.max_attempts {
            if self.attempts >= max {
                warn!(attempts = self.attempts, "reconnect: max_attempts reached");
                return Err(MaxAttemptsReached {
                    attempts: self.attempts,
                });
            }
        }
        let delay = self.current_delay;
        self.attempts += 1;
        self.current_delay = (self.current_delay * 2).min(self.config.max_delay);
        let delay = jittered(delay, self.config.jitter_ratio);
        debug!(attempt = self.attempts, delay_ms = delay.as_millis() as u64, "reconnect: scheduling next attempt");
        Ok(delay)
    }

    /// A connection attempt succeeded: reset backoff state for next time.
    pub fn on_connected(&mut self) {
        if self.attempts > 0 {
            debug!(attempts = self.attempts, "reconnect: connection restored, resetting backoff");
        }
        self.current_delay = self.config.base;
        self.attempts = 0;
        self.reconnecting = false;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }
}

fn jittered(delay: Duration, jitter_ratio: f64) -> Duration {
    if jitter_ratio <= 0.0 {
        return delay;
    }
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(0.0..=jitter_ratio);
    let millis = (delay.as_millis() as f64 * factor).max(0.0);
    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            jitter_ratio: 0.0,
            max_attempts: Some(5),
        }
    }

    #[test]
    fn delay_doubles_each_attempt_up_to_cap() {
        let mut c = ReconnectController::new(no_jitter());
        assert_eq!(c.next_delay().unwrap(), Duration::from_secs(1));
        assert_eq!(c.next_delay().unwrap(), Duration::from_secs(2));
        assert_eq!(c.next_delay().unwrap(), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let mut c = ReconnectController::new(BackoffConfig {
            max_attempts: Some(100),
            ..no_jitter()
        });
        for _ in 0..10 {
            let d = c.next_delay().unwrap();
            assert!(d <= Duration::from_secs(32));
        }
    }

    #[test]
    fn max_attempts_is_terminal() {
        let mut c = ReconnectController::new(BackoffConfig {
            max_attempts: Some(2),
            ..no_jitter()
        });
        c.next_delay().unwrap();
        c.next_delay().unwrap();
        let err = c.next_delay().unwrap_err();
        assert_eq!(err.attempts, 2);
    }

    #[test]
    fn on_connected_resets_backoff_and_attempts() {
        let mut c = ReconnectController::new(no_jitter());
        c.next_delay().unwrap();
        c.next_delay().unwrap();
        c.on_connected();
        assert_eq!(c.attempts(), 0);
        assert_eq!(c.next_delay().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn trigger_is_idempotent() {
        let mut c = ReconnectController::new(no_jitter());
        assert!(c.trigger());
        assert!(!c.trigger());
        c.on_connected();
        assert!(c.trigger());
    }

    #[test]
    fn jitter_keeps_delay_within_configured_ratio() {
        let mut c = ReconnectController::new(BackoffConfig {
            jitter_ratio: 0.3,
            max_attempts: Some(50),
            ..no_jitter()
        });
        let d = c.next_delay().unwrap();
        assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(1300));
    }
}
