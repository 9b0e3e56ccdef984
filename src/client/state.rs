//! Reconnect state machine
//!
//! `Disconnected -> Connecting -> Connected -> Backoff -> Connecting ...`,
//! ending in `Failed` once `max_attempts` consecutive failures pile up.

use std::fmt;
use std::time::Duration;

use crate::config::ClientConfig;

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl From<&ClientConfig> for BackoffPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            cap: Duration::from_millis(config.backoff_cap_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after the `failures`-th consecutive failure:
    /// `min(base * 2^(failures - 1), cap)`
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff { attempt: u32, delay: Duration },
    /// Terminal
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Backoff { attempt, delay } => {
                write!(f, "BACKOFF(attempt {}, {:?})", attempt, delay)
            }
            ConnectionState::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: BackoffPolicy,
    state: ConnectionState,
    /// Consecutive failures since the last successful connect
    attempt: u32,
}

impl ReconnectMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempt: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Start a connection attempt; a failed machine stays failed
    pub fn begin_connect(&mut self) -> ConnectionState {
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Connecting;
        }
        self.state
    }

    /// A connection opened: the failure count starts over
    pub fn on_connected(&mut self) {
        self.attempt = 0;
        self.state = ConnectionState::Connected;
    }

    /// Record a failed attempt or a dropped connection
    pub fn on_failure(&mut self) -> ConnectionState {
        if self.state == ConnectionState::Failed {
            return self.state;
        }
        self.attempt = self.attempt.saturating_add(1);
        self.state = if self.attempt >= self.policy.max_attempts {
            ConnectionState::Failed
        } else {
            ConnectionState::Backoff {
                attempt: self.attempt,
                delay: self.policy.delay(self.attempt),
            }
        };
        self.state
    }

    /// The server asked us to reconnect; this is not a failure
    pub fn on_reconnect_directive(&mut self) -> ConnectionState {
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_up_to_cap() {
        let policy = BackoffPolicy::default();
        let delays: Vec<_> = (1..=7).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.delay(100), Duration::from_secs(30));
    }

    #[test]
    fn test_five_failures_reach_failed() {
        let mut machine = ReconnectMachine::new(BackoffPolicy::default());
        for n in 1..5 {
            machine.begin_connect();
            assert!(matches!(
                machine.on_failure(),
                ConnectionState::Backoff { attempt, .. } if attempt == n
            ));
        }
        machine.begin_connect();
        assert_eq!(machine.on_failure(), ConnectionState::Failed);

        // Terminal
        assert_eq!(machine.begin_connect(), ConnectionState::Failed);
        assert_eq!(machine.on_reconnect_directive(), ConnectionState::Failed);
    }

    #[test]
    fn test_success_resets_attempts() {
        let mut machine = ReconnectMachine::new(BackoffPolicy::default());
        machine.begin_connect();
        machine.on_failure();
        machine.begin_connect();
        machine.on_failure();
        assert_eq!(machine.attempt(), 2);

        machine.begin_connect();
        machine.on_connected();
        assert_eq!(machine.attempt(), 0);
        assert_eq!(machine.state(), ConnectionState::Connected);

        assert_eq!(
            machine.on_failure(),
            ConnectionState::Backoff {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_directive_carries_no_penalty() {
        let mut machine = ReconnectMachine::new(BackoffPolicy::default());
        machine.begin_connect();
        machine.on_connected();
        assert_eq!(machine.on_reconnect_directive(), ConnectionState::Disconnected);
        assert_eq!(machine.attempt(), 0);
        assert_eq!(machine.begin_connect(), ConnectionState::Connecting);
    }
}
