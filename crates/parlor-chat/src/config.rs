//! Tunables for an open chat session.

use std::time::Duration;

use parlor_shared::constants::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_SECS, MIN_POLL_INTERVAL_MS,
};

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Interval between conversation snapshot fetches. Polling keeps running
    /// while the live channel is connected.
    /// Default: 2.5 s
    pub poll_interval: Duration,

    /// Optional slower interval used while the live channel reports healthy.
    /// Default: `None` (poll at `poll_interval` unconditionally)
    pub healthy_poll_interval: Option<Duration>,

    /// Bound applied to resolve, send and fetch calls. Expiry counts as a
    /// transport failure.
    /// Default: 12 s
    pub request_timeout: Duration,

    /// Capacity of the user-facing notice queue.
    pub notice_buffer: usize,

    /// Capacity of the command queue feeding the session task.
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            healthy_poll_interval: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            notice_buffer: 64,
            command_buffer: 64,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        let min = Duration::from_millis(MIN_POLL_INTERVAL_MS);
        if self.poll_interval < min {
            return Err(format!(
                "poll_interval must be at least {MIN_POLL_INTERVAL_MS} ms, got {:?}",
                self.poll_interval
            ));
        }
        if let Some(healthy) = self.healthy_poll_interval {
            if healthy < self.poll_interval {
                return Err("healthy_poll_interval must not be shorter than poll_interval".into());
            }
        }
        if self.request_timeout.is_zero() {
            return Err("request_timeout must be non-zero".into());
        }
        if self.notice_buffer == 0 || self.command_buffer == 0 {
            return Err("queue capacities must be non-zero".into());
        }
        Ok(())
    }

    /// Poll interval to use given the live channel state.
    pub fn effective_poll_interval(&self, live_connected: bool) -> Duration {
        match (live_connected, self.healthy_poll_interval) {
            (true, Some(healthy)) => healthy,
            _ => self.poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(2_500));
        assert_eq!(config.request_timeout, Duration::from_secs(12));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = SessionConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            healthy_poll_interval: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            request_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_poll_interval() {
        let config = SessionConfig {
            healthy_poll_interval: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        assert_eq!(config.effective_poll_interval(false), Duration::from_millis(2_500));
        assert_eq!(config.effective_poll_interval(true), Duration::from_secs(10));
        assert_eq!(
            SessionConfig::default().effective_poll_interval(true),
            Duration::from_millis(2_500)
        );
    }
}
