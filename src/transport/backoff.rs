//! Reconnect delay policy
//!
//! The default is a flat delay before every attempt. The exponential
//! variant doubles the delay per failed attempt up to a cap and, with
//! jitter enabled, picks a random delay in the upper half of the current
//! step so that many clients do not reconnect in lockstep.

use crate::config::{BackoffKind, TransportConfig};
use rand::Rng;
use std::time::Duration;

/// Delay generator for reconnect attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    kind: BackoffKind,
    initial: Duration,
    max: Duration,
    jitter: bool,
    attempt: u32,
}

impl Backoff {
    /// Flat delay
    pub fn flat(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Flat,
            initial: delay,
            max: delay,
            jitter: false,
            attempt: 0,
        }
    }

    /// Exponential delay starting at `initial` and capped at `max`
    pub fn exponential(initial: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            initial,
            max,
            jitter,
            attempt: 0,
        }
    }

    /// Build from configuration
    pub fn from_config(config: &TransportConfig) -> Self {
        let initial = Duration::from_millis(config.reconnect_delay_ms);
        match config.backoff {
            BackoffKind::Flat => Self::flat(initial),
            BackoffKind::Exponential => Self::exponential(
                initial,
                Duration::from_millis(config.max_reconnect_delay_ms),
                config.jitter,
            ),
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let attempt = self.attempt;
        self.attempt = self.attempt.saturating_add(1);

        match self.kind {
            BackoffKind::Flat => self.initial,
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.min(16));
                let step = self.initial.saturating_mul(factor).min(self.max);
                if self.jitter {
                    let half = step / 2;
                    let extra_ms = rand::rng().random_range(0..=half.as_millis() as u64);
                    half + Duration::from_millis(extra_ms)
                } else {
                    step
                }
            }
        }
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_delay_never_grows() {
        let mut backoff = Backoff::flat(Duration::from_secs(2));
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        }
        assert_eq!(backoff.attempt(), 5);
    }

    #[test]
    fn test_exponential_doubles_until_cap() {
        let mut backoff =
            Backoff::exponential(Duration::from_millis(500), Duration::from_secs(3), false);
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 3000, 3000]);
    }

    #[test]
    fn test_jitter_stays_in_upper_half() {
        let mut backoff =
            Backoff::exponential(Duration::from_millis(1000), Duration::from_secs(60), true);
        for attempt in 0..6u32 {
            let step = 1000u128 * 2u128.pow(attempt);
            let delay = backoff.next_delay().as_millis();
            assert!(delay >= step / 2 && delay <= step, "delay {} step {}", delay, step);
        }
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff =
            Backoff::exponential(Duration::from_millis(100), Duration::from_secs(10), false);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_from_config_defaults_to_two_second_flat() {
        let mut backoff = Backoff::from_config(&TransportConfig::default());
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }
}
