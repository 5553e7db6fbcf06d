// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Reconnect policies for a [`Session`](crate::session::Session).

use std::time::Duration;

use rand::Rng;

use crate::error::ConnectionError;

/// Trait defining interface for reconnect policies.
pub trait ReconnectPolicy: Send + Sync {
    /// Get the next reconnect delay.
    /// Returns None if no reconnect should be attempted.
    fn next_reconnect_delay(&self, prev_attempts: u32, error: &ConnectionError)
    -> Option<Duration>;
}

/// A reconnect policy that exponentially backs off the delay between
/// reconnect attempts, starting at `initial_delay` and multiplying by `base`
/// after every failed attempt, up to `max_wait`.
///
/// Jitter can subtract up to 10% of the delay so that multiple clients
/// disconnected by the same event do not reconnect in lockstep.
#[derive(Clone)]
pub struct ExponentialBackoffWithJitter {
    /// The delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// The multiplier applied to the delay after each failed attempt.
    pub base: f64,
    /// The longest possible time to wait between reconnect attempts.
    pub max_wait: Duration,
    /// The max number of reconnect attempts before giving up.
    pub max_reconnect_attempts: Option<u32>,
}

impl ExponentialBackoffWithJitter {
    /// Determine if a reconnect should be attempted.
    fn should_reconnect(&self, prev_attempts: u32, _error: &ConnectionError) -> bool {
        match self.max_reconnect_attempts {
            Some(max_attempts) => prev_attempts < max_attempts,
            None => true,
        }
    }

    /// Calculate the delay for the next reconnect attempt, before jitter.
    fn raw_delay(&self, prev_attempts: u32) -> Duration {
        let factor = self
            .base
            .powi(i32::try_from(prev_attempts).unwrap_or(i32::MAX));
        self.initial_delay.mul_f64(factor).min(self.max_wait)
    }

    /// Calculate the jittered delay for the next reconnect attempt.
    fn calculate_delay(&self, prev_attempts: u32) -> Duration {
        let interval = self.raw_delay(prev_attempts);
        // Add jitter to prevent multiple clients from reconnecting at the same time.
        let jitter_multiplier = rand::thread_rng().gen_range(0.90..=1.0);
        interval.mul_f64(jitter_multiplier)
    }
}

impl Default for ExponentialBackoffWithJitter {
    /// Indefinite reconnect, starting at 100ms and capping at 5 seconds,
    /// multiplying the delay by 2.5 between attempts.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            base: 2.5,
            max_wait: Duration::from_secs(5),
            max_reconnect_attempts: None,
        }
    }
}

impl ReconnectPolicy for ExponentialBackoffWithJitter {
    fn next_reconnect_delay(
        &self,
        attempt_count: u32,
        error: &ConnectionError,
    ) -> Option<Duration> {
        if self.should_reconnect(attempt_count, error) {
            Some(self.calculate_delay(attempt_count))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_grows_by_base_and_caps() {
        let policy = ExponentialBackoffWithJitter::default();
        assert_eq!(policy.raw_delay(0), Duration::from_millis(100));
        assert_eq!(policy.raw_delay(1), Duration::from_millis(250));
        assert_eq!(policy.raw_delay(2), Duration::from_millis(625));
        assert_eq!(policy.raw_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn max_reconnect_attempts_halts_retries() {
        let policy = ExponentialBackoffWithJitter {
            max_reconnect_attempts: Some(3),
            ..ExponentialBackoffWithJitter::default()
        };
        assert!(policy.should_reconnect(0, &dummy_error()));
        assert!(policy.should_reconnect(2, &dummy_error()));
        assert!(!policy.should_reconnect(3, &dummy_error()));
    }

    fn dummy_error() -> ConnectionError {
        ConnectionError::NetworkTimeout
    }
}
