//! Back-off configuration for the server accept loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential back-off applied when `accept()` on the listener fails.
///
/// A failing slot waits `initial_delay`, doubling on each consecutive failure
/// up to `max_delay`. A successful accept resets the delay.
///
/// # Default Values
/// - `initial_delay`: 10 milliseconds
/// - `max_delay`: 1 second
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay used for the first retry after an `accept()` failure.
    pub initial_delay: Duration,
    /// Maximum back-off delay once retries have increased exponentially.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Clamp both delays to at least one millisecond and order them so that
    /// `initial_delay <= max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use tcpacket::server::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::from_millis(5),
    ///     max_delay: Duration::ZERO,
    /// };
    ///
    /// let normalized = cfg.normalized();
    /// assert_eq!(normalized.initial_delay, Duration::from_millis(1));
    /// assert_eq!(normalized.max_delay, Duration::from_millis(5));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    /// Delay to use after one more consecutive failure.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(10, 20)]
    #[case(600, 1000)]
    #[case(1000, 1000)]
    fn delay_doubles_up_to_the_cap(#[case] current_ms: u64, #[case] expected_ms: u64) {
        let backoff = BackoffConfig::default();
        assert_eq!(
            backoff.next_delay(Duration::from_millis(current_ms)),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn ordered_delays_are_kept() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.normalized(), backoff);
    }
}
