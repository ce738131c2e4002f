// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

const DEFAULT_FIRST_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);
const DEFAULT_FACTOR: f64 = 1.5;

/// Exponential delay sequence for reconnect attempts.
///
/// The n-th retry waits `first_delay * factor^(n-1)`, capped at `max_delay`.
/// The policy is a pure function; the client core itself never reconnects,
/// callers building a reconnect supervisor read the delays from here.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    first_delay: Duration,
    max_delay: Duration,
    factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            first_delay: DEFAULT_FIRST_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            factor: DEFAULT_FACTOR,
        }
    }
}

impl Backoff {
    /// Create a new backoff policy.
    ///
    /// A `factor` below 1.0 is raised to 1.0 so the sequence never shrinks.
    #[must_use]
    pub fn new(first_delay: Duration, max_delay: Duration, factor: f64) -> Self {
        Self {
            first_delay,
            max_delay,
            factor: factor.max(1.0),
        }
    }

    /// Delay before the `retry`-th attempt, starting at 1.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return self.first_delay.min(self.max_delay);
        }
        #[allow(clippy::cast_possible_wrap)]
        let exponent = self.factor.powi((retry - 1) as i32);
        if !exponent.is_finite() || exponent > u32::MAX.into() {
            return self.max_delay;
        }
        self.first_delay.mul_f64(exponent).min(self.max_delay)
    }

    #[must_use]
    pub const fn first_delay(&self) -> Duration {
        self.first_delay
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    #[must_use]
    pub const fn factor(&self) -> f64 {
        self.factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_millis(1500));
        assert_eq!(backoff.delay(3), Duration::from_millis(2250));
        // Far out retries are capped.
        assert_eq!(backoff.delay(64), Duration::from_secs(120));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(120));
    }

    #[test]
    fn test_factor_below_one_is_raised() {
        let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(10), 0.5);
        assert_eq!(backoff.factor(), 1.0);
        assert_eq!(backoff.delay(5), Duration::from_secs(2));
    }

    #[test]
    fn test_first_delay_capped_by_max() {
        let backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(10), 2.0);
        assert_eq!(backoff.delay(1), Duration::from_secs(10));
    }
}
