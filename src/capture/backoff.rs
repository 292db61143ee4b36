//! Retry pacing for readers whose socket keeps failing.

use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Consecutive receive errors after which a reader stops.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 50;

/// Exponential delay between receive attempts, reset by any success.
#[derive(Debug, Default)]
pub struct RecvBackoff {
    failures: u32,
}

impl RecvBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count a failure and return how long to wait before the next attempt,
    /// or None once the reader should give up.
    pub fn failed(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= MAX_CONSECUTIVE_ERRORS {
            return None;
        }
        let shift = (self.failures - 1).min(16);
        Some(INITIAL_DELAY.saturating_mul(1 << shift).min(MAX_DELAY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let mut backoff = RecvBackoff::new();
        assert_eq!(backoff.failed(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.failed(), Some(Duration::from_millis(20)));
        assert_eq!(backoff.failed(), Some(Duration::from_millis(40)));

        for _ in 0..20 {
            backoff.failed();
        }
        assert_eq!(backoff.failed(), Some(MAX_DELAY));
    }

    #[test]
    fn test_gives_up_after_repeated_errors() {
        let mut backoff = RecvBackoff::new();
        for _ in 1..MAX_CONSECUTIVE_ERRORS {
            assert!(backoff.failed().is_some());
        }
        assert_eq!(backoff.failed(), None);
        assert_eq!(backoff.failures(), MAX_CONSECUTIVE_ERRORS);
    }

    #[test]
    fn test_success_resets() {
        let mut backoff = RecvBackoff::new();
        for _ in 0..10 {
            backoff.failed();
        }
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.failed(), Some(INITIAL_DELAY));
    }
}
