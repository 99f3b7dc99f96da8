//! # Fibonacci Backoff
//!
//! Requeue delays for failed reconciliations. The sequence grows more slowly
//! than exponential backoff: 1s, 1s, 2s, 3s, 5s, 8s, ... capped at the
//! configured maximum.

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, starting from `min` twice.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum delay in seconds (for reset)
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a backoff bounded by `min_seconds` and `max_seconds`.
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Return the current delay and advance the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_seconds;

        let next = self.prev_seconds.saturating_add(self.current_seconds);
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);

        Duration::from_secs(result)
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

impl Default for FibonacciBackoff {
    /// 1 second minimum, 5 minutes maximum
    fn default() -> Self {
        Self::new(1, 300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take(backoff: &mut FibonacciBackoff, n: usize) -> Vec<u64> {
        (0..n).map(|_| backoff.next_backoff().as_secs()).collect()
    }

    #[test]
    fn test_fibonacci_sequence() {
        let mut backoff = FibonacciBackoff::default();
        assert_eq!(take(&mut backoff, 8), vec![1, 1, 2, 3, 5, 8, 13, 21]);
    }

    #[test]
    fn test_sequence_is_capped() {
        let mut backoff = FibonacciBackoff::default();
        let delays = take(&mut backoff, 20);
        assert_eq!(delays[12..15], [233, 300, 300]);
        assert!(delays.iter().all(|d| *d <= 300));
    }

    #[test]
    fn test_reset() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        take(&mut backoff, 5);
        backoff.reset();
        assert_eq!(take(&mut backoff, 3), vec![1, 1, 2]);
    }
}
