//! Reconnect delays.

use std::time::Duration;

use opsroom_core::defaults::{RECONNECT_CEILING_MS, RECONNECT_FLOOR_MS};

/// Exponential backoff: starts at the floor, doubles per failure, capped at
/// the ceiling. Only [`Backoff::reset`] brings it back to the floor.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let floor = floor.max(Duration::from_millis(1));
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay to wait now; the following one doubles.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    /// Delay the next call to [`Backoff::next_delay`] will return.
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Back to the floor, after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(RECONNECT_FLOOR_MS),
            Duration::from_millis(RECONNECT_CEILING_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_up_to_ceiling() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_monotonic_and_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(5));
        let mut previous = Duration::ZERO;
        for _ in 0..50 {
            let delay = backoff.next_delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(5));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(5));
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.peek(), Duration::from_secs(4));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_ceiling_below_floor_is_raised() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(2));
        assert_eq!(backoff.ceiling(), Duration::from_secs(10));
        assert_eq!(backoff.floor(), Duration::from_secs(10));
    }
}
