//! Reconnect backoff policy.

use std::time::Duration;

/// Exponential backoff with a delay cap and an attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (zero based), or
    /// `None` once the ceiling is reached.
    ///
    /// `min(base_delay * 2^attempt, max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_sequence_is_capped() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (0..10)
            .map(|n| policy.delay_for(n).unwrap().as_millis())
            .collect();
        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000, 30000]
        );
    }

    #[test]
    fn test_no_delay_after_ceiling() {
        let policy = ReconnectPolicy::default();
        assert!(policy.delay_for(10).is_none());
        assert!(policy.delay_for(u32::MAX).is_none());
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let policy = ReconnectPolicy {
            max_attempts: u32::MAX,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(40), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay_for(63), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_sequence_non_decreasing() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(5_000),
            max_attempts: 20,
        };
        let delays: Vec<Duration> = (0..20).map_while(|n| policy.delay_for(n)).collect();
        assert_eq!(delays.len(), 20);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_millis(5_000));
    }
}
