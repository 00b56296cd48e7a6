//! Ack decisions and retry arithmetic.

use std::time::Duration;

use rand::Rng;

/// Header carrying how many times a message has already been retried.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";
/// Header set on dead-lettered messages.
pub const DEATH_REASON_HEADER: &str = "x-death-reason";

/// What the consumer does with a delivery once the processor is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processed (successfully or not); ack.
    Ack,
    /// Payload could not be decoded; ack without processing.
    Drop,
    /// Interrupted by shutdown; nack with requeue, attempt count unchanged.
    Requeue,
    /// Transient fault; republish with `attempt` as the new retry count, then ack.
    Retry { attempt: u32 },
    /// Transient fault on the last allowed attempt; route to the dead-letter
    /// exchange, then ack.
    DeadLetter { reason: String },
}

/// Bounded redelivery for transient faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Total deliveries allowed, the first one included.
    pub max_attempts: u32,
}

impl RedeliveryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Decide for a delivery that already carried `retry_count` retries.
    pub fn on_transient(&self, retry_count: u32, reason: impl Into<String>) -> Disposition {
        let next = retry_count.saturating_add(1);
        if next < self.max_attempts {
            Disposition::Retry { attempt: next }
        } else {
            Disposition::DeadLetter {
                reason: reason.into(),
            }
        }
    }
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Delay before connection attempt `attempt + 1`: `base * 2^attempt`, capped.
#[inline]
pub fn compute_connect_backoff_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    2_u64
        .checked_pow(attempt)
        .and_then(|factor| base_ms.checked_mul(factor))
        .unwrap_or(u64::MAX)
        .min(max_ms)
}

/// [`compute_connect_backoff_ms`] plus up to 10% random jitter, still capped.
pub fn connect_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay = compute_connect_backoff_ms(attempt, base_ms, max_ms);
    let jitter = rand::rng().random_range(0..=delay / 10);
    Duration::from_millis(delay.saturating_add(jitter).min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_until_last_attempt() {
        let policy = RedeliveryPolicy::new(3);
        assert_eq!(policy.on_transient(0, "panic"), Disposition::Retry { attempt: 1 });
        assert_eq!(policy.on_transient(1, "panic"), Disposition::Retry { attempt: 2 });
        assert_eq!(
            policy.on_transient(2, "panic"),
            Disposition::DeadLetter {
                reason: "panic".to_string()
            }
        );
        assert!(matches!(
            policy.on_transient(u32::MAX, "panic"),
            Disposition::DeadLetter { .. }
        ));
    }

    #[test]
    fn test_single_attempt_dead_letters_immediately() {
        let policy = RedeliveryPolicy::new(0);
        assert_eq!(policy.max_attempts, 1);
        assert!(matches!(policy.on_transient(0, "x"), Disposition::DeadLetter { .. }));
    }

    #[test]
    fn test_connect_backoff_schedule() {
        assert_eq!(compute_connect_backoff_ms(0, 1000, 30_000), 1000);
        assert_eq!(compute_connect_backoff_ms(1, 1000, 30_000), 2000);
        assert_eq!(compute_connect_backoff_ms(2, 1000, 30_000), 4000);
        assert_eq!(compute_connect_backoff_ms(4, 1000, 30_000), 16_000);
        assert_eq!(compute_connect_backoff_ms(5, 1000, 30_000), 30_000);
        assert_eq!(compute_connect_backoff_ms(64, 1000, 30_000), 30_000);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for attempt in 0..8 {
            let delay = connect_backoff(attempt, 100, 5_000).as_millis() as u64;
            let base = compute_connect_backoff_ms(attempt, 100, 5_000);
            assert!(delay >= base);
            assert!(delay <= (base + base / 10).min(5_000));
        }
    }
}
