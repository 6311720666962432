//! Configuration for the sync engine.

use crate::device::{Constraints, NetworkRequirement};
use agrisync_protocol::{SyncPriority, Timestamp, DEFAULT_MAX_RETRIES};
use rand::Rng;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Converts a duration to whole milliseconds, saturating.
pub fn millis(duration: Duration) -> Timestamp {
    Timestamp::try_from(duration.as_millis()).unwrap_or(Timestamp::MAX)
}

/// Configuration for sync passes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device ID, sent with every gateway request.
    pub device_id: String,
    /// Rows per pull or push page.
    pub page_limit: u32,
    /// Pages per phase per domain in one pass.
    pub max_pages_per_domain: u32,
    /// Deadline for each gateway call.
    pub gateway_timeout: Duration,
    /// Cache rows older than this are evicted.
    pub stale_after: Duration,
    /// Completed queue rows older than this are deleted.
    pub queue_retention: Duration,
    /// Retry budget for new queued operations.
    pub default_max_retries: u32,
    /// Retry behaviour for whole passes.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for `device_id` with default limits.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            page_limit: 500,
            max_pages_per_domain: 20,
            gateway_timeout: Duration::from_secs(30),
            stale_after: DAY * 14,
            queue_retention: DAY * 7,
            default_max_retries: DEFAULT_MAX_RETRIES,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the page size.
    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    /// Sets the page cap per phase.
    pub fn with_max_pages_per_domain(mut self, pages: u32) -> Self {
        self.max_pages_per_domain = pages.max(1);
        self
    }

    /// Sets the gateway deadline.
    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Sets the cache staleness threshold.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Sets the completed-operation retention window.
    pub fn with_queue_retention(mut self, retention: Duration) -> Self {
        self.queue_retention = retention;
        self
    }

    /// Sets the default retry budget for queued operations.
    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Delay before attempt `attempt` (0-indexed; the first attempt has none).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay > 0.0 {
            let jitter = delay * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay + jitter)
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Scheduling rules for one priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingPolicy {
    /// Execution preconditions.
    pub constraints: Constraints,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Backoff base interval.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
    /// Attempts before the work is surfaced as failed.
    pub max_attempts: u32,
}

impl SchedulingPolicy {
    /// Default policy for a priority class.
    pub fn for_priority(priority: SyncPriority) -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        use NetworkRequirement::{Connected, Unmetered};
        let (network, battery_not_low, initial_delay, backoff_cap, max_attempts) = match priority {
            SyncPriority::Critical => (Connected, false, Duration::ZERO, minutes(1), 10),
            SyncPriority::High => (Connected, false, Duration::from_secs(30), minutes(5), 8),
            SyncPriority::Normal => (Connected, true, minutes(5), minutes(15), 5),
            SyncPriority::Low => (Unmetered, false, minutes(15), minutes(60), 5),
            SyncPriority::Background => (Unmetered, true, minutes(60), minutes(360), 3),
        };
        Self {
            constraints: Constraints {
                network,
                battery_not_low,
            },
            initial_delay,
            backoff_base: Duration::from_secs(10),
            backoff_cap,
            max_attempts,
        }
    }

    /// Exponential backoff before retry `attempt` (1 = first retry), capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("device-1")
            .with_page_limit(0)
            .with_max_pages_per_domain(3)
            .with_gateway_timeout(Duration::from_secs(5))
            .with_stale_after(DAY);

        assert_eq!(config.device_id, "device-1");
        assert_eq!(config.page_limit, 1);
        assert_eq!(config.max_pages_per_domain, 3);
        assert_eq!(config.gateway_timeout, Duration::from_secs(5));
        assert_eq!(config.stale_after, DAY);
        assert_eq!(config.queue_retention, DAY * 7);
    }

    #[test]
    fn default_device_id_is_unique() {
        assert_ne!(SyncConfig::default().device_id, SyncConfig::default().device_id);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay3 = config.delay_for_attempt(3);
        assert!(delay3 >= Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(false)
            .with_backoff_multiplier(10.0);
        assert_eq!(config.delay_for_attempt(6), Duration::from_secs(5));
    }

    #[test]
    fn policies_get_stricter_with_lower_priority() {
        let critical = SchedulingPolicy::for_priority(SyncPriority::Critical);
        let background = SchedulingPolicy::for_priority(SyncPriority::Background);

        assert_eq!(critical.initial_delay, Duration::ZERO);
        assert_eq!(critical.constraints, Constraints::any_network());
        assert_eq!(background.constraints.network, NetworkRequirement::Unmetered);
        assert!(background.constraints.battery_not_low);

        let mut last = Duration::ZERO;
        for p in SyncPriority::ALL {
            let policy = SchedulingPolicy::for_priority(p);
            assert!(policy.initial_delay >= last);
            last = policy.initial_delay;
        }
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = SchedulingPolicy::for_priority(SyncPriority::Critical);
        assert_eq!(policy.backoff_for(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(20));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(40));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(60));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(60));
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_secs(2)), 2_000);
        assert_eq!(millis(Duration::MAX), Timestamp::MAX);
    }
}
