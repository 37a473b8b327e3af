use std::time::Duration;

use collector_core::config::RetryConfig;
use collector_core::CollectorError;

/// Exponential backoff with jitter for transient collaborator failures.
///
/// The attempt budget itself lives on the job; this only decides whether an
/// error is worth another attempt and how long to wait before it.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, max_retries: u32) -> Self {
        Self {
            config,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `retries_used` is the job-wide count of retries already spent
    pub fn should_retry(&self, error: &CollectorError, retries_used: u32) -> bool {
        retries_used < self.max_retries && error.is_retryable()
    }

    /// 计算第 `attempt` 次重试（从0开始）之前的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;

        let exponential = base * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(max);

        // 添加随机抖动以避免雷群效应
        let jitter = capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let delay = (capped + jitter).clamp(base, max);

        Duration::from_millis(delay as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig {
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                backoff_multiplier: 2.0,
                jitter_factor: 0.1,
            },
            2,
        )
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = policy();
        let first = policy.delay_for(0);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));

        let third = policy.delay_for(2);
        assert!(third >= Duration::from_millis(360) && third <= Duration::from_millis(440));

        for attempt in 5..10 {
            assert!(policy.delay_for(attempt) <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn test_retry_budget_and_classification() {
        let policy = policy();
        let transient = CollectorError::Connectivity("reset".into());
        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 1));
        assert!(!policy.should_retry(&transient, 2));

        assert!(!policy.should_retry(&CollectorError::Auth("denied".into()), 0));
        assert!(!policy.should_retry(&CollectorError::Parse("markup".into()), 0));
        assert!(policy.should_retry(&CollectorError::RateLimited("429".into()), 0));
    }
}
