//! Test helper utilities and common wiring
//!
//! Configurations here keep every budget small so timing tests stay fast, and
//! rates high so the limiter never throttles unless a test asks it to.

use std::sync::Arc;
use std::time::Duration;

use collector_core::config::{CollectorConfig, RateLimiterConfig, RetryConfig};
use collector_infrastructure::{
    AdaptiveRateLimiter, AutomationDriver, BrowserPool, BrowserSessionManager, ConnectionPool,
    HttpConnectionManager, ResourcePool,
};
use tokio::time::{sleep, Instant};

/// Test environment utilities
pub struct TestEnv;

impl TestEnv {
    /// Polls `condition` until it holds or `timeout` elapses.
    ///
    /// Uses tokio time so it also works under a paused clock.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        condition().await
    }
}

/// Collector budgets in the tens of milliseconds with fast retries
pub fn fast_collector_config() -> CollectorConfig {
    CollectorConfig {
        max_concurrent_per_job: 3,
        basic_timeout_ms: 500,
        detailed_timeout_ms: 500,
        extended_timeout_ms: 800,
        sub_request_timeout_ms: 400,
        fallback_timeout_ms: 500,
        max_retries: 2,
        retry: RetryConfig {
            base_delay_ms: 10,
            max_delay_ms: 40,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        },
        ..CollectorConfig::default()
    }
}

/// Limiter that admits everything a test throws at it
pub fn permissive_rate_limiter() -> AdaptiveRateLimiter {
    AdaptiveRateLimiter::new(RateLimiterConfig {
        initial_rate: 1_000.0,
        min_rate: 1.0,
        max_rate: 2_000.0,
        burst_capacity: 1_000.0,
        ..RateLimiterConfig::default()
    })
}

pub fn connection_pool(size: usize) -> ConnectionPool {
    ResourcePool::new(
        "connections",
        HttpConnectionManager::new(reqwest::Client::new()),
        size,
        Duration::from_millis(500),
    )
}

pub fn browser_pool(driver: Arc<dyn AutomationDriver>, size: usize) -> BrowserPool {
    ResourcePool::new(
        "browsers",
        BrowserSessionManager::new(driver),
        size,
        Duration::from_millis(500),
    )
}
