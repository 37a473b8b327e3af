use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token bucket parameters and adaptive feedback thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub initial_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub burst_capacity: f64,
    pub adjustment_window_seconds: u64,
    pub min_samples: u64,
    pub increase_threshold: f64,
    pub decrease_threshold: f64,
    pub increase_factor: f64,
    pub decrease_factor: f64,
    pub poll_interval_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            initial_rate: 5.0,
            min_rate: 0.5,
            max_rate: 20.0,
            burst_capacity: 10.0,
            adjustment_window_seconds: 30,
            min_samples: 10,
            increase_threshold: 0.95,
            decrease_threshold: 0.85,
            increase_factor: 1.1,
            decrease_factor: 0.8,
            poll_interval_ms: 50,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_rate <= 0.0 || self.initial_rate <= 0.0 || self.max_rate <= 0.0 {
            return Err(anyhow::anyhow!("速率必须为正数"));
        }
        if !(self.min_rate <= self.initial_rate && self.initial_rate <= self.max_rate) {
            return Err(anyhow::anyhow!(
                "速率范围无效: 需要 min_rate({}) <= initial_rate({}) <= max_rate({})",
                self.min_rate,
                self.initial_rate,
                self.max_rate
            ));
        }
        if self.burst_capacity < 1.0 {
            return Err(anyhow::anyhow!("突发容量不能小于1"));
        }
        if self.adjustment_window_seconds == 0 {
            return Err(anyhow::anyhow!("调整窗口必须大于0"));
        }
        if !(0.0..=1.0).contains(&self.increase_threshold)
            || !(0.0..=1.0).contains(&self.decrease_threshold)
        {
            return Err(anyhow::anyhow!("成功率阈值必须在0.0到1.0之间"));
        }
        if self.decrease_threshold > self.increase_threshold {
            return Err(anyhow::anyhow!("降速阈值不能高于提速阈值"));
        }
        if self.increase_factor < 1.0 {
            return Err(anyhow::anyhow!("提速因子不能小于1.0"));
        }
        if self.decrease_factor <= 0.0 || self.decrease_factor >= 1.0 {
            return Err(anyhow::anyhow!("降速因子必须在0.0到1.0之间"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }
        Ok(())
    }

    pub fn adjustment_window(&self) -> Duration {
        Duration::from_secs(self.adjustment_window_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub connection_pool_size: usize,
    pub browser_pool_size: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection_pool_size: 10,
            browser_pool_size: 2,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.connection_pool_size == 0 {
            return Err(anyhow::anyhow!("连接池大小必须大于0"));
        }
        if self.browser_pool_size == 0 {
            return Err(anyhow::anyhow!("浏览器会话池大小必须大于0"));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(anyhow::anyhow!("资源获取超时必须大于0"));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 24 * 60 * 60,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ttl_seconds == 0 {
            return Err(anyhow::anyhow!("缓存TTL必须大于0"));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}
