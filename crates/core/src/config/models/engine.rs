use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker slots shared by all jobs
    pub max_concurrent_jobs: usize,
    /// Rate limiter target the dispatch loop peeks before admitting a job
    pub rate_limit_target: String,
    pub dispatch_poll_interval_ms: u64,
    pub completed_retention_seconds: u64,
    pub cleanup_interval_seconds: u64,
    /// Grace period for in-flight jobs on shutdown
    pub shutdown_grace_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 6,
            rate_limit_target: "primary".to_string(),
            dispatch_poll_interval_ms: 50,
            completed_retention_seconds: 3600,
            cleanup_interval_seconds: 60,
            shutdown_grace_seconds: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }
        if self.rate_limit_target.is_empty() {
            return Err(anyhow::anyhow!("限流目标不能为空"));
        }
        if self.dispatch_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度轮询间隔必须大于0"));
        }
        if self.cleanup_interval_seconds == 0 {
            return Err(anyhow::anyhow!("清理间隔必须大于0"));
        }
        Ok(())
    }

    pub fn dispatch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_interval_ms)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_seconds)
    }
}

/// Paths requested from the primary source for each stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePlan {
    pub basic_path: String,
    pub detailed_path: String,
    pub extended_paths: Vec<String>,
    /// Extended paths whose absence always triggers escalation
    pub critical_extended_paths: Vec<String>,
    pub min_extended_successes: usize,
    /// Fields requested from the automation and scraping fallbacks
    pub extended_fields: Vec<String>,
}

impl Default for StagePlan {
    fn default() -> Self {
        Self {
            basic_path: "records".to_string(),
            detailed_path: "records/details".to_string(),
            extended_paths: vec![
                "tax-history".to_string(),
                "sale-history".to_string(),
                "permits".to_string(),
            ],
            critical_extended_paths: vec!["tax-history".to_string(), "sale-history".to_string()],
            min_extended_successes: 2,
            extended_fields: vec!["tax_history".to_string(), "sale_history".to_string()],
        }
    }
}

impl StagePlan {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.basic_path.is_empty() || self.detailed_path.is_empty() {
            return Err(anyhow::anyhow!("阶段请求路径不能为空"));
        }
        if self.min_extended_successes > self.extended_paths.len() {
            return Err(anyhow::anyhow!(
                "扩展阶段最小成功数 {} 超过子请求数量 {}",
                self.min_extended_successes,
                self.extended_paths.len()
            ));
        }
        for critical in &self.critical_extended_paths {
            if !self.extended_paths.contains(critical) {
                return Err(anyhow::anyhow!("关键扩展路径未在扩展路径中声明: {}", critical));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_delay_ms == 0 {
            return Err(anyhow::anyhow!("重试基础延迟必须大于0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow::anyhow!("最大重试延迟不能小于基础延迟"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动因子必须在0.0到1.0之间"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub max_concurrent_per_job: usize,
    pub basic_timeout_ms: u64,
    pub detailed_timeout_ms: u64,
    /// Budget of the concurrent primary sub-request phase of the extended stage
    pub extended_timeout_ms: u64,
    pub sub_request_timeout_ms: u64,
    /// Budget of each fallback strategy attempt
    pub fallback_timeout_ms: u64,
    pub max_retries: u32,
    pub retry: RetryConfig,
    pub plan: StagePlan,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_job: 3,
            basic_timeout_ms: 1_000,
            detailed_timeout_ms: 1_000,
            extended_timeout_ms: 2_500,
            sub_request_timeout_ms: 2_000,
            fallback_timeout_ms: 5_000,
            max_retries: 2,
            retry: RetryConfig::default(),
            plan: StagePlan::default(),
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_per_job == 0 {
            return Err(anyhow::anyhow!("单任务并发数必须大于0"));
        }
        for (name, value) in [
            ("basic_timeout_ms", self.basic_timeout_ms),
            ("detailed_timeout_ms", self.detailed_timeout_ms),
            ("extended_timeout_ms", self.extended_timeout_ms),
            ("sub_request_timeout_ms", self.sub_request_timeout_ms),
            ("fallback_timeout_ms", self.fallback_timeout_ms),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!("超时配置 {} 必须大于0", name));
            }
        }
        self.retry.validate()?;
        self.plan.validate()?;
        Ok(())
    }

    pub fn basic_timeout(&self) -> Duration {
        Duration::from_millis(self.basic_timeout_ms)
    }

    pub fn detailed_timeout(&self) -> Duration {
        Duration::from_millis(self.detailed_timeout_ms)
    }

    pub fn extended_timeout(&self) -> Duration {
        Duration::from_millis(self.extended_timeout_ms)
    }

    pub fn sub_request_timeout(&self) -> Duration {
        Duration::from_millis(self.sub_request_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub default_total_timeout_ms: u64,
    pub completed_retention_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub event_channel_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_total_timeout_ms: 300_000,
            completed_retention_seconds: 3600,
            cleanup_interval_seconds: 60,
            event_channel_capacity: 256,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_total_timeout_ms == 0 {
            return Err(anyhow::anyhow!("批次总超时必须大于0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(anyhow::anyhow!("事件通道容量必须大于0"));
        }
        if self.cleanup_interval_seconds == 0 {
            return Err(anyhow::anyhow!("批次清理间隔必须大于0"));
        }
        Ok(())
    }

    pub fn default_total_timeout(&self) -> Duration {
        Duration::from_millis(self.default_total_timeout_ms)
    }
}
