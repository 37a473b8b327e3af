//! 配置管理
//!
//! 采集引擎的全部可调参数都集中在 [`AppConfig`] 中，按组件划分为若干配置段：
//!
//! - **scheduler**: 全局并发槽位、调度轮询、完成任务保留时间
//! - **collector**: 阶段超时、单任务并发、重试预算和阶段请求计划
//! - **batch**: 批次默认超时、完成批次保留时间
//! - **rate_limiter**: 令牌桶参数及自适应调整阈值
//! - **pool**: 连接池与浏览器会话池大小
//! - **cache**: 结果缓存TTL
//! - **sources / persistence**: 外部协作者的地址与选择器
//! - **api / observability**: HTTP接口与日志、指标
//!
//! 加载顺序为内置默认值、TOML文件、`COLLECTOR__` 前缀的环境变量，最后统一校验。
//!
//! ```rust,no_run
//! use collector_core::config::AppConfig;
//!
//! let config = AppConfig::load(Some("config/collector.toml"))?;
//! assert!(config.scheduler.max_concurrent_jobs > 0);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod models;

pub use models::*;
