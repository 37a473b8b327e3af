use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::JobId;

/// 采集引擎错误类型定义
#[derive(Debug, Clone, Error)]
pub enum CollectorError {
    #[error("网络连接错误: {0}")]
    Connectivity(String),

    #[error("请求被限流: {0}")]
    RateLimited(String),

    #[error("认证失败: {0}")]
    Auth(String),

    #[error("解析错误: {0}")]
    Parse(String),

    #[error("资源耗尽: {0}")]
    ResourceExhausted(String),

    #[error("重复的采集任务，已存在任务: {existing_job_id}")]
    DuplicateJob { existing_job_id: JobId },

    #[error("无效的标识符: {0}")]
    InvalidIdentifier(String),

    #[error("记录未找到: {0}")]
    NotFound(String),

    #[error("远端服务错误: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("任务已取消")]
    Cancelled,

    #[error("调度器已关闭")]
    SchedulerShutdown,

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// Serializable error tag recorded in results and statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    RateLimited,
    Auth,
    Parse,
    ResourceExhausted,
    DuplicateJob,
    InvalidIdentifier,
    NotFound,
    ServerError,
    Timeout,
    Cancelled,
    SchedulerShutdown,
    Configuration,
    Serialization,
    Internal,
}

impl CollectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollectorError::Connectivity(_) => ErrorKind::Connectivity,
            CollectorError::RateLimited(_) => ErrorKind::RateLimited,
            CollectorError::Auth(_) => ErrorKind::Auth,
            CollectorError::Parse(_) => ErrorKind::Parse,
            CollectorError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            CollectorError::DuplicateJob { .. } => ErrorKind::DuplicateJob,
            CollectorError::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
            CollectorError::NotFound(_) => ErrorKind::NotFound,
            CollectorError::ServerError { .. } => ErrorKind::ServerError,
            CollectorError::Timeout(_) => ErrorKind::Timeout,
            CollectorError::Cancelled => ErrorKind::Cancelled,
            CollectorError::SchedulerShutdown => ErrorKind::SchedulerShutdown,
            CollectorError::Configuration(_) => ErrorKind::Configuration,
            CollectorError::Serialization(_) => ErrorKind::Serialization,
            CollectorError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Transient failures that may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollectorError::Connectivity(_)
                | CollectorError::RateLimited(_)
                | CollectorError::Timeout(_)
                | CollectorError::ServerError { .. }
        )
    }

    /// Failures that abort the whole pipeline instead of degrading it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CollectorError::Auth(_) | CollectorError::InvalidIdentifier(_)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CollectorError::RateLimited(_))
    }

    pub fn timeout(operation: impl std::fmt::Display, after: std::time::Duration) -> Self {
        CollectorError::Timeout(format!("{operation} exceeded {}ms", after.as_millis()))
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        CollectorError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for CollectorError {
    fn from(err: config::ConfigError) -> Self {
        CollectorError::Configuration(err.to_string())
    }
}

/// 统一的Result类型
pub type CollectorResult<T> = std::result::Result<T, CollectorError>;
