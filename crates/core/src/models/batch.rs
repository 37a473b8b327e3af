use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{CollectionMode, JobId, JobStage, Priority};
use crate::models::result::ProgressiveResult;
use crate::CollectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BatchId {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(BatchId)
            .map_err(|e| CollectorError::InvalidIdentifier(format!("invalid batch id '{s}': {e}")))
    }
}

/// 批次执行选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub priority: Priority,
    /// 批次内同时运行的任务上限，None 表示只受调度器全局上限约束
    pub max_concurrency: Option<usize>,
    /// 单个任务从 Basic 阶段开始计时的超时，超时后该任务被取消
    pub per_request_timeout_ms: Option<u64>,
    /// 批次总超时，0 表示使用配置中的默认值
    pub total_timeout_ms: u64,
    /// 跳过缓存，并允许后续阶段覆盖已有字段
    pub force_fresh: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            max_concurrency: None,
            per_request_timeout_ms: None,
            total_timeout_ms: 300_000,
            force_fresh: false,
        }
    }
}

/// A batch as accepted by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub batch_id: BatchId,
    pub identifiers: Vec<String>,
    pub task_type: String,
    pub mode: CollectionMode,
    pub options: BatchOptions,
    pub created_at: DateTime<Utc>,
}

impl BatchRequest {
    pub fn new(
        identifiers: Vec<String>,
        task_type: impl Into<String>,
        mode: CollectionMode,
        options: BatchOptions,
    ) -> Self {
        Self {
            batch_id: BatchId::new(),
            identifiers,
            task_type: task_type.into(),
            mode,
            options,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Running,
    /// Every item reached a terminal stage
    Completed,
    /// The total timeout fired first; unfinished items are cancelled
    TimedOut,
    Cancelled,
}

impl BatchState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, BatchState::Running)
    }
}

/// Per-stage job counts of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StageCounts {
    pub fn tally(&mut self, stage: JobStage) {
        match stage {
            JobStage::Pending => self.pending += 1,
            JobStage::Basic | JobStage::Detailed | JobStage::Extended => self.running += 1,
            JobStage::Done => self.done += 1,
            JobStage::Failed => self.failed += 1,
            JobStage::Cancelled => self.cancelled += 1,
        }
    }

    pub fn terminal(&self) -> usize {
        self.done + self.failed + self.cancelled
    }
}

/// Polling view of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub state: BatchState,
    pub total: usize,
    /// Mean completion percentage over all items
    pub progress_percentage: f64,
    pub counts: StageCounts,
    pub elapsed_seconds: f64,
}

/// 单个标识符的最终结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub identifier: String,
    /// `None` when the item was never submitted
    pub job_id: Option<JobId>,
    /// The job finished `Done`, including cache hits
    pub success: bool,
    /// Terminal stage as seen by this batch
    pub stage: JobStage,
    /// Deepest pipeline stage completed before the job terminated
    pub reached_stage: Option<JobStage>,
    pub completion_percentage: u8,
    pub retry_count: u32,
    pub error: Option<String>,
    pub result: Option<ProgressiveResult>,
}

/// Immutable outcome of a finished batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub task_type: String,
    pub mode: CollectionMode,
    pub state: BatchState,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_time_seconds: f64,
    pub items: Vec<ItemResult>,
    pub completed_at: DateTime<Utc>,
}

impl BatchSummary {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_counts_tally() {
        let mut counts = StageCounts::default();
        for stage in [
            JobStage::Pending,
            JobStage::Basic,
            JobStage::Extended,
            JobStage::Done,
            JobStage::Failed,
            JobStage::Cancelled,
        ] {
            counts.tally(stage);
        }
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.running, 2);
        assert_eq!(counts.terminal(), 3);
    }

    #[test]
    fn test_batch_options_partial_deserialize() {
        let options: BatchOptions =
            serde_json::from_str(r#"{"priority":"high","max_concurrency":2}"#).unwrap();
        assert_eq!(options.priority, Priority::High);
        assert_eq!(options.max_concurrency, Some(2));
        assert_eq!(options.total_timeout_ms, 300_000);
        assert!(!options.force_fresh);
    }
}
