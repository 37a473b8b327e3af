use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::CollectorError;
use crate::models::{CollectionJob, JobStage, ProgressiveResult};
use crate::traits::progress::{JobEvent, ProgressCallback};

/// 任务执行上下文
///
/// 调度器为每个派发的任务构造一个上下文：任务快照、协作式取消令牌以及可选的进度回调。
#[derive(Clone)]
pub struct JobContext {
    pub job: CollectionJob,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressCallback>,
}

impl JobContext {
    pub fn new(job: CollectionJob, cancel: CancellationToken) -> Self {
        Self {
            job,
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn report(&self, event: JobEvent) {
        if let Some(progress) = &self.progress {
            progress(event);
        }
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job.id)
            .field("key", &self.job.key)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Terminal outcome of one job execution
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub stage: JobStage,
    pub result: Option<ProgressiveResult>,
    pub retry_count: u32,
    pub error: Option<CollectorError>,
}

impl JobOutcome {
    pub fn done(result: ProgressiveResult, retry_count: u32) -> Self {
        Self {
            stage: JobStage::Done,
            result: Some(result),
            retry_count,
            error: None,
        }
    }

    pub fn failed(
        result: Option<ProgressiveResult>,
        retry_count: u32,
        error: CollectorError,
    ) -> Self {
        Self {
            stage: JobStage::Failed,
            result,
            retry_count,
            error: Some(error),
        }
    }

    pub fn cancelled(result: Option<ProgressiveResult>, retry_count: u32) -> Self {
        Self {
            stage: JobStage::Cancelled,
            result,
            retry_count,
            error: Some(CollectorError::Cancelled),
        }
    }
}

/// Runs one job to a terminal stage. Implementations never panic on collaborator
/// failures; every error is folded into the returned outcome.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, ctx: JobContext) -> JobOutcome;

    fn name(&self) -> &str;
}
