use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::{JobId, JobStage, ProgressiveResult};

/// Stage transition of one job, reported while the pipeline runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    StageStarted {
        job_id: JobId,
        stage: JobStage,
    },
    StageCompleted {
        job_id: JobId,
        stage: JobStage,
        completion_percentage: u8,
        partial: ProgressiveResult,
    },
    Finished {
        job_id: JobId,
        stage: JobStage,
        completion_percentage: u8,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::StageStarted { job_id, .. }
            | JobEvent::StageCompleted { job_id, .. }
            | JobEvent::Finished { job_id, .. } => *job_id,
        }
    }

    pub fn stage(&self) -> JobStage {
        match self {
            JobEvent::StageStarted { stage, .. }
            | JobEvent::StageCompleted { stage, .. }
            | JobEvent::Finished { stage, .. } => *stage,
        }
    }
}

/// 进度回调，在每次阶段切换时同步调用，实现方不应阻塞
pub type ProgressCallback = Arc<dyn Fn(JobEvent) + Send + Sync>;
