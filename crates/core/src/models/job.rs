use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::batch::BatchId;
use crate::models::result::ProgressiveResult;
use crate::{CollectorError, CollectorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|e| CollectorError::InvalidIdentifier(format!("invalid job id '{s}': {e}")))
    }
}

/// Uniqueness key of a job: at most one non-terminal job per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub task_type: String,
    pub identifier: String,
}

impl JobKey {
    pub fn new(task_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Rejects identifiers that can never resolve to a record
    pub fn validate(&self) -> CollectorResult<()> {
        let identifier = self.identifier.trim();
        if identifier.is_empty() {
            return Err(CollectorError::InvalidIdentifier(
                "identifier must not be empty".to_string(),
            ));
        }
        if identifier.len() > 128 {
            return Err(CollectorError::InvalidIdentifier(format!(
                "identifier too long: {} chars",
                identifier.len()
            )));
        }
        if identifier
            .chars()
            .any(|c| c.is_control() || c == '/' || c == '?' || c == '#')
        {
            return Err(CollectorError::InvalidIdentifier(format!(
                "identifier contains reserved characters: {identifier:?}"
            )));
        }
        if self.task_type.trim().is_empty() {
            return Err(CollectorError::InvalidIdentifier(
                "task type must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.task_type, self.identifier)
    }
}

/// Dispatch priority; lower value dispatches first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl FromStr for Priority {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(CollectorError::Configuration(format!("invalid priority: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Job lifecycle: Pending, the three pipeline stages, then one terminal stage
pub enum JobStage {
    Pending,
    Basic,
    Detailed,
    Extended,
    Done,
    Failed,
    Cancelled,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Done | JobStage::Failed | JobStage::Cancelled)
    }

    /// Stages during which a worker holds the job
    pub fn is_running(&self) -> bool {
        matches!(self, JobStage::Basic | JobStage::Detailed | JobStage::Extended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Pending => "pending",
            JobStage::Basic => "basic",
            JobStage::Detailed => "detailed",
            JobStage::Extended => "extended",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
            JobStage::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far the progressive pipeline may go for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMode {
    Basic,
    Detailed,
    #[default]
    Complete,
}

impl CollectionMode {
    /// Last pipeline stage this mode runs
    pub fn last_stage(&self) -> JobStage {
        match self {
            CollectionMode::Basic => JobStage::Basic,
            CollectionMode::Detailed => JobStage::Detailed,
            CollectionMode::Complete => JobStage::Extended,
        }
    }

    pub fn includes(&self, stage: JobStage) -> bool {
        let rank = |s: JobStage| match s {
            JobStage::Basic => 1,
            JobStage::Detailed => 2,
            JobStage::Extended => 3,
            _ => 0,
        };
        rank(stage) > 0 && rank(stage) <= rank(self.last_stage())
    }
}

impl FromStr for CollectionMode {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" | "basic-only" => Ok(CollectionMode::Basic),
            "detailed" => Ok(CollectionMode::Detailed),
            "complete" | "full" => Ok(CollectionMode::Complete),
            _ => Err(CollectorError::Configuration(format!(
                "invalid collection mode: {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionJob {
    pub id: JobId,
    pub key: JobKey,
    pub priority: Priority,
    pub mode: CollectionMode,
    pub force_fresh: bool,
    pub batch_id: Option<BatchId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stage: JobStage,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub result: Option<ProgressiveResult>,
}

impl CollectionJob {
    pub fn new(task_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            key: JobKey::new(task_type, identifier),
            priority: Priority::default(),
            mode: CollectionMode::default(),
            force_fresh: false,
            batch_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            stage: JobStage::Pending,
            retry_count: 0,
            last_error: None,
            result: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mode(mut self, mode: CollectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_force_fresh(mut self, force_fresh: bool) -> Self {
        self.force_fresh = force_fresh;
        self
    }

    pub fn in_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn identifier(&self) -> &str {
        &self.key.identifier
    }

    pub fn task_type(&self) -> &str {
        &self.key.task_type
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn completion_percentage(&self) -> u8 {
        match (&self.result, self.stage) {
            (Some(result), _) => result.completion_percentage,
            (None, JobStage::Done) => 100,
            _ => 0,
        }
    }

    /// Moves the job into a terminal stage; a terminal job is never reopened
    pub fn finish(&mut self, stage: JobStage, result: Option<ProgressiveResult>) {
        if self.is_terminal() {
            return;
        }
        debug_assert!(stage.is_terminal());
        self.stage = stage;
        self.completed_at = Some(Utc::now());
        if result.is_some() {
            self.result = result;
        }
    }
}

/// Read-only view returned to status consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub identifier: String,
    pub task_type: String,
    pub priority: Priority,
    pub mode: CollectionMode,
    pub stage: JobStage,
    pub completion_percentage: u8,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub batch_id: Option<BatchId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub from_cache: bool,
}

impl From<&CollectionJob> for JobStatus {
    fn from(job: &CollectionJob) -> Self {
        Self {
            job_id: job.id,
            identifier: job.key.identifier.clone(),
            task_type: job.key.task_type.clone(),
            priority: job.priority,
            mode: job.mode,
            stage: job.stage,
            completion_percentage: job.completion_percentage(),
            retry_count: job.retry_count,
            last_error: job.last_error.clone(),
            batch_id: job.batch_id,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            from_cache: job.result.as_ref().map(|r| r.from_cache).unwrap_or(false),
        }
    }
}
