//! Test data builders with sensible defaults

use collector_core::models::{BatchId, CollectionJob, CollectionMode, Priority};

/// Builder for [`CollectionJob`]
pub struct JobBuilder {
    job: CollectionJob,
}

impl JobBuilder {
    pub fn new(identifier: &str) -> Self {
        Self {
            job: CollectionJob::new("basic-record", identifier),
        }
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.job.key.task_type = task_type.to_string();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.job.priority = priority;
        self
    }

    pub fn with_mode(mut self, mode: CollectionMode) -> Self {
        self.job.mode = mode;
        self
    }

    pub fn force_fresh(mut self) -> Self {
        self.job.force_fresh = true;
        self
    }

    pub fn in_batch(mut self, batch_id: BatchId) -> Self {
        self.job.batch_id = Some(batch_id);
        self
    }

    pub fn build(self) -> CollectionJob {
        self.job
    }
}

/// Jobs for `identifiers` sharing one task type and mode
pub fn jobs_for(identifiers: &[&str], mode: CollectionMode) -> Vec<CollectionJob> {
    identifiers
        .iter()
        .map(|id| JobBuilder::new(id).with_mode(mode).build())
        .collect()
}
