//! Metrics collector for the collection engine
//!
//! Records counters, gauges and histograms through the `metrics` facade.
//! Without an installed recorder every call is a no-op.

use collector_core::models::{JobStage, StrategyKind};
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::{debug, info, warn};

/// Metrics collector shared by the scheduler, collector and orchestrator
#[derive(Clone)]
pub struct MetricsCollector {
    jobs_submitted_total: Counter,
    jobs_completed_total: Counter,
    jobs_failed_total: Counter,
    jobs_cancelled_total: Counter,
    duplicate_jobs_total: Counter,
    job_retries_total: Counter,
    job_duration: Histogram,

    running_jobs: Gauge,
    queue_depth: Gauge,

    batches_started_total: Counter,
    batches_completed_total: Counter,
    batch_duration: Histogram,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            jobs_submitted_total: counter!("collector_jobs_submitted_total"),
            jobs_completed_total: counter!("collector_jobs_completed_total"),
            jobs_failed_total: counter!("collector_jobs_failed_total"),
            jobs_cancelled_total: counter!("collector_jobs_cancelled_total"),
            duplicate_jobs_total: counter!("collector_duplicate_jobs_total"),
            job_retries_total: counter!("collector_job_retries_total"),
            job_duration: histogram!("collector_job_duration_seconds"),
            running_jobs: gauge!("collector_running_jobs"),
            queue_depth: gauge!("collector_queue_depth"),
            batches_started_total: counter!("collector_batches_started_total"),
            batches_completed_total: counter!("collector_batches_completed_total"),
            batch_duration: histogram!("collector_batch_duration_seconds"),
        }
    }

    // Job metrics

    pub fn record_job_submitted(&self, task_type: &str) {
        self.jobs_submitted_total.increment(1);
        debug!(task_type = task_type, "Job submitted");
    }

    pub fn record_duplicate_job(&self, task_type: &str, identifier: &str) {
        self.duplicate_jobs_total.increment(1);
        debug!(
            task_type = task_type,
            identifier = identifier,
            "Duplicate job rejected"
        );
    }

    /// Record a job reaching a terminal stage
    pub fn record_job_finished(&self, task_type: &str, stage: JobStage, duration_seconds: f64) {
        match stage {
            JobStage::Done => self.jobs_completed_total.increment(1),
            JobStage::Failed => self.jobs_failed_total.increment(1),
            JobStage::Cancelled => self.jobs_cancelled_total.increment(1),
            _ => return,
        }
        self.job_duration.record(duration_seconds);

        info!(
            task_type = task_type,
            stage = %stage,
            duration_seconds = duration_seconds,
            "Job finished"
        );
    }

    pub fn record_retry(&self, identifier: &str, retry_count: u32) {
        self.job_retries_total.increment(1);
        warn!(
            identifier = identifier,
            retry_count = retry_count,
            "Retrying transient failure"
        );
    }

    pub fn record_stage_duration(&self, stage: JobStage, duration_seconds: f64) {
        histogram!("collector_stage_duration_seconds", "stage" => stage.as_str())
            .record(duration_seconds);
    }

    pub fn record_fallback_used(&self, strategy: StrategyKind) {
        counter!("collector_fallback_usage_total", "strategy" => strategy.as_tag()).increment(1);
    }

    pub fn update_running_jobs(&self, count: usize) {
        self.running_jobs.set(count as f64);
    }

    pub fn update_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    // Batch metrics

    pub fn record_batch_started(&self, size: usize) {
        self.batches_started_total.increment(1);
        info!(size = size, "Batch started");
    }

    pub fn record_batch_completed(&self, successful: usize, failed: usize, duration_seconds: f64) {
        self.batches_completed_total.increment(1);
        self.batch_duration.record(duration_seconds);

        info!(
            successful = successful,
            failed = failed,
            duration_seconds = duration_seconds,
            "Batch completed"
        );
    }
}
