//! 批次编排服务
//!
//! 把一组标识符翻译成调度器任务，汇总各任务的进度，在全部任务终结或批次总超时后
//! 生成不可变的批次汇总，并将批次从活动表移入已完成表（按保留时间清理）。
//!
//! 每个批次由一个驱动任务负责：所有任务共享同一个进度回调，回调只把事件投递到
//! 驱动任务的通道中，聚合计算、超时和并发窗口都在驱动任务里完成。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use collector_core::config::BatchConfig;
use collector_core::models::{
    BatchId, BatchOptions, BatchProgress, BatchRequest, BatchState, BatchSummary, CollectionJob,
    CollectionMode, ItemResult, JobId, JobStage, StageCounts,
};
use collector_core::traits::{JobEvent, ProgressCallback};
use collector_core::{CollectorError, CollectorResult};
use collector_dispatcher::JobScheduler;
use collector_infrastructure::MetricsCollector;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::statistics::{AggregateStatistics, StatisticsSnapshot};

/// Push-style batch notification
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        batch_id: BatchId,
        total: usize,
    },
    Progress {
        batch_id: BatchId,
        job_id: JobId,
        stage: JobStage,
        progress_percentage: f64,
    },
    Finished {
        batch_id: BatchId,
        state: BatchState,
        successful: usize,
        failed: usize,
    },
}

impl BatchEvent {
    pub fn batch_id(&self) -> BatchId {
        match self {
            BatchEvent::Started { batch_id, .. }
            | BatchEvent::Progress { batch_id, .. }
            | BatchEvent::Finished { batch_id, .. } => *batch_id,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One identifier of a batch
struct ItemSlot {
    identifier: String,
    job_id: Option<JobId>,
    /// The job belongs to another submission; this batch only observes it
    followed: bool,
    /// Submission error; the item never reached the scheduler
    rejected: Option<String>,
}

#[derive(Default)]
struct TrackerState {
    items: Vec<ItemSlot>,
    stages: HashMap<JobId, JobStage>,
    completion: HashMap<JobId, u8>,
    progress_percentage: f64,
}

impl TrackerState {
    fn stage_of(&self, slot: &ItemSlot) -> JobStage {
        if slot.rejected.is_some() {
            return JobStage::Failed;
        }
        slot.job_id
            .and_then(|job_id| self.stages.get(&job_id).copied())
            .unwrap_or(JobStage::Pending)
    }

    fn is_settled(&self, slot: &ItemSlot) -> bool {
        slot.rejected.is_some() || (slot.job_id.is_some() && self.stage_of(slot).is_terminal())
    }

    fn in_flight(&self) -> usize {
        self.items
            .iter()
            .filter(|slot| slot.job_id.is_some() && !self.is_settled(slot))
            .count()
    }

    fn all_settled(&self) -> bool {
        self.items.iter().all(|slot| self.is_settled(slot))
    }

    fn recompute_progress(&mut self) -> f64 {
        let total = self.items.len();
        self.progress_percentage = if total == 0 {
            100.0
        } else {
            let sum: u32 = self
                .items
                .iter()
                .filter_map(|slot| slot.job_id)
                .map(|job_id| u32::from(self.completion.get(&job_id).copied().unwrap_or(0)))
                .sum();
            f64::from(sum) / total as f64
        };
        self.progress_percentage
    }

    fn counts(&self) -> StageCounts {
        let mut counts = StageCounts::default();
        for slot in &self.items {
            counts.tally(self.stage_of(slot));
        }
        counts
    }
}

struct BatchTracker {
    request: BatchRequest,
    started: Instant,
    cancel: CancellationToken,
    state: Mutex<TrackerState>,
}

struct CompletedBatch {
    summary: BatchSummary,
    stored_at: Instant,
}

struct OrchestratorInner {
    config: BatchConfig,
    scheduler: JobScheduler,
    statistics: AggregateStatistics,
    metrics: MetricsCollector,
    active: Mutex<HashMap<BatchId, Arc<BatchTracker>>>,
    completed: Mutex<HashMap<BatchId, CompletedBatch>>,
    events: broadcast::Sender<BatchEvent>,
    /// Signalled whenever a batch moves to completed storage
    batch_finished: Notify,
    shutdown: CancellationToken,
}

/// 批次编排器，可克隆的句柄
///
/// Turns a batch request into one scheduler job per identifier and follows
/// them to a [`BatchSummary`]. Progress can be polled with
/// [`get_status`](Self::get_status) or pushed through
/// [`subscribe`](Self::subscribe). A batch ends when every item is terminal,
/// on its total timeout, or on [`cancel_batch`](Self::cancel_batch); the
/// summary then stays available until the retention period runs out.
///
/// An identifier that is already being collected by another submission is
/// followed rather than resubmitted. Ending the batch early never cancels
/// such a followed job.
#[derive(Clone)]
pub struct BatchOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl BatchOrchestrator {
    /// Wraps a scheduler; call [`start`](Self::start) to run batch eviction
    pub fn new(config: BatchConfig, scheduler: JobScheduler) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                scheduler,
                statistics: AggregateStatistics::new(),
                metrics: MetricsCollector::new(),
                active: Mutex::new(HashMap::new()),
                completed: Mutex::new(HashMap::new()),
                events,
                batch_finished: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Only effective before the orchestrator is shared
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.metrics = metrics;
        }
        self
    }

    /// Spawns the completed-batch eviction loop
    pub fn start(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.cleanup_loop().await });
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.inner.scheduler
    }

    /// Submits one job per identifier and returns immediately
    pub fn execute_batch(
        &self,
        identifiers: Vec<String>,
        task_type: &str,
        mode: CollectionMode,
        options: BatchOptions,
    ) -> CollectorResult<BatchId> {
        self.execute(BatchRequest::new(identifiers, task_type, mode, options))
    }

    /// Accepts a prepared request; fails only when the engine is shutting down
    pub fn execute(&self, request: BatchRequest) -> CollectorResult<BatchId> {
        if self.inner.shutdown.is_cancelled() || self.inner.scheduler.is_shutdown() {
            return Err(CollectorError::SchedulerShutdown);
        }

        let batch_id = request.batch_id;
        let total = request.identifiers.len();
        let jobs: Vec<CollectionJob> = request
            .identifiers
            .iter()
            .map(|identifier| {
                CollectionJob::new(request.task_type.as_str(), identifier.as_str())
                    .with_priority(request.options.priority)
                    .with_mode(request.mode)
                    .with_force_fresh(request.options.force_fresh)
                    .in_batch(batch_id)
            })
            .collect();

        let items = request
            .identifiers
            .iter()
            .map(|identifier| ItemSlot {
                identifier: identifier.clone(),
                job_id: None,
                followed: false,
                rejected: None,
            })
            .collect();

        let tracker = Arc::new(BatchTracker {
            request,
            started: Instant::now(),
            cancel: self.inner.shutdown.child_token(),
            state: Mutex::new(TrackerState {
                items,
                ..TrackerState::default()
            }),
        });
        lock(&self.inner.active).insert(batch_id, tracker.clone());

        self.inner.statistics.record_batch_started(total);
        self.inner.metrics.record_batch_started(total);
        let _ = self.inner.events.send(BatchEvent::Started { batch_id, total });
        info!(
            batch_id = %batch_id,
            task_type = %tracker.request.task_type,
            mode = ?tracker.request.mode,
            total = total,
            "Batch accepted"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.drive(tracker, jobs).await });
        Ok(batch_id)
    }

    /// Live progress of a running batch, or the final picture of a completed one
    pub fn get_status(&self, batch_id: BatchId) -> Option<BatchProgress> {
        let tracker = lock(&self.inner.active).get(&batch_id).cloned();
        if let Some(tracker) = tracker {
            let state = lock(&tracker.state);
            return Some(BatchProgress {
                batch_id,
                state: BatchState::Running,
                total: state.items.len(),
                progress_percentage: state.progress_percentage,
                counts: state.counts(),
                elapsed_seconds: tracker.started.elapsed().as_secs_f64(),
            });
        }

        lock(&self.inner.completed)
            .get(&batch_id)
            .map(|completed| progress_of(&completed.summary))
    }

    /// Summary of a finished batch; `None` while it runs or after eviction
    pub fn get_results(&self, batch_id: BatchId) -> Option<BatchSummary> {
        lock(&self.inner.completed)
            .get(&batch_id)
            .map(|completed| completed.summary.clone())
    }

    /// Waits until the batch has a summary; `None` if the batch is unknown
    pub async fn wait_for(&self, batch_id: BatchId) -> Option<BatchSummary> {
        loop {
            let notified = self.inner.batch_finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(summary) = self.get_results(batch_id) {
                return Some(summary);
            }
            if !lock(&self.inner.active).contains_key(&batch_id) {
                return None;
            }
            notified.await;
        }
    }

    /// Cancels every outstanding job of a running batch
    pub fn cancel_batch(&self, batch_id: BatchId) -> bool {
        let Some(tracker) = lock(&self.inner.active).get(&batch_id).cloned() else {
            return false;
        };
        if tracker.cancel.is_cancelled() {
            return false;
        }
        info!(batch_id = %batch_id, "Batch cancellation requested");
        tracker.cancel.cancel();
        true
    }

    /// Receives every batch event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    /// Counters aggregated over all batches since startup
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.statistics.snapshot()
    }

    pub fn active_batches(&self) -> Vec<BatchId> {
        lock(&self.inner.active).keys().copied().collect()
    }

    /// Drops completed batches older than the retention period
    pub fn evict_completed(&self) -> usize {
        self.inner.evict_completed()
    }

    /// Cancels all running batches and stops maintenance
    pub fn shutdown(&self) {
        let active = lock(&self.inner.active).len();
        info!(active_batches = active, "Shutting down batch orchestrator");
        self.inner.shutdown.cancel();
    }
}

fn progress_of(summary: &BatchSummary) -> BatchProgress {
    let mut counts = StageCounts::default();
    let mut sum = 0u32;
    for item in &summary.items {
        counts.tally(item.stage);
        sum += u32::from(item.completion_percentage);
    }
    BatchProgress {
        batch_id: summary.batch_id,
        state: summary.state,
        total: summary.total,
        progress_percentage: if summary.total == 0 {
            100.0
        } else {
            f64::from(sum) / summary.total as f64
        },
        counts,
        elapsed_seconds: summary.total_time_seconds,
    }
}

impl OrchestratorInner {
    async fn drive(self: Arc<Self>, tracker: Arc<BatchTracker>, jobs: Vec<CollectionJob>) {
        let batch_id = tracker.request.batch_id;
        let options = &tracker.request.options;
        let total_timeout = if options.total_timeout_ms == 0 {
            self.config.default_total_timeout()
        } else {
            Duration::from_millis(options.total_timeout_ms)
        };
        let deadline = tracker.started + total_timeout;
        let window = options.max_concurrency.unwrap_or(usize::MAX).max(1);
        let per_request = options.per_request_timeout_ms.map(Duration::from_millis);

        let (tx, mut events) = mpsc::unbounded_channel::<JobEvent>();
        let callback: ProgressCallback = {
            let tx = tx.clone();
            Arc::new(move |event: JobEvent| {
                let _ = tx.send(event);
            })
        };

        let mut queue = jobs.into_iter().enumerate();
        let mut watchdogs: HashMap<JobId, Instant> = HashMap::new();

        let outcome = loop {
            self.top_up(&tracker, &mut queue, window, &callback, &tx);
            if queue.len() == 0 && lock(&tracker.state).all_settled() {
                break BatchState::Completed;
            }

            let watchdog = watchdogs.values().min().copied();
            tokio::select! {
                biased;
                _ = tracker.cancel.cancelled() => break BatchState::Cancelled,
                _ = tokio::time::sleep_until(deadline) => break BatchState::TimedOut,
                Some(event) = events.recv() => {
                    self.apply_event(&tracker, event, per_request, &mut watchdogs);
                }
                _ = tokio::time::sleep_until(watchdog.unwrap_or(deadline)), if watchdog.is_some() => {
                    let now = Instant::now();
                    watchdogs.retain(|job_id, expires| {
                        if *expires > now {
                            return true;
                        }
                        warn!(batch_id = %batch_id, job_id = %job_id, "Job exceeded per-request timeout, cancelling");
                        self.scheduler.cancel(*job_id);
                        false
                    });
                }
            }
        };

        // Events already queued still count towards the final picture
        while let Ok(event) = events.try_recv() {
            self.apply_event(&tracker, event, None, &mut watchdogs);
        }
        let unfinished_error = match outcome {
            BatchState::TimedOut => Some(CollectorError::timeout("batch", total_timeout).to_string()),
            BatchState::Cancelled => Some(CollectorError::Cancelled.to_string()),
            _ => None,
        };
        self.finish(&tracker, outcome, unfinished_error);
    }

    /// Submits queued jobs while the batch window has room
    fn top_up(
        &self,
        tracker: &BatchTracker,
        queue: &mut impl Iterator<Item = (usize, CollectionJob)>,
        window: usize,
        callback: &ProgressCallback,
        tx: &mpsc::UnboundedSender<JobEvent>,
    ) {
        while lock(&tracker.state).in_flight() < window {
            let Some((index, job)) = queue.next() else {
                return;
            };
            let identifier = job.identifier().to_string();
            let submitted = self
                .scheduler
                .submit_with_callback(vec![job], callback.clone())
                .pop()
                .unwrap_or(Err(CollectorError::Internal("empty submission".to_string())));

            let mut state = lock(&tracker.state);
            let slot = &mut state.items[index];
            match submitted {
                Ok(job_id) => slot.job_id = Some(job_id),
                Err(CollectorError::DuplicateJob { existing_job_id }) => {
                    debug!(
                        batch_id = %tracker.request.batch_id,
                        identifier = %identifier,
                        existing_job_id = %existing_job_id,
                        "Identifier already in flight, following existing job"
                    );
                    slot.job_id = Some(existing_job_id);
                    slot.followed = true;
                    self.follow(existing_job_id, tx.clone());
                }
                Err(e) => {
                    warn!(
                        batch_id = %tracker.request.batch_id,
                        identifier = %identifier,
                        error = %e,
                        "Job submission rejected"
                    );
                    slot.rejected = Some(e.to_string());
                }
            }
        }
    }

    /// Forwards the terminal state of a job owned by someone else
    fn follow(&self, job_id: JobId, tx: mpsc::UnboundedSender<JobEvent>) {
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            let event = match scheduler.wait_for(job_id).await {
                Some(job) => JobEvent::Finished {
                    job_id,
                    stage: job.stage,
                    completion_percentage: job.completion_percentage(),
                },
                None => JobEvent::Finished {
                    job_id,
                    stage: JobStage::Failed,
                    completion_percentage: 0,
                },
            };
            let _ = tx.send(event);
        });
    }

    fn apply_event(
        &self,
        tracker: &BatchTracker,
        event: JobEvent,
        per_request: Option<Duration>,
        watchdogs: &mut HashMap<JobId, Instant>,
    ) {
        let job_id = event.job_id();
        let stage = event.stage();
        let progress_percentage = {
            let mut state = lock(&tracker.state);
            if state.stages.get(&job_id).is_some_and(|s| s.is_terminal()) {
                return;
            }
            state.stages.insert(job_id, stage);
            match event {
                JobEvent::StageStarted { stage: JobStage::Basic, .. } => {
                    if let Some(limit) = per_request {
                        watchdogs.entry(job_id).or_insert_with(|| Instant::now() + limit);
                    }
                }
                JobEvent::StageStarted { .. } => {}
                JobEvent::StageCompleted {
                    completion_percentage,
                    ..
                }
                | JobEvent::Finished {
                    completion_percentage,
                    ..
                } => {
                    state.completion.insert(job_id, completion_percentage);
                }
            }
            if stage.is_terminal() {
                watchdogs.remove(&job_id);
            }
            state.recompute_progress()
        };

        let _ = self.events.send(BatchEvent::Progress {
            batch_id: tracker.request.batch_id,
            job_id,
            stage,
            progress_percentage,
        });
    }

    fn finish(&self, tracker: &BatchTracker, outcome: BatchState, unfinished_error: Option<String>) {
        let batch_id = tracker.request.batch_id;

        let items: Vec<ItemResult> = {
            let state = lock(&tracker.state);
            if outcome != BatchState::Completed {
                // followed jobs keep running for their owner
                for slot in state.items.iter().filter(|slot| !slot.followed) {
                    if let Some(job_id) = slot.job_id {
                        if !state.is_settled(slot) {
                            self.scheduler.cancel(job_id);
                        }
                    }
                }
            }
            state
                .items
                .iter()
                .map(|slot| self.item_result(&state, slot, unfinished_error.as_deref()))
                .collect()
        };

        let successful = items.iter().filter(|item| item.success).count();
        let failed = items.iter().filter(|item| item.stage == JobStage::Failed).count();
        let cancelled = items.iter().filter(|item| item.stage == JobStage::Cancelled).count();
        let total_time_seconds = tracker.started.elapsed().as_secs_f64();

        let summary = BatchSummary {
            batch_id,
            task_type: tracker.request.task_type.clone(),
            mode: tracker.request.mode,
            state: outcome,
            total: items.len(),
            successful,
            failed,
            cancelled,
            total_time_seconds,
            items,
            completed_at: chrono::Utc::now(),
        };

        self.statistics.record_batch_finished(&summary);
        self.metrics.record_batch_completed(successful, failed, total_time_seconds);
        info!(
            batch_id = %batch_id,
            state = ?outcome,
            successful = successful,
            failed = failed,
            cancelled = cancelled,
            total_time_seconds = total_time_seconds,
            "批次完成"
        );

        lock(&self.completed).insert(
            batch_id,
            CompletedBatch {
                summary,
                stored_at: Instant::now(),
            },
        );
        lock(&self.active).remove(&batch_id);

        let _ = self.events.send(BatchEvent::Finished {
            batch_id,
            state: outcome,
            successful,
            failed,
        });
        self.batch_finished.notify_waiters();
    }

    fn item_result(&self, state: &TrackerState, slot: &ItemSlot, unfinished_error: Option<&str>) -> ItemResult {
        let unfinished = |job_id: Option<JobId>, error: Option<String>| ItemResult {
            identifier: slot.identifier.clone(),
            job_id,
            success: false,
            stage: JobStage::Cancelled,
            reached_stage: None,
            completion_percentage: 0,
            retry_count: 0,
            error: error.or_else(|| unfinished_error.map(str::to_string)),
            result: None,
        };

        if let Some(error) = &slot.rejected {
            return ItemResult {
                stage: JobStage::Failed,
                ..unfinished(None, Some(error.clone()))
            };
        }
        let Some(job_id) = slot.job_id else {
            return unfinished(None, None);
        };
        let Some(job) = self.scheduler.job(job_id) else {
            // evicted by the scheduler; fall back to what the batch observed
            let stage = state.stage_of(slot);
            return ItemResult {
                success: stage == JobStage::Done,
                stage: if stage.is_terminal() { stage } else { JobStage::Cancelled },
                completion_percentage: state.completion.get(&job_id).copied().unwrap_or(0),
                ..unfinished(Some(job_id), None)
            };
        };

        let stage = if job.is_terminal() { job.stage } else { JobStage::Cancelled };
        let error = match stage {
            JobStage::Done => None,
            _ => job
                .last_error
                .clone()
                .or_else(|| unfinished_error.map(str::to_string)),
        };
        ItemResult {
            identifier: slot.identifier.clone(),
            job_id: Some(job_id),
            success: stage == JobStage::Done,
            stage,
            reached_stage: job.result.as_ref().and_then(|r| r.last_completed_stage),
            completion_percentage: job.completion_percentage(),
            retry_count: job.retry_count,
            error,
            result: job.result,
        }
    }

    fn evict_completed(&self) -> usize {
        let retention = Duration::from_secs(self.config.completed_retention_seconds);
        let now = Instant::now();
        let mut completed = lock(&self.completed);
        let before = completed.len();
        completed.retain(|_, batch| now.saturating_duration_since(batch.stored_at) < retention);
        let evicted = before - completed.len();
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted completed batches");
        }
        evicted
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.cleanup_interval_seconds.max(1)));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.evict_completed();
                }
            }
        }
        debug!("Batch cleanup loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(identifier: &str, job_id: Option<JobId>) -> ItemSlot {
        ItemSlot {
            identifier: identifier.to_string(),
            job_id,
            followed: false,
            rejected: None,
        }
    }

    #[test]
    fn test_progress_is_mean_of_item_completion() {
        let (a, b) = (JobId::new(), JobId::new());
        let mut state = TrackerState {
            items: vec![slot("A", Some(a)), slot("B", Some(b)), slot("C", None)],
            ..TrackerState::default()
        };
        state.completion.insert(a, 100);
        state.completion.insert(b, 50);

        assert_eq!(state.recompute_progress(), 50.0);
    }

    #[test]
    fn test_settled_items() {
        let job_id = JobId::new();
        let mut state = TrackerState {
            items: vec![
                slot("A", Some(job_id)),
                ItemSlot {
                    rejected: Some("scheduler is shutting down".to_string()),
                    ..slot("B", None)
                },
            ],
            ..TrackerState::default()
        };
        assert_eq!(state.in_flight(), 1);
        assert!(!state.all_settled());

        state.stages.insert(job_id, JobStage::Done);
        assert_eq!(state.in_flight(), 0);
        assert!(state.all_settled());

        let counts = state.counts();
        assert_eq!(counts.done, 1);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn test_empty_batch_is_complete() {
        let mut state = TrackerState::default();
        assert!(state.all_settled());
        assert_eq!(state.recompute_progress(), 100.0);
    }
}
