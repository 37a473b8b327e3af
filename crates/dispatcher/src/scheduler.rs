//! 优先级任务调度器
//!
//! 负责任务去重、缓存短路、按优先级派发到有限的执行槽位，以及取消与已完成任务的保留清理。
//! 每个派发出去的任务拥有独立的取消令牌；执行器在阶段之间检查该令牌。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use collector_core::config::SchedulerConfig;
use collector_core::models::{
    CollectionJob, CollectionMode, JobId, JobKey, JobStage, JobStatus, ProgressiveResult,
};
use collector_core::traits::{
    JobContext, JobEvent, JobExecutor, JobOutcome, PersistenceSink, ProgressCallback,
};
use collector_core::{CollectorError, CollectorResult};
use collector_infrastructure::{AdaptiveRateLimiter, MetricsCollector, NoopPersistenceSink, ResultCache};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::JobQueue;

/// Minimum cached completion that satisfies a mode
pub fn required_completion(mode: CollectionMode) -> u8 {
    match mode {
        CollectionMode::Basic => 33,
        CollectionMode::Detailed => 66,
        CollectionMode::Complete => 100,
    }
}

struct JobEntry {
    job: CollectionJob,
    cancel: CancellationToken,
    callback: Option<ProgressCallback>,
    finished_at: Option<Instant>,
}

#[derive(Default)]
struct SchedulerState {
    queue: JobQueue,
    jobs: HashMap<JobId, JobEntry>,
    /// Non-terminal job per key
    active: HashMap<JobKey, JobId>,
    closed: bool,
}

struct SchedulerInner {
    config: SchedulerConfig,
    executor: Arc<dyn JobExecutor>,
    cache: Arc<ResultCache>,
    rate_limiter: AdaptiveRateLimiter,
    persistence: Arc<dyn PersistenceSink>,
    metrics: MetricsCollector,
    state: Mutex<SchedulerState>,
    slots: Arc<Semaphore>,
    /// Signalled when a job is queued
    queued: Notify,
    /// Signalled whenever a job reaches a terminal stage
    finished: Notify,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    shutdown: CancellationToken,
}

/// Cloneable handle onto one scheduler instance.
///
/// Jobs are admitted through [`submit`](Self::submit): a key that already has a
/// non-terminal job is rejected with `DuplicateJob`, and a cached record deep
/// enough for the requested mode finishes the job synchronously. Everything
/// else waits in a priority queue until a worker slot and a rate limiter token
/// are available.
///
/// `with_persistence` and `with_metrics` must be called before the handle is
/// cloned.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    /// Creates an idle scheduler; nothing is dispatched until [`start`](Self::start)
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<dyn JobExecutor>,
        cache: Arc<ResultCache>,
        rate_limiter: AdaptiveRateLimiter,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                executor,
                cache,
                rate_limiter,
                persistence: Arc::new(NoopPersistenceSink),
                metrics: MetricsCollector::new(),
                state: Mutex::new(SchedulerState::default()),
                slots,
                queued: Notify::new(),
                finished: Notify::new(),
                running: AtomicUsize::new(0),
                peak_running: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Only effective before the scheduler is shared
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceSink>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.persistence = persistence;
        }
        self
    }

    /// Only effective before the scheduler is shared
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.metrics = metrics;
        }
        self
    }

    /// Spawns the dispatch and maintenance loops
    pub fn start(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.dispatch_loop().await });

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.cleanup_loop().await });

        info!(
            max_concurrent_jobs = self.inner.config.max_concurrent_jobs,
            rate_limit_target = %self.inner.config.rate_limit_target,
            "Job scheduler started"
        );
    }

    /// Submits jobs; duplicates of a non-terminal job yield `DuplicateJob`
    pub fn submit(&self, jobs: Vec<CollectionJob>) -> Vec<CollectorResult<JobId>> {
        jobs.into_iter()
            .map(|job| self.inner.submit(job, None))
            .collect()
    }

    /// Like [`submit`](Self::submit), installing `callback` on every accepted job
    pub fn submit_with_callback(
        &self,
        jobs: Vec<CollectionJob>,
        callback: ProgressCallback,
    ) -> Vec<CollectorResult<JobId>> {
        jobs.into_iter()
            .map(|job| self.inner.submit(job, Some(callback.clone())))
            .collect()
    }

    /// Submits a single job without a progress callback
    pub fn submit_one(&self, job: CollectionJob) -> CollectorResult<JobId> {
        self.inner.submit(job, None)
    }

    /// Cancels a pending or running job; false when unknown or already terminal
    pub fn cancel(&self, job_id: JobId) -> bool {
        self.inner.cancel(job_id)
    }

    /// Status view of a job; `None` once the job was evicted
    pub fn status(&self, job_id: JobId) -> Option<JobStatus> {
        self.inner
            .lock_state()
            .jobs
            .get(&job_id)
            .map(|entry| JobStatus::from(&entry.job))
    }

    /// Snapshot of the job including its partial or final result
    pub fn job(&self, job_id: JobId) -> Option<CollectionJob> {
        self.inner
            .lock_state()
            .jobs
            .get(&job_id)
            .map(|entry| entry.job.clone())
    }

    /// Waits until the job is terminal; `None` if the job is unknown
    pub async fn wait_for(&self, job_id: JobId) -> Option<CollectionJob> {
        loop {
            let notified = self.inner.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.job(job_id) {
                None => return None,
                Some(job) if job.is_terminal() => return Some(job),
                Some(_) => {}
            }
            notified.await;
        }
    }

    /// Jobs currently holding a worker slot
    pub fn running_count(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running jobs observed
    pub fn peak_running(&self) -> usize {
        self.inner.peak_running.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a worker slot
    pub fn queue_depth(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    /// Non-terminal jobs, queued or running
    pub fn active_count(&self) -> usize {
        self.inner.lock_state().active.len()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.inner.cache
    }

    pub fn rate_limiter(&self) -> &AdaptiveRateLimiter {
        &self.inner.rate_limiter
    }

    /// Drops terminal jobs older than the retention period
    pub fn evict_completed(&self) -> usize {
        self.inner.evict_completed()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stops dispatching, cancels pending jobs and waits up to the grace period
    /// for running jobs; stragglers are then cancelled cooperatively.
    pub async fn shutdown(&self) {
        let pending = {
            let mut state = self.inner.lock_state();
            state.closed = true;
            state.queue.drain()
        };
        self.inner.shutdown.cancel();
        info!(pending = pending.len(), running = self.running_count(), "Shutting down job scheduler");

        for job_id in pending {
            self.inner.cancel(job_id);
        }

        let grace = std::time::Duration::from_secs(self.inner.config.shutdown_grace_seconds);
        if tokio::time::timeout(grace, self.inner.wait_idle()).await.is_err() {
            let running: Vec<JobId> = {
                let state = self.inner.lock_state();
                state
                    .jobs
                    .iter()
                    .filter(|(_, e)| !e.job.is_terminal())
                    .map(|(id, _)| *id)
                    .collect()
            };
            warn!(running = running.len(), "Grace period elapsed, cancelling running jobs");
            for job_id in running {
                self.inner.cancel(job_id);
            }
            self.inner.wait_idle().await;
        }
        info!("Job scheduler stopped");
    }
}

impl SchedulerInner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn submit(
        self: &Arc<Self>,
        mut job: CollectionJob,
        callback: Option<ProgressCallback>,
    ) -> CollectorResult<JobId> {
        let job_id = job.id;
        let key = job.key.clone();

        let cached = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if state.closed {
                return Err(CollectorError::SchedulerShutdown);
            }
            if let Some(existing) = state.active.get(&key) {
                self.metrics.record_duplicate_job(&key.task_type, &key.identifier);
                return Err(CollectorError::DuplicateJob {
                    existing_job_id: *existing,
                });
            }

            let cached = if job.force_fresh {
                None
            } else {
                self.cache.get_covering(&key, required_completion(job.mode))
            };

            match cached {
                Some(mut result) => {
                    result.from_cache = true;
                    job.started_at = Some(Utc::now());
                    job.finish(JobStage::Done, Some(result));
                    let completion = job.completion_percentage();
                    state.jobs.insert(
                        job_id,
                        JobEntry {
                            job,
                            cancel: CancellationToken::new(),
                            callback: callback.clone(),
                            finished_at: Some(Instant::now()),
                        },
                    );
                    Some(completion)
                }
                None => {
                    state.active.insert(key.clone(), job_id);
                    state.queue.push(job_id, job.priority);
                    state.jobs.insert(
                        job_id,
                        JobEntry {
                            job,
                            cancel: CancellationToken::new(),
                            callback: callback.clone(),
                            finished_at: None,
                        },
                    );
                    self.metrics.update_queue_depth(state.queue.len());
                    None
                }
            }
        };

        self.metrics.record_job_submitted(&key.task_type);
        match cached {
            Some(completion_percentage) => {
                debug!(job_id = %job_id, key = %key, "Served from cache");
                self.metrics.record_job_finished(&key.task_type, JobStage::Done, 0.0);
                if let Some(callback) = callback {
                    callback(JobEvent::Finished {
                        job_id,
                        stage: JobStage::Done,
                        completion_percentage,
                    });
                }
                self.finished.notify_waiters();
            }
            None => {
                debug!(job_id = %job_id, key = %key, "Job queued");
                self.queued.notify_one();
            }
        }
        Ok(job_id)
    }

    fn cancel(&self, job_id: JobId) -> bool {
        let finished = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let Some(entry) = state.jobs.get_mut(&job_id) else {
                return false;
            };
            match entry.job.stage {
                JobStage::Pending => {
                    entry.cancel.cancel();
                    entry.job.last_error = Some(CollectorError::Cancelled.to_string());
                    entry.job.finish(JobStage::Cancelled, None);
                    entry.finished_at = Some(Instant::now());
                    let key = entry.job.key.clone();
                    let callback = entry.callback.clone();

                    state.queue.remove(job_id);
                    if state.active.get(&key) == Some(&job_id) {
                        state.active.remove(&key);
                    }
                    self.metrics.update_queue_depth(state.queue.len());
                    (callback, key.task_type)
                }
                stage if stage.is_running() => {
                    info!(job_id = %job_id, stage = %stage, "Cancellation requested for running job");
                    entry.cancel.cancel();
                    return true;
                }
                _ => return false,
            }
        };

        let (callback, task_type) = finished;
        info!(job_id = %job_id, "Pending job cancelled");
        self.metrics.record_job_finished(&task_type, JobStage::Cancelled, 0.0);
        if let Some(callback) = callback {
            callback(JobEvent::Finished {
                job_id,
                stage: JobStage::Cancelled,
                completion_percentage: 0,
            });
        }
        self.finished.notify_waiters();
        true
    }

    fn has_pending(&self) -> bool {
        !self.lock_state().queue.is_empty()
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let poll = self.config.dispatch_poll_interval();
        let target = self.config.rate_limit_target.clone();

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // 等待待处理任务与限流许可
            loop {
                if self.has_pending() && self.rate_limiter.has_capacity(&target).await {
                    break;
                }
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = self.queued.notified() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
            }

            match self.take_next() {
                Some(ctx) => self.launch(ctx, permit),
                None => drop(permit),
            }
        }
        debug!("Dispatch loop stopped");
    }

    /// Pops the next pending job and marks it running
    fn take_next(self: &Arc<Self>) -> Option<JobContext> {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        while let Some(job_id) = state.queue.pop() {
            let Some(entry) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            if entry.job.stage != JobStage::Pending {
                continue;
            }
            entry.job.stage = JobStage::Basic;
            entry.job.started_at = Some(Utc::now());

            let weak = Arc::downgrade(self);
            let user_callback = entry.callback.clone();
            let progress: ProgressCallback = Arc::new(move |event: JobEvent| {
                if let Some(inner) = Weak::upgrade(&weak) {
                    inner.apply_event(&event);
                }
                if let Some(callback) = &user_callback {
                    callback(event);
                }
            });
            let ctx = JobContext::new(entry.job.clone(), entry.cancel.clone()).with_progress(progress);
            self.metrics.update_queue_depth(state.queue.len());
            return Some(ctx);
        }
        None
    }

    fn launch(self: &Arc<Self>, ctx: JobContext, permit: OwnedSemaphorePermit) {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(running, Ordering::SeqCst);
        self.metrics.update_running_jobs(running);

        let job_id = ctx.job.id;
        info!(
            job_id = %job_id,
            identifier = %ctx.job.identifier(),
            priority = ?ctx.job.priority,
            mode = ?ctx.job.mode,
            "Dispatching job"
        );

        let inner = self.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = inner.executor.execute(ctx).await;
            inner.complete(job_id, outcome, started.elapsed().as_secs_f64());

            let running = inner.running.fetch_sub(1, Ordering::SeqCst) - 1;
            inner.metrics.update_running_jobs(running);
            drop(permit);
            inner.finished.notify_waiters();
        });
    }

    fn apply_event(&self, event: &JobEvent) {
        let mut state = self.lock_state();
        let Some(entry) = state.jobs.get_mut(&event.job_id()) else {
            return;
        };
        if entry.job.is_terminal() {
            return;
        }
        match event {
            JobEvent::StageStarted { stage, .. } => entry.job.stage = *stage,
            JobEvent::StageCompleted { partial, .. } => entry.job.result = Some(partial.clone()),
            JobEvent::Finished { .. } => {}
        }
    }

    fn complete(&self, job_id: JobId, outcome: JobOutcome, elapsed_seconds: f64) {
        let JobOutcome {
            stage,
            result,
            retry_count,
            error,
        } = outcome;

        let finished = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let Some(entry) = state.jobs.get_mut(&job_id) else {
                return;
            };
            entry.job.retry_count = retry_count;
            if let Some(error) = &error {
                entry.job.last_error = Some(error.to_string());
            }
            entry.job.finish(stage, result);
            entry.finished_at = Some(Instant::now());

            let key = entry.job.key.clone();
            let finished = (
                entry.callback.clone(),
                key.clone(),
                entry.job.stage,
                entry.job.completion_percentage(),
                entry.job.result.clone(),
            );
            if state.active.get(&key) == Some(&job_id) {
                state.active.remove(&key);
            }
            finished
        };
        let (callback, key, stage, completion_percentage, result) = finished;

        self.metrics
            .record_job_finished(&key.task_type, stage, elapsed_seconds);
        match &error {
            Some(error) if stage == JobStage::Failed => {
                warn!(job_id = %job_id, key = %key, error = %error, "Job failed");
            }
            _ => info!(job_id = %job_id, key = %key, stage = %stage, completion = completion_percentage, "Job finished"),
        }

        if stage == JobStage::Done {
            if let Some(result) = result {
                self.store(key, result);
            }
        }

        if let Some(callback) = callback {
            callback(JobEvent::Finished {
                job_id,
                stage,
                completion_percentage,
            });
        }
    }

    /// Hands a finished record to the persistence sink in the background.
    /// Only records that carry data for every stage they ran are cached.
    fn store(&self, key: JobKey, result: ProgressiveResult) {
        if result.is_cacheable() {
            self.cache.put(key, result.clone());
        } else {
            debug!(key = %key, errors = result.errors.len(), "Incomplete result not cached");
        }

        let persistence = self.persistence.clone();
        tokio::spawn(async move {
            match persistence.save(&result).await {
                Ok(_) => debug!(identifier = %result.identifier, sink = persistence.name(), "Result persisted"),
                Err(e) => warn!(
                    identifier = %result.identifier,
                    sink = persistence.name(),
                    error = %e,
                    "Failed to persist result"
                ),
            }
        });
    }

    fn evict_completed(&self) -> usize {
        let retention = self.config.completed_retention();
        let now = Instant::now();
        let mut state = self.lock_state();
        let before = state.jobs.len();
        state.jobs.retain(|_, entry| match entry.finished_at {
            Some(finished_at) => now.duration_since(finished_at) <= retention,
            None => true,
        });
        let evicted = before - state.jobs.len();
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted completed jobs");
        }
        evicted
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let period = std::time::Duration::from_secs(self.config.cleanup_interval_seconds.max(1));
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.evict_completed();
                    let expired = self.cache.clear_expired();
                    if expired > 0 {
                        debug!(expired = expired, "Cleared expired cache entries");
                    }
                }
            }
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.running.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_completion_per_mode() {
        assert_eq!(required_completion(CollectionMode::Basic), 33);
        assert_eq!(required_completion(CollectionMode::Detailed), 66);
        assert_eq!(required_completion(CollectionMode::Complete), 100);
    }
}
