//! 渐进式采集器
//!
//! 对单个标识符依次执行 Basic → Detailed → Extended 三个阶段：
//! - Basic：主数据源单次调用，失败仅记录，除非是不可恢复错误
//! - Detailed：主数据源补充属性，不足时只记录缺口，不升级策略
//! - Extended：并发子请求，成功数不足或关键路径缺失时按顺序升级到备用策略
//!
//! 每个阶段的数据都以合并方式累积到同一个 [`ProgressiveResult`]。

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use collector_core::config::CollectorConfig;
use collector_core::models::{JobStage, ProgressiveResult, RecordData, StrategyKind};
use collector_core::traits::{JobContext, JobEvent, JobExecutor, JobOutcome};
use collector_core::{CollectorError, CollectorResult};
use collector_infrastructure::{AdaptiveRateLimiter, MetricsCollector, RetryPolicy};
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::strategies::{CollectionRequest, DataStrategy};

const PIPELINE: [JobStage; 3] = [JobStage::Basic, JobStage::Detailed, JobStage::Extended];

/// Completion reached once a stage has run
pub fn stage_completion(stage: JobStage) -> u8 {
    match stage {
        JobStage::Basic => 33,
        JobStage::Detailed => 66,
        JobStage::Extended | JobStage::Done => 100,
        _ => 0,
    }
}

/// Rate limiter bucket used by a strategy
pub fn limiter_target(kind: StrategyKind) -> &'static str {
    match kind {
        StrategyKind::Primary => "primary",
        StrategyKind::Automation => "automation",
        StrategyKind::Scraping => "scraping",
    }
}

/// Runs the three-stage pipeline for one job.
///
/// Each stage has its own time budget and works on a copy of the result that
/// is committed only when the stage ends without cancellation. Strategy calls
/// share one retry budget per job and report their outcome to the rate
/// limiter. Only the Extended stage escalates to the fallbacks.
pub struct ProgressiveCollector {
    config: CollectorConfig,
    primary: Arc<dyn DataStrategy>,
    /// Escalation order of the extended stage
    fallbacks: Vec<Arc<dyn DataStrategy>>,
    rate_limiter: AdaptiveRateLimiter,
    retry: RetryPolicy,
    metrics: MetricsCollector,
}

impl ProgressiveCollector {
    /// Collector without fallbacks; add them with [`with_fallback`](Self::with_fallback)
    pub fn new(
        config: CollectorConfig,
        primary: Arc<dyn DataStrategy>,
        rate_limiter: AdaptiveRateLimiter,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry.clone(), config.max_retries);
        Self {
            config,
            primary,
            fallbacks: Vec::new(),
            rate_limiter,
            retry,
            metrics: MetricsCollector::new(),
        }
    }

    /// Appends a fallback; fallbacks are tried in the order they were added
    pub fn with_fallback(mut self, strategy: Arc<dyn DataStrategy>) -> Self {
        self.fallbacks.push(strategy);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn fallback_order(&self) -> Vec<StrategyKind> {
        self.fallbacks.iter().map(|s| s.kind()).collect()
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    async fn run_stage(
        &self,
        stage: JobStage,
        ctx: &JobContext,
        result: &mut ProgressiveResult,
        retries: &AtomicU32,
    ) -> CollectorResult<()> {
        match stage {
            JobStage::Basic => self.run_basic(ctx, result, retries).await,
            JobStage::Detailed => self.run_detailed(ctx, result, retries).await,
            JobStage::Extended => self.run_extended(ctx, result, retries).await,
            other => Err(CollectorError::Internal(format!(
                "{other} is not a pipeline stage"
            ))),
        }
    }

    async fn run_basic(
        &self,
        ctx: &JobContext,
        result: &mut ProgressiveResult,
        retries: &AtomicU32,
    ) -> CollectorResult<()> {
        let request = CollectionRequest::path(self.config.plan.basic_path.clone());
        let budget = self.config.basic_timeout();
        let outcome = within(
            budget,
            "basic stage",
            self.call_with_retry(self.primary.as_ref(), ctx, &request, retries),
        )
        .await;

        match outcome {
            Ok(data) => {
                result.basic_data_available = !data.is_empty();
                result.merge(data, StrategyKind::Primary, ctx.job.force_fresh);
                Ok(())
            }
            Err(e) if e.is_fatal() || matches!(e, CollectorError::Cancelled) => Err(e),
            Err(e) => {
                warn!(
                    job_id = %ctx.job.id,
                    identifier = %ctx.job.identifier(),
                    error = %e,
                    "Basic stage failed"
                );
                result.record_error(JobStage::Basic, Some(StrategyKind::Primary), &e);
                Ok(())
            }
        }
    }

    async fn run_detailed(
        &self,
        ctx: &JobContext,
        result: &mut ProgressiveResult,
        retries: &AtomicU32,
    ) -> CollectorResult<()> {
        let request = CollectionRequest::path(self.config.plan.detailed_path.clone());
        let budget = self.config.detailed_timeout();
        let outcome = within(
            budget,
            "detailed stage",
            self.call_with_retry(self.primary.as_ref(), ctx, &request, retries),
        )
        .await;

        match outcome {
            Ok(data) if !data.is_empty() => {
                result.merge(data, StrategyKind::Primary, ctx.job.force_fresh);
                result.detailed_data_available = true;
            }
            Ok(_) => {
                // 不升级，只记录缺口
                let shortfall = CollectorError::NotFound(format!(
                    "no detailed attributes for {}",
                    ctx.job.identifier()
                ));
                result.record_error(JobStage::Detailed, Some(StrategyKind::Primary), &shortfall);
            }
            Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
            Err(e) => {
                warn!(
                    job_id = %ctx.job.id,
                    identifier = %ctx.job.identifier(),
                    error = %e,
                    "Detailed stage failed"
                );
                result.record_error(JobStage::Detailed, Some(StrategyKind::Primary), &e);
            }
        }
        Ok(())
    }

    async fn run_extended(
        &self,
        ctx: &JobContext,
        result: &mut ProgressiveResult,
        retries: &AtomicU32,
    ) -> CollectorResult<()> {
        let plan = &self.config.plan;
        let overwrite = ctx.job.force_fresh;
        let sub_timeout = self.config.sub_request_timeout();
        let deadline = Instant::now() + self.config.extended_timeout();

        let mut calls = stream::iter(plan.extended_paths.iter().cloned())
            .map(move |path: String| {
                let request = CollectionRequest::path(path.clone());
                async move {
                    let outcome = within(
                        sub_timeout,
                        format!("extended sub-request {path}"),
                        self.call_with_retry(self.primary.as_ref(), ctx, &request, retries),
                    )
                    .await;
                    (path, outcome)
                }
            })
            .buffer_unordered(self.config.max_concurrent_per_job.max(1));

        let mut succeeded: Vec<String> = Vec::new();
        let mut cancelled = false;
        loop {
            match tokio::time::timeout_at(deadline, calls.next()).await {
                Ok(Some((path, Ok(data)))) => {
                    if !data.is_empty() {
                        succeeded.push(path);
                    }
                    result.merge(data, StrategyKind::Primary, overwrite);
                }
                Ok(Some((_, Err(CollectorError::Cancelled)))) => cancelled = true,
                Ok(Some((path, Err(e)))) => {
                    debug!(job_id = %ctx.job.id, path = %path, error = %e, "Extended sub-request failed");
                    result.record_error(JobStage::Extended, Some(StrategyKind::Primary), &e);
                }
                Ok(None) => break,
                Err(_) => {
                    let e = CollectorError::timeout("extended sub-requests", self.config.extended_timeout());
                    result.record_error(JobStage::Extended, Some(StrategyKind::Primary), &e);
                    break;
                }
            }
        }
        drop(calls);
        if cancelled {
            return Err(CollectorError::Cancelled);
        }

        let critical_missing = plan
            .critical_extended_paths
            .iter()
            .any(|critical| !succeeded.contains(critical));
        if succeeded.len() >= plan.min_extended_successes && !critical_missing {
            result.extended_data_available = true;
            return Ok(());
        }

        let wanted: Vec<String> = plan
            .extended_fields
            .iter()
            .filter(|field| overwrite || !result.has_field(field))
            .cloned()
            .collect();
        if wanted.is_empty() {
            result.extended_data_available = true;
            return Ok(());
        }

        info!(
            job_id = %ctx.job.id,
            identifier = %ctx.job.identifier(),
            succeeded = succeeded.len(),
            missing = ?wanted,
            "Escalating extended stage to fallback strategies"
        );

        let request = CollectionRequest::fields(wanted.clone());
        let budget = self.config.fallback_timeout();
        for fallback in &self.fallbacks {
            if ctx.is_cancelled() {
                return Err(CollectorError::Cancelled);
            }
            let kind = fallback.kind();
            let outcome = within(
                budget,
                format!("{kind} fallback"),
                self.call_with_retry(fallback.as_ref(), ctx, &request, retries),
            )
            .await;

            match outcome {
                Ok(data) => {
                    let filled = data
                        .iter()
                        .filter(|(field, value)| wanted.contains(field) && !value.is_null())
                        .count();
                    result.merge(data, kind, overwrite);
                    if filled > 0 {
                        self.metrics.record_fallback_used(kind);
                        result.extended_data_available = true;
                        info!(
                            job_id = %ctx.job.id,
                            strategy = %kind,
                            fields = filled,
                            "Fallback strategy filled extended fields"
                        );
                        break;
                    }
                    let empty = CollectorError::Parse(format!(
                        "{kind} returned none of the requested fields"
                    ));
                    result.record_error(JobStage::Extended, Some(kind), &empty);
                }
                Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
                Err(e) => {
                    warn!(job_id = %ctx.job.id, strategy = %kind, error = %e, "Fallback strategy failed");
                    result.record_error(JobStage::Extended, Some(kind), &e);
                }
            }
        }

        result.record_missing(wanted);
        Ok(())
    }

    /// One strategy call with rate limiting, limiter feedback and the job-wide retry budget
    async fn call_with_retry(
        &self,
        strategy: &dyn DataStrategy,
        ctx: &JobContext,
        request: &CollectionRequest,
        retries: &AtomicU32,
    ) -> CollectorResult<RecordData> {
        let target = limiter_target(strategy.kind());
        let identifier = ctx.job.identifier();
        let token_timeout = self.rate_limiter.config().acquire_timeout();

        loop {
            if ctx.is_cancelled() {
                return Err(CollectorError::Cancelled);
            }

            let admitted = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(CollectorError::Cancelled),
                admitted = self.rate_limiter.acquire(target, token_timeout) => admitted,
            };

            let outcome = if admitted {
                let outcome = strategy.collect(identifier, request, &ctx.cancel).await;
                self.feedback(target, &outcome).await;
                outcome
            } else {
                Err(CollectorError::RateLimited(format!(
                    "no {target} token within {}ms",
                    token_timeout.as_millis()
                )))
            };

            let error = match outcome {
                Ok(data) => return Ok(data),
                Err(e) => e,
            };

            if !self.retry.should_retry(&error, retries.load(Ordering::SeqCst)) {
                return Err(error);
            }
            let max = self.retry.max_retries();
            let Ok(attempt) =
                retries.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            else {
                return Err(error);
            };

            self.metrics.record_retry(identifier, attempt + 1);
            let delay = self.retry.delay_for(attempt);
            debug!(
                job_id = %ctx.job.id,
                strategy = %strategy.kind(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Backing off before retry"
            );
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(CollectorError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn feedback(&self, target: &str, outcome: &CollectorResult<RecordData>) {
        match outcome {
            Ok(_) | Err(CollectorError::NotFound(_)) | Err(CollectorError::Parse(_)) => {
                self.rate_limiter.record_success(target).await
            }
            Err(CollectorError::RateLimited(_)) => self.rate_limiter.record_rate_limited(target).await,
            Err(CollectorError::Connectivity(_))
            | Err(CollectorError::Timeout(_))
            | Err(CollectorError::ServerError { .. }) => self.rate_limiter.record_error(target).await,
            Err(_) => {}
        }
    }
}

async fn within<T, F>(budget: Duration, what: impl std::fmt::Display, fut: F) -> CollectorResult<T>
where
    F: Future<Output = CollectorResult<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(CollectorError::timeout(what, budget)),
    }
}

#[async_trait]
impl JobExecutor for ProgressiveCollector {
    async fn execute(&self, ctx: JobContext) -> JobOutcome {
        let started = Instant::now();
        let job = &ctx.job;
        let mut result = ProgressiveResult::new(job.task_type(), job.identifier());
        let retries = AtomicU32::new(0);

        if let Err(e) = job.key.validate() {
            warn!(job_id = %job.id, key = %job.key, error = %e, "Rejecting invalid identifier");
            result.record_error(JobStage::Basic, None, &e);
            result.seal(JobStage::Failed, started.elapsed().as_secs_f64());
            return JobOutcome::failed(Some(result), 0, e);
        }

        for stage in PIPELINE {
            if !job.mode.includes(stage) {
                break;
            }
            if ctx.is_cancelled() {
                info!(job_id = %job.id, next_stage = %stage, "Job cancelled between stages");
                result.seal(JobStage::Cancelled, started.elapsed().as_secs_f64());
                return JobOutcome::cancelled(Some(result), retries.load(Ordering::SeqCst));
            }

            ctx.report(JobEvent::StageStarted {
                job_id: job.id,
                stage,
            });
            // 阶段在副本上执行，只有正常结束才提交，取消不会留下半个阶段的数据
            let mut staged = result.clone();
            let stage_started = Instant::now();
            let outcome = self.run_stage(stage, &ctx, &mut staged, &retries).await;
            self.metrics
                .record_stage_duration(stage, stage_started.elapsed().as_secs_f64());

            match outcome {
                Ok(()) => result = staged,
                Err(CollectorError::Cancelled) => {
                    info!(job_id = %job.id, stage = %stage, "Job cancelled during stage");
                    result.seal(JobStage::Cancelled, started.elapsed().as_secs_f64());
                    return JobOutcome::cancelled(Some(result), retries.load(Ordering::SeqCst));
                }
                Err(e) => {
                    warn!(job_id = %job.id, stage = %stage, error = %e, "Job failed");
                    result.record_error(stage, Some(StrategyKind::Primary), &e);
                    result.seal(JobStage::Failed, started.elapsed().as_secs_f64());
                    return JobOutcome::failed(Some(result), retries.load(Ordering::SeqCst), e);
                }
            }

            result.advance(stage, stage_completion(stage));
            ctx.report(JobEvent::StageCompleted {
                job_id: job.id,
                stage,
                completion_percentage: result.completion_percentage,
                partial: result.clone(),
            });
            debug!(
                job_id = %job.id,
                stage = %stage,
                completion = result.completion_percentage,
                fields = result.data.len(),
                "Stage completed"
            );
        }

        result.seal(JobStage::Done, started.elapsed().as_secs_f64());
        JobOutcome::done(result, retries.load(Ordering::SeqCst))
    }

    fn name(&self) -> &str {
        "progressive_collector"
    }
}
