use std::collections::BTreeMap;
use std::sync::Mutex;

use collector_core::models::{BatchSummary, JobStage, StrategyKind};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Counters {
    batches_started: u64,
    batches_finished: u64,
    jobs_submitted: u64,
    jobs_completed: u64,
    jobs_failed: u64,
    jobs_cancelled: u64,
    cache_hits: u64,
    cache_misses: u64,
    timed_jobs: u64,
    total_collection_time_seconds: f64,
    fallback_usage: BTreeMap<&'static str, u64>,
}

/// 跨批次的累计统计
#[derive(Debug)]
pub struct AggregateStatistics {
    started: Instant,
    counters: Mutex<Counters>,
}

/// Point-in-time copy of the aggregate counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub uptime_seconds: f64,
    pub batches_started: u64,
    pub batches_finished: u64,
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_collection_time_seconds: f64,
    pub average_collection_time_seconds: f64,
    /// Terminal jobs per second since startup
    pub throughput_per_second: f64,
    pub fallback_usage: BTreeMap<String, u64>,
}

impl AggregateStatistics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts an accepted batch and its jobs
    pub fn record_batch_started(&self, jobs: usize) {
        let mut counters = self.lock();
        counters.batches_started += 1;
        counters.jobs_submitted += jobs as u64;
    }

    /// Folds every item of a finished batch into the totals
    pub fn record_batch_finished(&self, summary: &BatchSummary) {
        let mut counters = self.lock();
        counters.batches_finished += 1;

        for item in &summary.items {
            match item.stage {
                JobStage::Done => counters.jobs_completed += 1,
                JobStage::Failed => counters.jobs_failed += 1,
                _ => counters.jobs_cancelled += 1,
            }

            let Some(result) = &item.result else {
                continue;
            };
            if result.from_cache {
                counters.cache_hits += 1;
                continue;
            }
            counters.cache_misses += 1;

            if item.stage.is_terminal() && result.collection_time_seconds > 0.0 {
                counters.timed_jobs += 1;
                counters.total_collection_time_seconds += result.collection_time_seconds;
            }
            for strategy in &result.data_sources_used {
                if *strategy != StrategyKind::Primary {
                    *counters.fallback_usage.entry(strategy.as_tag()).or_default() += 1;
                }
            }
        }
    }

    /// Copies the counters and derives averages and throughput
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let uptime_seconds = self.started.elapsed().as_secs_f64();
        let counters = self.lock();
        let terminal = counters.jobs_completed + counters.jobs_failed + counters.jobs_cancelled;

        StatisticsSnapshot {
            uptime_seconds,
            batches_started: counters.batches_started,
            batches_finished: counters.batches_finished,
            jobs_submitted: counters.jobs_submitted,
            jobs_completed: counters.jobs_completed,
            jobs_failed: counters.jobs_failed,
            jobs_cancelled: counters.jobs_cancelled,
            cache_hits: counters.cache_hits,
            cache_misses: counters.cache_misses,
            total_collection_time_seconds: counters.total_collection_time_seconds,
            average_collection_time_seconds: if counters.timed_jobs == 0 {
                0.0
            } else {
                counters.total_collection_time_seconds / counters.timed_jobs as f64
            },
            throughput_per_second: if uptime_seconds > 0.0 {
                terminal as f64 / uptime_seconds
            } else {
                0.0
            },
            fallback_usage: counters
                .fallback_usage
                .iter()
                .map(|(tag, count)| (tag.to_string(), *count))
                .collect(),
        }
    }
}

impl Default for AggregateStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use collector_core::models::{
        BatchId, BatchState, CollectionMode, ItemResult, ProgressiveResult,
    };
    use std::time::Duration;

    fn item(stage: JobStage, result: Option<ProgressiveResult>) -> ItemResult {
        ItemResult {
            identifier: "A".to_string(),
            job_id: None,
            success: stage == JobStage::Done,
            stage,
            reached_stage: None,
            completion_percentage: 0,
            retry_count: 0,
            error: None,
            result,
        }
    }

    fn collected(seconds: f64, sources: Vec<StrategyKind>, from_cache: bool) -> ProgressiveResult {
        let mut result = ProgressiveResult::new("basic-record", "A");
        result.collection_time_seconds = seconds;
        result.data_sources_used = sources;
        result.from_cache = from_cache;
        result.stage = JobStage::Done;
        result
    }

    fn summary(items: Vec<ItemResult>) -> BatchSummary {
        BatchSummary {
            batch_id: BatchId::new(),
            task_type: "basic-record".to_string(),
            mode: CollectionMode::Complete,
            state: BatchState::Completed,
            total: items.len(),
            successful: 0,
            failed: 0,
            cancelled: 0,
            total_time_seconds: 1.0,
            items,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_aggregates_items() {
        let stats = AggregateStatistics::new();
        stats.record_batch_started(4);
        stats.record_batch_finished(&summary(vec![
            item(JobStage::Done, Some(collected(2.0, vec![StrategyKind::Primary], false))),
            item(
                JobStage::Done,
                Some(collected(
                    4.0,
                    vec![StrategyKind::Primary, StrategyKind::Scraping],
                    false,
                )),
            ),
            item(JobStage::Done, Some(collected(9.0, vec![StrategyKind::Primary], true))),
            item(JobStage::Failed, None),
        ]));

        tokio::time::advance(Duration::from_secs(2)).await;
        let snapshot = stats.snapshot();

        assert_eq!(snapshot.batches_started, 1);
        assert_eq!(snapshot.batches_finished, 1);
        assert_eq!(snapshot.jobs_submitted, 4);
        assert_eq!(snapshot.jobs_completed, 3);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
        assert_eq!(snapshot.average_collection_time_seconds, 3.0);
        assert_eq!(snapshot.fallback_usage.get("page_scraping"), Some(&1));
        assert!(!snapshot.fallback_usage.contains_key("primary_api"));
        assert!((snapshot.throughput_per_second - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = AggregateStatistics::new().snapshot();
        assert_eq!(snapshot.jobs_completed, 0);
        assert_eq!(snapshot.average_collection_time_seconds, 0.0);
        assert!(snapshot.fallback_usage.is_empty());
    }
}
