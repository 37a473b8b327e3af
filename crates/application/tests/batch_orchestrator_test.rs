#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use collector_application::{BatchEvent, BatchOrchestrator};
    use collector_core::config::{BatchConfig, SchedulerConfig};
    use collector_core::models::{
        BatchOptions, BatchState, CollectionMode, JobKey, JobStage, ProgressiveResult,
    };
    use collector_core::traits::JobExecutor;
    use collector_core::CollectorError;
    use collector_dispatcher::JobScheduler;
    use collector_infrastructure::ResultCache;
    use collector_testing_utils::{
        connection_pool, fast_collector_config, permissive_rate_limiter, JobBuilder, Reply,
        ScriptedExecutor, ScriptedPrimarySource,
    };
    use collector_worker::{PrimaryStrategy, ProgressiveCollector};
    use serde_json::json;

    const TASK: &str = "basic-record";

    fn scheduler(max_concurrent_jobs: usize, executor: Arc<dyn JobExecutor>) -> JobScheduler {
        let scheduler = JobScheduler::new(
            SchedulerConfig {
                max_concurrent_jobs,
                dispatch_poll_interval_ms: 5,
                ..SchedulerConfig::default()
            },
            executor,
            Arc::new(ResultCache::new(Duration::from_secs(600))),
            permissive_rate_limiter(),
        );
        scheduler.start();
        scheduler
    }

    fn orchestrator(scheduler: JobScheduler) -> BatchOrchestrator {
        BatchOrchestrator::new(
            BatchConfig {
                completed_retention_seconds: 5,
                ..BatchConfig::default()
            },
            scheduler,
        )
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn options(total_timeout_ms: u64) -> BatchOptions {
        BatchOptions {
            total_timeout_ms,
            ..BatchOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_basic_mode_batch_reaches_basic_stage() {
        let primary = Arc::new(
            ScriptedPrimarySource::new()
                .on("records", Reply::data(json!({"owner": "Smith", "address": "1 Main St"}))),
        );
        let collector = ProgressiveCollector::new(
            fast_collector_config(),
            Arc::new(PrimaryStrategy::new(primary.clone(), connection_pool(4))),
            permissive_rate_limiter(),
        );
        let orchestrator = orchestrator(scheduler(3, Arc::new(collector)));

        let batch_id = orchestrator
            .execute_batch(ids(&["A", "B", "C"]), TASK, CollectionMode::Basic, options(10_000))
            .unwrap();
        let summary = orchestrator.wait_for(batch_id).await.unwrap();

        assert_eq!(summary.state, BatchState::Completed);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 0);
        for item in &summary.items {
            assert!(item.success);
            assert_eq!(item.stage, JobStage::Done);
            assert_eq!(item.reached_stage, Some(JobStage::Basic));
            assert_eq!(item.completion_percentage, 33);
            let result = item.result.as_ref().unwrap();
            assert_eq!(result.data["owner"], json!("Smith"));
        }
        // basic mode never touches the detail endpoints
        assert_eq!(primary.call_count("records/details"), 0);

        let status = orchestrator.get_status(batch_id).unwrap();
        assert_eq!(status.state, BatchState::Completed);
        assert_eq!(status.counts.done, 3);
        assert_eq!(status.progress_percentage, 33.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_counts_failures() {
        let executor = Arc::new(
            ScriptedExecutor::new(Duration::from_millis(20))
                .fail_identifier("B", CollectorError::Auth("bad key".to_string())),
        );
        let orchestrator = orchestrator(scheduler(3, executor));

        let batch_id = orchestrator
            .execute_batch(ids(&["A", "B", "C"]), TASK, CollectionMode::Complete, options(10_000))
            .unwrap();
        let summary = orchestrator.wait_for(batch_id).await.unwrap();

        assert_eq!(summary.state, BatchState::Completed);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert!((summary.success_rate() - 2.0 / 3.0).abs() < 1e-9);

        let failed = summary.items.iter().find(|i| i.identifier == "B").unwrap();
        assert!(!failed.success);
        assert_eq!(failed.stage, JobStage::Failed);
        assert!(failed.error.as_deref().unwrap().contains("bad key"));

        let stats = orchestrator.statistics();
        assert_eq!(stats.batches_finished, 1);
        assert_eq!(stats.jobs_submitted, 3);
        assert_eq!(stats.jobs_completed, 2);
        assert_eq!(stats.jobs_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_concurrency_windows_submission() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(50)));
        let orchestrator = orchestrator(scheduler(5, executor.clone()));

        let batch_id = orchestrator
            .execute_batch(
                ids(&["1", "2", "3", "4", "5", "6"]),
                TASK,
                CollectionMode::Basic,
                BatchOptions {
                    max_concurrency: Some(2),
                    ..options(10_000)
                },
            )
            .unwrap();
        let summary = orchestrator.wait_for(batch_id).await.unwrap();

        assert_eq!(summary.successful, 6);
        assert_eq!(executor.probe.peak(), 2);
        // results keep the request order
        let order: Vec<&str> = summary.items.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(order, vec!["1", "2", "3", "4", "5", "6"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_timeout_cancels_remaining_jobs() {
        let (executor, _gate) = ScriptedExecutor::gated();
        let scheduler = scheduler(1, Arc::new(executor));
        let orchestrator = orchestrator(scheduler.clone());

        let batch_id = orchestrator
            .execute_batch(ids(&["A", "B", "C"]), TASK, CollectionMode::Complete, options(200))
            .unwrap();
        let summary = orchestrator.wait_for(batch_id).await.unwrap();

        assert_eq!(summary.state, BatchState::TimedOut);
        assert_eq!(summary.successful, 0);
        assert_eq!(summary.cancelled, 3);
        assert!(summary.total_time_seconds >= 0.2);
        for item in &summary.items {
            assert_eq!(item.stage, JobStage::Cancelled);
            assert!(item.error.is_some());
        }

        // pending jobs are terminal without ever starting
        let pending = summary.items.iter().filter_map(|i| i.job_id).filter(|id| {
            scheduler
                .job(*id)
                .map(|job| job.started_at.is_none())
                .unwrap_or(false)
        });
        for job_id in pending {
            assert_eq!(scheduler.status(job_id).unwrap().stage, JobStage::Cancelled);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_batch() {
        let (executor, _gate) = ScriptedExecutor::gated();
        let orchestrator = orchestrator(scheduler(2, Arc::new(executor)));

        let batch_id = orchestrator
            .execute_batch(ids(&["A", "B", "C"]), TASK, CollectionMode::Complete, options(60_000))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let running = orchestrator.get_status(batch_id).unwrap();
        assert_eq!(running.state, BatchState::Running);
        assert_eq!(running.counts.running, 2);
        assert_eq!(running.counts.pending, 1);

        assert!(orchestrator.cancel_batch(batch_id));
        let summary = orchestrator.wait_for(batch_id).await.unwrap();
        assert_eq!(summary.state, BatchState::Cancelled);
        assert_eq!(summary.cancelled, 3);

        assert!(!orchestrator.cancel_batch(batch_id));
        assert!(!orchestrator.cancel_batch(collector_core::models::BatchId::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_items_count_as_successful() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(20)));
        let scheduler = scheduler(2, executor.clone());

        let mut cached = ProgressiveResult::new(TASK, "A");
        cached.advance(JobStage::Basic, 33);
        cached.seal(JobStage::Done, 0.5);
        scheduler.cache().put(JobKey::new(TASK, "A"), cached);

        let orchestrator = orchestrator(scheduler);
        let batch_id = orchestrator
            .execute_batch(ids(&["A", "B"]), TASK, CollectionMode::Basic, options(10_000))
            .unwrap();
        let summary = orchestrator.wait_for(batch_id).await.unwrap();

        assert_eq!(summary.successful, 2);
        let item = summary.items.iter().find(|i| i.identifier == "A").unwrap();
        assert!(item.result.as_ref().unwrap().from_cache);
        assert_eq!(executor.executed(), vec!["B".to_string()]);

        let stats = orchestrator.statistics();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_follows_job_already_in_flight() {
        let (executor, gate) = ScriptedExecutor::gated();
        let scheduler = scheduler(2, Arc::new(executor));
        let existing = scheduler
            .submit_one(JobBuilder::new("42").with_task_type(TASK).build())
            .unwrap();

        let orchestrator = orchestrator(scheduler);
        let batch_id = orchestrator
            .execute_batch(ids(&["42"]), TASK, CollectionMode::Complete, options(10_000))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.add_permits(1);

        let summary = orchestrator.wait_for(batch_id).await.unwrap();
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.items[0].job_id, Some(existing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_timeout_leaves_followed_job_running() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_secs(5)));
        let scheduler = scheduler(2, executor.clone());
        let orchestrator = orchestrator(scheduler.clone());

        let owner = orchestrator
            .execute_batch(ids(&["A"]), TASK, CollectionMode::Complete, options(60_000))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = orchestrator
            .execute_batch(ids(&["A"]), TASK, CollectionMode::Complete, options(1_000))
            .unwrap();

        let short = orchestrator.wait_for(follower).await.unwrap();
        assert_eq!(short.state, BatchState::TimedOut);
        assert_eq!(short.items[0].stage, JobStage::Cancelled);
        assert!(!short.items[0].success);

        let long = orchestrator.wait_for(owner).await.unwrap();
        assert_eq!(long.state, BatchState::Completed);
        assert_eq!(long.successful, 1);
        assert_eq!(long.items[0].stage, JobStage::Done);
        assert_eq!(long.items[0].job_id, short.items[0].job_id);
        assert_eq!(executor.executed(), vec!["A".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelling_follower_batch_keeps_owner_job() {
        let (executor, gate) = ScriptedExecutor::gated();
        let scheduler = scheduler(2, Arc::new(executor));
        let orchestrator = orchestrator(scheduler.clone());

        let owner = orchestrator
            .execute_batch(ids(&["A"]), TASK, CollectionMode::Complete, options(60_000))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = orchestrator
            .execute_batch(ids(&["A"]), TASK, CollectionMode::Complete, options(60_000))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(orchestrator.cancel_batch(follower));
        let cancelled = orchestrator.wait_for(follower).await.unwrap();
        assert_eq!(cancelled.state, BatchState::Cancelled);
        assert_eq!(cancelled.cancelled, 1);

        let job_id = cancelled.items[0].job_id.unwrap();
        assert!(!scheduler.status(job_id).unwrap().stage.is_terminal());

        gate.add_permits(1);
        let completed = orchestrator.wait_for(owner).await.unwrap();
        assert_eq!(completed.state, BatchState::Completed);
        assert_eq!(completed.successful, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_basic_stage_is_not_served_from_cache() {
        let primary = Arc::new(
            ScriptedPrimarySource::new()
                .on("records", Reply::data(json!({"owner": "Smith"})))
                .once("records", Reply::error(CollectorError::NotFound("A".to_string()))),
        );
        let collector = ProgressiveCollector::new(
            fast_collector_config(),
            Arc::new(PrimaryStrategy::new(primary.clone(), connection_pool(4))),
            permissive_rate_limiter(),
        );
        let orchestrator = orchestrator(scheduler(2, Arc::new(collector)));

        let first = orchestrator
            .execute_batch(ids(&["A"]), TASK, CollectionMode::Basic, options(10_000))
            .unwrap();
        let first = orchestrator.wait_for(first).await.unwrap();
        let result = first.items[0].result.as_ref().unwrap();
        assert!(!result.basic_data_available);
        assert!(result.data.is_empty());

        let second = orchestrator
            .execute_batch(ids(&["A"]), TASK, CollectionMode::Basic, options(10_000))
            .unwrap();
        let second = orchestrator.wait_for(second).await.unwrap();
        let result = second.items[0].result.as_ref().unwrap();
        assert!(!result.from_cache);
        assert_eq!(result.data["owner"], json!("Smith"));
        assert_eq!(primary.call_count("records"), 2);

        // a complete record is cached from now on
        let third = orchestrator
            .execute_batch(ids(&["A"]), TASK, CollectionMode::Basic, options(10_000))
            .unwrap();
        let third = orchestrator.wait_for(third).await.unwrap();
        assert!(third.items[0].result.as_ref().unwrap().from_cache);
        assert_eq!(primary.call_count("records"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_request_timeout_cancels_slow_job() {
        let (executor, _gate) = ScriptedExecutor::gated();
        let orchestrator = orchestrator(scheduler(2, Arc::new(executor)));

        let batch_id = orchestrator
            .execute_batch(
                ids(&["slow"]),
                TASK,
                CollectionMode::Complete,
                BatchOptions {
                    per_request_timeout_ms: Some(100),
                    ..options(60_000)
                },
            )
            .unwrap();
        let summary = orchestrator.wait_for(batch_id).await.unwrap();

        assert_eq!(summary.state, BatchState::Completed);
        assert_eq!(summary.cancelled, 1);
        assert!(summary.total_time_seconds < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_published_in_order() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(20)));
        let orchestrator = orchestrator(scheduler(2, executor));
        let mut events = orchestrator.subscribe();

        let batch_id = orchestrator
            .execute_batch(ids(&["A", "B"]), TASK, CollectionMode::Detailed, options(10_000))
            .unwrap();
        orchestrator.wait_for(batch_id).await.unwrap();

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.batch_id(), batch_id);
            received.push(event);
        }
        assert!(matches!(received.first(), Some(BatchEvent::Started { total: 2, .. })));
        assert!(matches!(
            received.last(),
            Some(BatchEvent::Finished {
                state: BatchState::Completed,
                successful: 2,
                ..
            })
        ));

        let progress: Vec<f64> = received
            .iter()
            .filter_map(|event| match event {
                BatchEvent::Progress {
                    progress_percentage,
                    ..
                } => Some(*progress_percentage),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last().copied(), Some(66.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_batches_are_evicted() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(10)));
        let orchestrator = orchestrator(scheduler(2, executor));

        let batch_id = orchestrator
            .execute_batch(ids(&["A"]), TASK, CollectionMode::Basic, options(10_000))
            .unwrap();
        orchestrator.wait_for(batch_id).await.unwrap();
        assert_eq!(orchestrator.evict_completed(), 0);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(orchestrator.evict_completed(), 1);
        assert!(orchestrator.get_results(batch_id).is_none());
        assert!(orchestrator.get_status(batch_id).is_none());
        assert!(orchestrator.wait_for(batch_id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_new_batches() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(10)));
        let orchestrator = orchestrator(scheduler(2, executor));

        orchestrator.shutdown();
        let result = orchestrator.execute_batch(ids(&["A"]), TASK, CollectionMode::Basic, options(1_000));
        assert!(matches!(result, Err(CollectorError::SchedulerShutdown)));
    }
}
