use std::sync::{Arc, Mutex};
use std::time::Duration;

use collector_core::models::{CollectionMode, JobStage, StrategyKind};
use collector_core::traits::{JobContext, JobEvent, JobExecutor};
use collector_core::{CollectorError, ErrorKind};
use collector_infrastructure::{BrowserPool, ConnectionPool};
use async_trait::async_trait;
use collector_core::models::RecordData;
use collector_core::CollectorResult;
use collector_testing_utils::{
    browser_pool, connection_pool, fast_collector_config, permissive_rate_limiter, to_record,
    JobBuilder, Reply, ScriptedAutomationDriver, ScriptedPrimarySource, ScriptedScrapeSource,
};
use collector_worker::{
    AutomationStrategy, CollectionRequest, DataStrategy, PrimaryStrategy, ProgressiveCollector,
    ScrapingStrategy,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct Harness {
    primary: Arc<ScriptedPrimarySource>,
    driver: Arc<ScriptedAutomationDriver>,
    scrape: Arc<ScriptedScrapeSource>,
    connections: ConnectionPool,
    browsers: BrowserPool,
    collector: Arc<ProgressiveCollector>,
}

fn harness(
    primary: ScriptedPrimarySource,
    driver: ScriptedAutomationDriver,
    scrape: ScriptedScrapeSource,
) -> Harness {
    let primary = Arc::new(primary);
    let driver = Arc::new(driver);
    let scrape = Arc::new(scrape);
    let connections = connection_pool(4);
    let browsers = browser_pool(driver.clone(), 1);

    let collector = ProgressiveCollector::new(
        fast_collector_config(),
        Arc::new(PrimaryStrategy::new(primary.clone(), connections.clone())),
        permissive_rate_limiter(),
    )
    .with_fallback(Arc::new(AutomationStrategy::new(
        browsers.clone(),
        "http://pages.test/records/{identifier}",
    )))
    .with_fallback(Arc::new(ScrapingStrategy::new(
        scrape.clone(),
        connections.clone(),
    )));

    Harness {
        primary,
        driver,
        scrape,
        connections,
        browsers,
        collector: Arc::new(collector),
    }
}

fn full_primary() -> ScriptedPrimarySource {
    ScriptedPrimarySource::new()
        .on("records", Reply::data(json!({"owner": "Smith", "address": "1 Main St"})))
        .on("records/details", Reply::data(json!({"zoning": "R1", "acreage": 0.25})))
        .on("tax-history", Reply::data(json!({"tax_history": [[2023, 1200]]})))
        .on("sale-history", Reply::data(json!({"sale_history": [[2019, 250000]]})))
        .on("permits", Reply::data(json!({"permits": ["P-1"]})))
}

fn context(job: collector_core::models::CollectionJob) -> JobContext {
    JobContext::new(job, CancellationToken::new())
}

#[tokio::test(start_paused = true)]
async fn test_complete_pipeline_from_primary_only() {
    let h = harness(
        full_primary(),
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );

    let outcome = h.collector.execute(context(JobBuilder::new("42").build())).await;

    assert_eq!(outcome.stage, JobStage::Done);
    let result = outcome.result.unwrap();
    assert_eq!(result.stage, JobStage::Done);
    assert_eq!(result.completion_percentage, 100);
    assert!(result.basic_data_available);
    assert!(result.detailed_data_available);
    assert!(result.extended_data_available);
    assert_eq!(result.data_sources_used, vec![StrategyKind::Primary]);
    assert_eq!(result.data["zoning"], json!("R1"));
    assert!(result.errors.is_empty());
    assert_eq!(h.driver.extract_calls(), 0);
    assert!(h.scrape.fetched().is_empty());
    assert_eq!(h.connections.stats().active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_basic_mode_stops_after_first_stage() {
    let h = harness(
        full_primary(),
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );
    let job = JobBuilder::new("42").with_mode(CollectionMode::Basic).build();

    let outcome = h.collector.execute(context(job)).await;

    let result = outcome.result.unwrap();
    assert_eq!(outcome.stage, JobStage::Done);
    assert_eq!(result.completion_percentage, 33);
    assert_eq!(result.last_completed_stage, Some(JobStage::Basic));
    assert_eq!(h.primary.call_count("records"), 1);
    assert_eq!(h.primary.call_count("records/details"), 0);
    assert_eq!(h.primary.call_count("tax-history"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_escalates_to_scraping_when_automation_times_out() {
    let primary = ScriptedPrimarySource::new()
        .on("records", Reply::data(json!({"owner": "Smith"})))
        .on("records/details", Reply::data(json!({"zoning": "R1"})))
        .on(
            "tax-history",
            Reply::error(CollectorError::ServerError {
                status: 503,
                message: "busy".into(),
            }),
        )
        .on("sale-history", Reply::data(json!({"sale_history": [[2019, 250000]]})));
    let driver = ScriptedAutomationDriver::new().on_extract(
        Reply::data(json!({"tax_history": [[2023, 1]]})).after(Duration::from_secs(5)),
    );
    let scrape = ScriptedScrapeSource::new().on_page_for(
        "X",
        Reply::data(json!({"tax_history": [[2023, 1200]], "sale_history": [[1999, 1]]})),
    );
    let h = harness(primary, driver, scrape);

    let outcome = h.collector.execute(context(JobBuilder::new("X").build())).await;

    assert_eq!(outcome.stage, JobStage::Done);
    let result = outcome.result.unwrap();
    assert!(result.extended_data_available);
    assert!(result.data_sources_used.contains(&StrategyKind::Scraping));
    assert!(result.sources_tags().contains(&"page_scraping"));
    assert_eq!(result.field_sources["tax_history"], StrategyKind::Scraping);
    // populated by the primary source, never overwritten by the fallback
    assert_eq!(result.data["sale_history"], json!([[2019, 250000]]));
    assert_eq!(result.field_sources["sale_history"], StrategyKind::Primary);
    assert!(result.errors.iter().any(|e| {
        e.stage == JobStage::Extended
            && e.strategy == Some(StrategyKind::Automation)
            && e.kind == ErrorKind::Timeout
    }));
    assert!(result.missing_fields.is_empty());
    assert_eq!(h.scrape.fetched(), vec!["http://pages.test/records/X".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_automation_fill_stops_escalation() {
    let primary = ScriptedPrimarySource::new()
        .on("records", Reply::data(json!({"owner": "Smith"})))
        .on("records/details", Reply::data(json!({"zoning": "R1"})));
    let driver = ScriptedAutomationDriver::new().on_extract(Reply::data(
        json!({"tax_history": ["2023: 1200"], "sale_history": ["2019: 250000"]}),
    ));
    let h = harness(primary, driver, ScriptedScrapeSource::new());

    let outcome = h.collector.execute(context(JobBuilder::new("7").build())).await;

    let result = outcome.result.unwrap();
    assert!(result.extended_data_available);
    assert_eq!(
        result.data_sources_used,
        vec![StrategyKind::Primary, StrategyKind::Automation]
    );
    assert!(h.scrape.fetched().is_empty());
    assert_eq!(h.driver.extract_calls(), 1);
    assert_eq!(h.browsers.stats().active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_all_strategies_failing_degrades_gracefully() {
    let primary = ScriptedPrimarySource::new()
        .on("records", Reply::data(json!({"owner": "Smith"})))
        .on("records/details", Reply::data(json!({"zoning": "R1"})))
        .on("tax-history", Reply::error(CollectorError::Connectivity("reset".into())))
        .on("sale-history", Reply::error(CollectorError::Connectivity("reset".into())))
        .on("permits", Reply::error(CollectorError::Connectivity("reset".into())));
    let h = harness(
        primary,
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );

    let outcome = h.collector.execute(context(JobBuilder::new("9").build())).await;

    assert_eq!(outcome.stage, JobStage::Done);
    // the retry budget is shared by every call of the job
    assert_eq!(outcome.retry_count, 2);
    let result = outcome.result.unwrap();
    assert_eq!(result.completion_percentage, 100);
    assert!(result.basic_data_available);
    assert!(!result.extended_data_available);
    assert!(result.missing_fields.contains(&"tax_history".to_string()));
    assert!(result.missing_fields.contains(&"sale_history".to_string()));
    assert!(result
        .errors
        .iter()
        .any(|e| e.strategy == Some(StrategyKind::Scraping)));
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_in_basic_fails_job() {
    let primary = ScriptedPrimarySource::new()
        .on("records", Reply::error(CollectorError::Auth("bad key".into())))
        .on("records/details", Reply::data(json!({"zoning": "R1"})));
    let h = harness(
        primary,
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );

    let outcome = h.collector.execute(context(JobBuilder::new("42").build())).await;

    assert_eq!(outcome.stage, JobStage::Failed);
    assert!(matches!(outcome.error, Some(CollectorError::Auth(_))));
    assert_eq!(outcome.retry_count, 0);
    let result = outcome.result.unwrap();
    assert_eq!(result.stage, JobStage::Failed);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(h.primary.call_count("records/details"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_identifier_never_reaches_sources() {
    let h = harness(
        full_primary(),
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );

    let outcome = h.collector.execute(context(JobBuilder::new("  ").build())).await;

    assert_eq!(outcome.stage, JobStage::Failed);
    assert!(matches!(
        outcome.error,
        Some(CollectorError::InvalidIdentifier(_))
    ));
    assert!(h.primary.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recoverable_basic_failure_continues() {
    let primary = full_primary().on("records", Reply::error(CollectorError::NotFound("42".into())));
    let h = harness(
        primary,
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );

    let outcome = h.collector.execute(context(JobBuilder::new("42").build())).await;

    assert_eq!(outcome.stage, JobStage::Done);
    let result = outcome.result.unwrap();
    assert!(!result.basic_data_available);
    assert!(result.detailed_data_available);
    assert_eq!(result.completion_percentage, 100);
    assert_eq!(result.errors[0].stage, JobStage::Basic);
    assert_eq!(result.errors[0].kind, ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_detailed_shortfall_is_recorded_without_escalation() {
    let primary = full_primary().on("records/details", Reply::data(json!({})));
    let h = harness(
        primary,
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );

    let outcome = h.collector.execute(context(JobBuilder::new("42").build())).await;

    let result = outcome.result.unwrap();
    assert!(!result.detailed_data_available);
    assert!(result
        .errors
        .iter()
        .any(|e| e.stage == JobStage::Detailed && e.kind == ErrorKind::NotFound));
    assert_eq!(h.driver.extract_calls(), 0);
    assert!(result.extended_data_available);
}

#[tokio::test(start_paused = true)]
async fn test_force_fresh_overwrites_populated_fields() {
    let primary = full_primary()
        .on("records/details", Reply::data(json!({"owner": "Jones", "zoning": "R1"})));

    let h = harness(
        primary,
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );
    let kept = h.collector.execute(context(JobBuilder::new("1").build())).await;
    assert_eq!(kept.result.unwrap().data["owner"], json!("Smith"));

    let fresh = h
        .collector
        .execute(context(JobBuilder::new("1").force_fresh().build()))
        .await;
    assert_eq!(fresh.result.unwrap().data["owner"], json!("Jones"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_detailed_skips_extended() {
    let primary = full_primary().on(
        "records/details",
        Reply::data(json!({"zoning": "R1"})).after(Duration::from_millis(300)),
    );
    let h = harness(
        primary,
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );

    let cancel = CancellationToken::new();
    let ctx = JobContext::new(JobBuilder::new("42").build(), cancel.clone());
    let collector = h.collector.clone();
    let handle = tokio::spawn(async move { collector.execute(ctx).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.connections.stats().active, 1);
    cancel.cancel();

    let outcome = handle.await.unwrap();
    assert_eq!(outcome.stage, JobStage::Cancelled);
    let result = outcome.result.unwrap();
    assert_eq!(result.stage, JobStage::Cancelled);
    // the in-flight stage finished and kept its data
    assert_eq!(result.data["zoning"], json!("R1"));
    assert_eq!(result.completion_percentage, 66);
    assert_eq!(h.primary.call_count("tax-history"), 0);
    assert_eq!(h.connections.stats().active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_progress_events_follow_stage_order() {
    let h = harness(
        full_primary(),
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let ctx = context(JobBuilder::new("42").build()).with_progress(Arc::new(move |event| {
        sink.lock().unwrap().push(event);
    }));

    h.collector.execute(ctx).await;

    let events = events.lock().unwrap();
    let completed: Vec<(JobStage, u8)> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::StageCompleted {
                stage,
                completion_percentage,
                ..
            } => Some((*stage, *completion_percentage)),
            _ => None,
        })
        .collect();
    assert_eq!(
        completed,
        vec![
            (JobStage::Basic, 33),
            (JobStage::Detailed, 66),
            (JobStage::Extended, 100)
        ]
    );
    assert_eq!(events.len(), 6);
    assert!(matches!(
        events[0],
        JobEvent::StageStarted {
            stage: JobStage::Basic,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_sub_requests_respect_per_job_concurrency() {
    let slow = |v| Reply::data(v).after(Duration::from_millis(100));
    let primary = ScriptedPrimarySource::new()
        .on("records", Reply::data(json!({"owner": "Smith"})))
        .on("records/details", Reply::data(json!({"zoning": "R1"})))
        .on("tax-history", slow(json!({"tax_history": [1]})))
        .on("sale-history", slow(json!({"sale_history": [1]})))
        .on("permits", slow(json!({"permits": [1]})));
    let h = harness(
        primary,
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );

    h.collector.execute(context(JobBuilder::new("42").build())).await;

    assert_eq!(h.primary.probe.peak(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_extended_discards_partial_stage() {
    let primary = full_primary()
        .once("sale-history", Reply::error(CollectorError::Connectivity("reset".into())))
        .on(
            "permits",
            Reply::data(json!({"permits": ["P-1"]})).after(Duration::from_millis(100)),
        );
    let h = harness(
        primary,
        ScriptedAutomationDriver::new(),
        ScriptedScrapeSource::new(),
    );

    let cancel = CancellationToken::new();
    let ctx = JobContext::new(JobBuilder::new("42").build(), cancel.clone());
    let collector = h.collector.clone();
    let handle = tokio::spawn(async move { collector.execute(ctx).await });

    // tax-history has answered, sale-history is backing off, permits is in flight
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(h.primary.call_count("tax-history"), 1);
    cancel.cancel();

    let outcome = handle.await.unwrap();
    assert_eq!(outcome.stage, JobStage::Cancelled);
    let result = outcome.result.unwrap();
    assert_eq!(result.completion_percentage, 66);
    assert_eq!(result.last_completed_stage, Some(JobStage::Detailed));
    assert_eq!(result.data["zoning"], json!("R1"));
    assert!(!result.has_field("tax_history"));
    assert!(!result.has_field("permits"));
    assert!(result.errors.iter().all(|e| e.stage != JobStage::Extended));
    assert!(!result.extended_data_available);
}

/// Fallback answering with fields nobody asked for
struct OffTargetStrategy;

#[async_trait]
impl DataStrategy for OffTargetStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Automation
    }

    async fn collect(
        &self,
        _identifier: &str,
        _request: &CollectionRequest,
        _cancel: &CancellationToken,
    ) -> CollectorResult<RecordData> {
        Ok(to_record(json!({"listing_photo": "front.jpg"})))
    }
}

#[tokio::test(start_paused = true)]
async fn test_fallback_without_wanted_fields_keeps_escalating() {
    let primary = Arc::new(
        ScriptedPrimarySource::new()
            .on("records", Reply::data(json!({"owner": "Smith"})))
            .on("records/details", Reply::data(json!({"zoning": "R1"}))),
    );
    let scrape = Arc::new(ScriptedScrapeSource::new().on_page(Reply::data(
        json!({"tax_history": [[2023, 1200]], "sale_history": [[2019, 250000]]}),
    )));
    let connections = connection_pool(4);
    let collector = ProgressiveCollector::new(
        fast_collector_config(),
        Arc::new(PrimaryStrategy::new(primary, connections.clone())),
        permissive_rate_limiter(),
    )
    .with_fallback(Arc::new(OffTargetStrategy))
    .with_fallback(Arc::new(ScrapingStrategy::new(scrape.clone(), connections)));

    let outcome = collector.execute(context(JobBuilder::new("5").build())).await;

    let result = outcome.result.unwrap();
    assert!(result.extended_data_available);
    assert_eq!(result.field_sources["tax_history"], StrategyKind::Scraping);
    assert_eq!(result.field_sources["listing_photo"], StrategyKind::Automation);
    assert!(result.missing_fields.is_empty());
    assert!(result.errors.iter().any(|e| {
        e.stage == JobStage::Extended
            && e.strategy == Some(StrategyKind::Automation)
            && e.kind == ErrorKind::Parse
    }));
    assert_eq!(scrape.fetched().len(), 1);
}
