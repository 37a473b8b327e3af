//! Scripted in-memory collaborators
//!
//! Every mock answers from a script configured up front and records the calls
//! it received, so tests can assert on both outcomes and interactions without
//! touching the network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use collector_core::models::{
    CollectionMode, JobStage, ProgressiveResult, RecordData, StrategyKind,
};
use collector_core::traits::{JobContext, JobEvent, JobExecutor, JobOutcome, PersistenceSink};
use collector_core::{CollectorError, CollectorResult};
use collector_infrastructure::{
    AutomationDriver, BrowserSession, HttpConnection, PrimaryDataSource, ScrapeSource,
};
use tokio::sync::Semaphore;

/// One scripted answer
#[derive(Debug, Clone)]
pub struct Reply {
    pub delay: Duration,
    pub outcome: CollectorResult<RecordData>,
}

impl Reply {
    pub fn data(value: serde_json::Value) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Ok(to_record(value)),
        }
    }

    pub fn error(error: CollectorError) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Err(error),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn play(self) -> CollectorResult<RecordData> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome
    }
}

/// Converts a JSON object literal into a record; anything else yields an empty record
pub fn to_record(value: serde_json::Value) -> RecordData {
    match value {
        serde_json::Value::Object(map) => map,
        _ => RecordData::new(),
    }
}

/// Replies keyed by an optional identifier plus a route. One-shot replies are
/// consumed first, then the standing reply answers every later call.
#[derive(Default)]
struct Script {
    queued: HashMap<(Option<String>, String), VecDeque<Reply>>,
    standing: HashMap<(Option<String>, String), Reply>,
}

impl Script {
    fn next(&mut self, identifier: &str, route: &str) -> Option<Reply> {
        let specific = (Some(identifier.to_string()), route.to_string());
        let any = (None, route.to_string());
        for key in [&specific, &any] {
            if let Some(reply) = self.queued.get_mut(key).and_then(VecDeque::pop_front) {
                return Some(reply);
            }
        }
        self.standing
            .get(&specific)
            .or_else(|| self.standing.get(&any))
            .cloned()
    }
}

/// Tracks how many calls are in flight at once
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Primary source answering per `(identifier, path)`; unscripted paths yield `NotFound`
#[derive(Default)]
pub struct ScriptedPrimarySource {
    script: Mutex<Script>,
    calls: Mutex<Vec<(String, String)>>,
    pub probe: ConcurrencyProbe,
}

impl ScriptedPrimarySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standing reply for `path` on every identifier
    pub fn on(self, path: &str, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .standing
            .insert((None, path.to_string()), reply);
        self
    }

    /// Standing reply for `path` on one identifier
    pub fn on_identifier(self, identifier: &str, path: &str, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .standing
            .insert((Some(identifier.to_string()), path.to_string()), reply);
        self
    }

    /// One-shot reply, played before the standing one
    pub fn once(self, path: &str, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .queued
            .entry((None, path.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| p == path)
            .count()
    }
}

#[async_trait]
impl PrimaryDataSource for ScriptedPrimarySource {
    async fn request(
        &self,
        _connection: &HttpConnection,
        identifier: &str,
        path: &str,
    ) -> CollectorResult<RecordData> {
        self.calls
            .lock()
            .unwrap()
            .push((identifier.to_string(), path.to_string()));
        let reply = self
            .script
            .lock()
            .unwrap()
            .next(identifier, path)
            .unwrap_or_else(|| {
                Reply::error(CollectorError::NotFound(format!("{path}/{identifier}")))
            });

        self.probe.enter();
        let outcome = reply.play().await;
        self.probe.exit();
        outcome
    }

    fn name(&self) -> &str {
        "scripted_primary"
    }
}

/// Automation driver with scripted extraction replies and session bookkeeping
#[derive(Default)]
pub struct ScriptedAutomationDriver {
    script: Mutex<Script>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    extract_calls: AtomicUsize,
    dead_sessions: Mutex<Vec<String>>,
}

const EXTRACT_ROUTE: &str = "extract";

impl ScriptedAutomationDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_extract(self, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .standing
            .insert((None, EXTRACT_ROUTE.to_string()), reply);
        self
    }

    pub fn on_extract_for(self, identifier: &str, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .standing
            .insert((Some(identifier.to_string()), EXTRACT_ROUTE.to_string()), reply);
        self
    }

    /// Later liveness probes of `session_id` fail
    pub fn kill_session(&self, session_id: &str) {
        self.dead_sessions.lock().unwrap().push(session_id.to_string());
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationDriver for ScriptedAutomationDriver {
    async fn open(&self, url: &str) -> CollectorResult<BrowserSession> {
        let n = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let mut session = BrowserSession::new(format!("session-{n}"));
        session.current_url = Some(url.to_string());
        Ok(session)
    }

    async fn navigate(&self, session: &mut BrowserSession, url: &str) -> CollectorResult<()> {
        session.current_url = Some(url.to_string());
        Ok(())
    }

    async fn extract(
        &self,
        session: &BrowserSession,
        fields: &[String],
    ) -> CollectorResult<RecordData> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        // 页面地址的最后一段即标识符
        let identifier = session
            .current_url
            .as_deref()
            .and_then(|url| url.rsplit('/').next())
            .unwrap_or_default()
            .to_string();
        let reply = self
            .script
            .lock()
            .unwrap()
            .next(&identifier, EXTRACT_ROUTE)
            .unwrap_or_else(|| Reply::error(CollectorError::Parse("nothing scripted".into())));

        let record = reply.play().await?;
        Ok(record
            .into_iter()
            .filter(|(field, _)| fields.contains(field))
            .collect())
    }

    async fn close(&self, _session: BrowserSession) -> CollectorResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alive(&self, session: &BrowserSession) -> bool {
        !self
            .dead_sessions
            .lock()
            .unwrap()
            .contains(&session.session_id)
    }
}

/// Scrape source whose "pages" are JSON objects; `parse` keeps the requested fields
#[derive(Default)]
pub struct ScriptedScrapeSource {
    script: Mutex<Script>,
    fetched: Mutex<Vec<String>>,
}

const PAGE_ROUTE: &str = "page";

impl ScriptedScrapeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page(self, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .standing
            .insert((None, PAGE_ROUTE.to_string()), reply);
        self
    }

    pub fn on_page_for(self, identifier: &str, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .standing
            .insert((Some(identifier.to_string()), PAGE_ROUTE.to_string()), reply);
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScrapeSource for ScriptedScrapeSource {
    async fn fetch(&self, _connection: &HttpConnection, url: &str) -> CollectorResult<String> {
        self.fetched.lock().unwrap().push(url.to_string());
        let identifier = url.rsplit('/').next().unwrap_or_default();
        let reply = self
            .script
            .lock()
            .unwrap()
            .next(identifier, PAGE_ROUTE)
            .unwrap_or_else(|| Reply::error(CollectorError::NotFound(url.to_string())));
        let record = reply.play().await?;
        Ok(serde_json::Value::Object(record).to_string())
    }

    fn parse(&self, document: &str, fields: &[String]) -> CollectorResult<RecordData> {
        let record: RecordData = serde_json::from_str(document)?;
        Ok(record
            .into_iter()
            .filter(|(field, _)| fields.contains(field))
            .collect())
    }

    fn page_url(&self, identifier: &str) -> String {
        format!("http://pages.test/records/{identifier}")
    }
}

/// Persistence sink keeping every saved record in memory
#[derive(Default)]
pub struct RecordingSink {
    saved: Mutex<Vec<ProgressiveResult>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn saved(&self) -> Vec<ProgressiveResult> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceSink for RecordingSink {
    async fn save(&self, record: &ProgressiveResult) -> CollectorResult<bool> {
        if self.fail {
            return Err(CollectorError::Internal("sink unavailable".into()));
        }
        self.saved.lock().unwrap().push(record.clone());
        Ok(true)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Executor standing in for the collector inside scheduler and orchestrator tests.
///
/// Each job sleeps for the configured duration (or waits for a permit when
/// gated), honours cancellation while waiting, and finishes at the mode's last
/// stage unless a failure is scripted for its identifier.
pub struct ScriptedExecutor {
    duration: Duration,
    gate: Option<Arc<Semaphore>>,
    failures: Mutex<HashMap<String, CollectorError>>,
    executed: Mutex<Vec<String>>,
    pub probe: ConcurrencyProbe,
}

impl ScriptedExecutor {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            gate: None,
            failures: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            probe: ConcurrencyProbe::default(),
        }
    }

    /// Jobs wait for a permit from the returned semaphore before finishing
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut executor = Self::new(Duration::ZERO);
        executor.gate = Some(gate.clone());
        (executor, gate)
    }

    pub fn fail_identifier(self, identifier: &str, error: CollectorError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(identifier.to_string(), error);
        self
    }

    /// Identifiers in the order their execution started
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    async fn wait(&self) {
        match &self.gate {
            Some(gate) => {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            None => tokio::time::sleep(self.duration).await,
        }
    }
}

fn completion_for(mode: CollectionMode) -> u8 {
    match mode {
        CollectionMode::Basic => 33,
        CollectionMode::Detailed => 66,
        CollectionMode::Complete => 100,
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn execute(&self, ctx: JobContext) -> JobOutcome {
        let job = &ctx.job;
        self.executed
            .lock()
            .unwrap()
            .push(job.identifier().to_string());
        self.probe.enter();
        ctx.report(JobEvent::StageStarted {
            job_id: job.id,
            stage: JobStage::Basic,
        });

        let cancelled = tokio::select! {
            _ = ctx.cancel.cancelled() => true,
            _ = self.wait() => false,
        };
        self.probe.exit();

        let mut result = ProgressiveResult::new(job.task_type(), job.identifier());
        if cancelled {
            result.seal(JobStage::Cancelled, 0.0);
            return JobOutcome::cancelled(Some(result), 0);
        }

        let failure = self.failures.lock().unwrap().get(job.identifier()).cloned();
        if let Some(error) = failure {
            result.record_error(JobStage::Basic, Some(StrategyKind::Primary), &error);
            result.seal(JobStage::Failed, self.duration.as_secs_f64());
            return JobOutcome::failed(Some(result), 0, error);
        }

        let last = job.mode.last_stage();
        let mut data = RecordData::new();
        data.insert(
            "identifier".to_string(),
            serde_json::Value::String(job.identifier().to_string()),
        );
        result.merge(data, StrategyKind::Primary, false);
        result.basic_data_available = true;
        result.detailed_data_available = job.mode.includes(JobStage::Detailed);
        result.extended_data_available = job.mode.includes(JobStage::Extended);
        result.advance(last, completion_for(job.mode));
        ctx.report(JobEvent::StageCompleted {
            job_id: job.id,
            stage: last,
            completion_percentage: result.completion_percentage,
            partial: result.clone(),
        });
        result.seal(JobStage::Done, self.duration.as_secs_f64());
        JobOutcome::done(result, 0)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
