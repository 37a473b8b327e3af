//! 数据获取策略
//!
//! 三种策略共享同一个接口 [`DataStrategy`]，由采集器按显式顺序调用。
//! 每次调用都以作用域方式从资源池租用连接或浏览器会话，无论成功失败都会归还。

use std::sync::Arc;

use async_trait::async_trait;
use collector_core::models::{RecordData, StrategyKind};
use collector_core::{CollectorError, CollectorResult};
use collector_infrastructure::{
    BrowserPool, ConnectionPool, PrimaryDataSource, ScrapeSource,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a stage asks a strategy for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionRequest {
    /// Primary source path; unused by the fallbacks
    pub path: Option<String>,
    /// Fields the fallbacks should extract
    pub fields: Vec<String>,
}

impl CollectionRequest {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            fields: Vec::new(),
        }
    }

    pub fn fields(fields: Vec<String>) -> Self {
        Self { path: None, fields }
    }
}

/// One way of filling record fields for a stage.
///
/// Implementations return only the fields they found; the collector decides
/// how the partial record is merged.
#[async_trait]
pub trait DataStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn collect(
        &self,
        identifier: &str,
        request: &CollectionRequest,
        cancel: &CancellationToken,
    ) -> CollectorResult<RecordData>;
}

/// Structured API calls over pooled HTTP connections
pub struct PrimaryStrategy {
    source: Arc<dyn PrimaryDataSource>,
    connections: ConnectionPool,
}

impl PrimaryStrategy {
    pub fn new(source: Arc<dyn PrimaryDataSource>, connections: ConnectionPool) -> Self {
        Self {
            source,
            connections,
        }
    }
}

#[async_trait]
impl DataStrategy for PrimaryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Primary
    }

    async fn collect(
        &self,
        identifier: &str,
        request: &CollectionRequest,
        cancel: &CancellationToken,
    ) -> CollectorResult<RecordData> {
        let path = request.path.as_deref().ok_or_else(|| {
            CollectorError::Internal("primary strategy requires a request path".to_string())
        })?;

        let connection = self
            .connections
            .acquire_cancellable(self.connections.default_timeout(), cancel)
            .await?;
        let result = self.source.request(&connection, identifier, path).await;
        connection.release().await;
        result
    }
}

/// Headless browser extraction over pooled sessions
pub struct AutomationStrategy {
    sessions: BrowserPool,
    page_template: String,
}

impl AutomationStrategy {
    /// `page_template` carries an `{identifier}` placeholder
    pub fn new(sessions: BrowserPool, page_template: impl Into<String>) -> Self {
        Self {
            sessions,
            page_template: page_template.into(),
        }
    }
}

#[async_trait]
impl DataStrategy for AutomationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Automation
    }

    async fn collect(
        &self,
        identifier: &str,
        request: &CollectionRequest,
        cancel: &CancellationToken,
    ) -> CollectorResult<RecordData> {
        let mut session = self
            .sessions
            .acquire_cancellable(self.sessions.default_timeout(), cancel)
            .await?;
        let driver = self.sessions.manager().driver().clone();
        let url = self.page_template.replace("{identifier}", identifier);

        let outcome = match driver.navigate(&mut session, &url).await {
            Ok(()) => driver.extract(&session, &request.fields).await,
            Err(e) => Err(e),
        };

        match &outcome {
            // a lost session is not worth returning to the pool
            Err(CollectorError::Connectivity(_)) => {
                debug!(session_id = %session.session_id, "Discarding broken browser session");
                session.discard().await;
            }
            _ => session.release().await,
        }
        outcome
    }
}

/// Raw page fetch and parse over pooled HTTP connections
pub struct ScrapingStrategy {
    source: Arc<dyn ScrapeSource>,
    connections: ConnectionPool,
}

impl ScrapingStrategy {
    pub fn new(source: Arc<dyn ScrapeSource>, connections: ConnectionPool) -> Self {
        Self {
            source,
            connections,
        }
    }
}

#[async_trait]
impl DataStrategy for ScrapingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Scraping
    }

    async fn collect(
        &self,
        identifier: &str,
        request: &CollectionRequest,
        cancel: &CancellationToken,
    ) -> CollectorResult<RecordData> {
        let url = self.source.page_url(identifier);
        let connection = self
            .connections
            .acquire_cancellable(self.connections.default_timeout(), cancel)
            .await?;
        let document = self.source.fetch(&connection, &url).await;
        connection.release().await;

        self.source.parse(&document?, &request.fields)
    }
}
