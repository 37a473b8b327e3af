//! 外部数据源
//!
//! 三种数据获取途径的协作接口及其HTTP实现：
//!
//! - [`PrimaryDataSource`]：结构化数据接口，返回JSON记录
//! - [`AutomationDriver`]：无头浏览器自动化，会话由浏览器会话池管理
//! - [`ScrapeSource`]：原始页面抓取与解析

pub mod html_scrape;
pub mod http_primary;
pub mod webdriver;

use async_trait::async_trait;
use collector_core::models::RecordData;
use collector_core::{CollectorError, CollectorResult};
use reqwest::StatusCode;

use crate::pool::{BrowserSession, HttpConnection};

pub use html_scrape::HtmlScrapeSource;
pub use http_primary::HttpPrimarySource;
pub use webdriver::WebDriverAutomation;

/// Structured record API queried by the primary strategy
#[async_trait]
pub trait PrimaryDataSource: Send + Sync {
    /// Fetches the record section at `path` for `identifier`
    async fn request(
        &self,
        connection: &HttpConnection,
        identifier: &str,
        path: &str,
    ) -> CollectorResult<RecordData>;

    fn name(&self) -> &str;
}

/// Browser automation backend; sessions come from the browser pool
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn open(&self, url: &str) -> CollectorResult<BrowserSession>;

    async fn navigate(&self, session: &mut BrowserSession, url: &str) -> CollectorResult<()>;

    async fn extract(&self, session: &BrowserSession, fields: &[String])
        -> CollectorResult<RecordData>;

    async fn close(&self, session: BrowserSession) -> CollectorResult<()>;

    async fn is_alive(&self, session: &BrowserSession) -> bool;
}

/// HTML page fetcher and field extractor
#[async_trait]
pub trait ScrapeSource: Send + Sync {
    async fn fetch(&self, connection: &HttpConnection, url: &str) -> CollectorResult<String>;

    fn parse(&self, document: &str, fields: &[String]) -> CollectorResult<RecordData>;

    /// Page holding the record of `identifier`
    fn page_url(&self, identifier: &str) -> String;
}

pub(crate) fn map_transport_error(err: reqwest::Error) -> CollectorError {
    if err.is_timeout() {
        CollectorError::Timeout(err.to_string())
    } else if err.is_decode() {
        CollectorError::Parse(err.to_string())
    } else {
        CollectorError::Connectivity(err.to_string())
    }
}

/// Maps a non-success HTTP status onto the error taxonomy
pub(crate) fn map_status(status: StatusCode, context: &str) -> CollectorError {
    match status.as_u16() {
        401 | 403 => CollectorError::Auth(format!("{context}: {status}")),
        404 => CollectorError::NotFound(context.to_string()),
        429 => CollectorError::RateLimited(format!("{context}: {status}")),
        408 => CollectorError::Timeout(format!("{context}: {status}")),
        code if status.is_server_error() => CollectorError::ServerError {
            status: code,
            message: context.to_string(),
        },
        code => CollectorError::ServerError {
            status: code,
            message: format!("unexpected status for {context}"),
        },
    }
}
