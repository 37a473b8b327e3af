pub mod cache;
pub mod metrics_collector;
pub mod persistence;
pub mod pool;
pub mod rate_limiter;
pub mod retry;
pub mod sources;

pub use cache::{CacheStats, ResultCache};
pub use metrics_collector::MetricsCollector;
pub use persistence::{sink_from_config, JsonFilePersistenceSink, NoopPersistenceSink};
pub use pool::{
    BrowserSession, BrowserSessionManager, HttpConnection, HttpConnectionManager, PoolStats,
    PooledResource, ResourceManager, ResourcePool,
};
pub use rate_limiter::{AdaptiveRateLimiter, RateLimiterSnapshot};
pub use retry::RetryPolicy;
pub use sources::{
    AutomationDriver, HtmlScrapeSource, HttpPrimarySource, PrimaryDataSource, ScrapeSource,
    WebDriverAutomation,
};

/// Pool of HTTP connections shared by the primary and scraping strategies
pub type ConnectionPool = ResourcePool<HttpConnectionManager>;

/// Pool of automation sessions
pub type BrowserPool = ResourcePool<BrowserSessionManager>;
