pub mod api_observability;
pub mod app_config;
pub mod engine;
pub mod resources;
pub mod sources;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use engine::{BatchConfig, CollectorConfig, RetryConfig, SchedulerConfig, StagePlan};
pub use resources::{CacheConfig, PoolConfig, RateLimiterConfig};
pub use sources::{PersistenceConfig, PersistenceKind, SourcesConfig};
