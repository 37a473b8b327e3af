use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use collector_core::config::SourcesConfig;
use collector_core::{CollectorError, CollectorResult};

use super::ResourceManager;

/// Pooled handle onto the shared HTTP client
#[derive(Debug, Clone)]
pub struct HttpConnection {
    pub id: u64,
    pub client: reqwest::Client,
    pub created_at: Instant,
    pub requests_served: u64,
}

impl HttpConnection {
    /// Connection without a pool, for tests and one-off requests
    pub fn detached(client: reqwest::Client) -> Self {
        Self {
            id: 0,
            client,
            created_at: Instant::now(),
            requests_served: 0,
        }
    }
}

pub struct HttpConnectionManager {
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpConnectionManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &SourcesConfig) -> CollectorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CollectorError::Configuration(format!("failed to build http client: {e}")))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ResourceManager for HttpConnectionManager {
    type Resource = HttpConnection;

    async fn create(&self) -> CollectorResult<HttpConnection> {
        Ok(HttpConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            client: self.client.clone(),
            created_at: Instant::now(),
            requests_served: 0,
        })
    }

    async fn is_healthy(&self, _resource: &HttpConnection) -> bool {
        true
    }

    async fn reset(&self, resource: &mut HttpConnection) -> CollectorResult<()> {
        resource.requests_served += 1;
        Ok(())
    }

    async fn close(&self, _resource: HttpConnection) {}

    fn kind(&self) -> &'static str {
        "http_connection"
    }
}
