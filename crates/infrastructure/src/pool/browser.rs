use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collector_core::CollectorResult;
use tracing::debug;

use super::ResourceManager;
use crate::sources::AutomationDriver;

pub const BLANK_PAGE: &str = "about:blank";

/// Live automation session owned by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSession {
    pub session_id: String,
    pub current_url: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl BrowserSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_url: None,
            opened_at: Utc::now(),
        }
    }
}

pub struct BrowserSessionManager {
    driver: Arc<dyn AutomationDriver>,
}

impl BrowserSessionManager {
    pub fn new(driver: Arc<dyn AutomationDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<dyn AutomationDriver> {
        &self.driver
    }
}

#[async_trait]
impl ResourceManager for BrowserSessionManager {
    type Resource = BrowserSession;

    async fn create(&self) -> CollectorResult<BrowserSession> {
        let session = self.driver.open(BLANK_PAGE).await?;
        debug!(session_id = %session.session_id, "Opened browser session");
        Ok(session)
    }

    async fn is_healthy(&self, resource: &BrowserSession) -> bool {
        self.driver.is_alive(resource).await
    }

    async fn reset(&self, resource: &mut BrowserSession) -> CollectorResult<()> {
        self.driver.navigate(resource, BLANK_PAGE).await
    }

    async fn close(&self, resource: BrowserSession) {
        let session_id = resource.session_id.clone();
        if let Err(e) = self.driver.close(resource).await {
            debug!(session_id = %session_id, error = %e, "Failed to close browser session");
        }
    }

    fn kind(&self) -> &'static str {
        "browser_session"
    }
}
