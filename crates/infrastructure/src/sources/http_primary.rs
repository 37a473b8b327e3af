use async_trait::async_trait;
use collector_core::config::SourcesConfig;
use collector_core::models::RecordData;
use collector_core::{CollectorError, CollectorResult};
use tracing::debug;
use url::Url;

use super::{map_status, map_transport_error, PrimaryDataSource};
use crate::pool::HttpConnection;

/// JSON API client: `GET {base_url}/{path}/{identifier}`
#[derive(Debug, Clone)]
pub struct HttpPrimarySource {
    base_url: Url,
    api_key: Option<String>,
}

impl HttpPrimarySource {
    pub fn new(base_url: &str, api_key: Option<String>) -> CollectorResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CollectorError::Configuration(format!("invalid base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CollectorError::Configuration(format!(
                "base url cannot carry a path: {base_url}"
            )));
        }
        Ok(Self { base_url, api_key })
    }

    pub fn from_config(config: &SourcesConfig) -> CollectorResult<Self> {
        Self::new(&config.primary_base_url, config.api_key.clone())
    }

    pub fn endpoint(&self, identifier: &str, path: &str) -> CollectorResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                CollectorError::Configuration(format!("base url cannot carry a path: {}", self.base_url))
            })?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            segments.push(identifier);
        }
        Ok(url)
    }
}

#[async_trait]
impl PrimaryDataSource for HttpPrimarySource {
    async fn request(
        &self,
        connection: &HttpConnection,
        identifier: &str,
        path: &str,
    ) -> CollectorResult<RecordData> {
        let url = self.endpoint(identifier, path)?;
        debug!(url = %url, connection_id = connection.id, "Primary source request");

        let mut request = connection.client.get(url.clone());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, &format!("{path}/{identifier}")));
        }

        let body: serde_json::Value = response.json().await.map_err(map_transport_error)?;
        match body {
            serde_json::Value::Object(record) => Ok(record),
            other => Err(CollectorError::Parse(format!(
                "expected JSON object from {url}, got {}",
                json_kind(&other)
            ))),
        }
    }

    fn name(&self) -> &str {
        "http_primary"
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
