use std::collections::BTreeMap;

use async_trait::async_trait;
use collector_core::config::SourcesConfig;
use collector_core::models::RecordData;
use collector_core::{CollectorError, CollectorResult};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{map_transport_error, AutomationDriver};
use crate::pool::BrowserSession;

const EXTRACT_SCRIPT: &str = r#"
const selectors = arguments[0];
const out = {};
for (const [field, selector] of Object.entries(selectors)) {
  const nodes = Array.from(document.querySelectorAll(selector));
  if (nodes.length === 1) {
    out[field] = nodes[0].textContent.trim();
  } else if (nodes.length > 1) {
    out[field] = nodes.map((n) => n.textContent.trim());
  }
}
return out;
"#;

/// W3C WebDriver client driving a headless browser
#[derive(Debug, Clone)]
pub struct WebDriverAutomation {
    client: reqwest::Client,
    endpoint: String,
    selectors: BTreeMap<String, String>,
    headless: bool,
}

impl WebDriverAutomation {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        selectors: BTreeMap<String, String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            selectors,
            headless: true,
        }
    }

    pub fn from_config(config: &SourcesConfig) -> CollectorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CollectorError::Configuration(format!("failed to build webdriver client: {e}")))?;
        Ok(Self::new(
            client,
            config.webdriver_url.clone(),
            config.field_selectors.clone(),
        ))
    }

    fn selector_for(&self, field: &str) -> String {
        self.selectors
            .get(field)
            .cloned()
            .unwrap_or_else(|| format!("[data-field=\"{field}\"]"))
    }

    fn session_url(&self, session: &BrowserSession, suffix: &str) -> String {
        format!("{}/session/{}{}", self.endpoint, session.session_id, suffix)
    }

    /// Sends a command and unwraps the `value` member of the reply
    async fn command(&self, request: reqwest::RequestBuilder, what: &str) -> CollectorResult<Value> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body: Value = response.json().await.map_err(map_transport_error)?;
        let value = body.get("value").cloned().unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(value);
        }

        let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Err(map_webdriver_error(status.as_u16(), error, &format!("{what}: {message}")))
    }
}

fn map_webdriver_error(status: u16, error: &str, message: &str) -> CollectorError {
    match error {
        "invalid session id" | "no such window" | "session not created" => {
            CollectorError::Connectivity(format!("{error} ({message})"))
        }
        "timeout" | "script timeout" => CollectorError::Timeout(format!("{error} ({message})")),
        "javascript error" | "no such element" | "invalid selector" => {
            CollectorError::Parse(format!("{error} ({message})"))
        }
        _ => CollectorError::ServerError {
            status,
            message: format!("{error} ({message})"),
        },
    }
}

#[async_trait]
impl AutomationDriver for WebDriverAutomation {
    async fn open(&self, url: &str) -> CollectorResult<BrowserSession> {
        let mut args = vec!["--disable-gpu", "--no-sandbox"];
        if self.headless {
            args.push("--headless=new");
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        });

        let value = self
            .command(
                self.client
                    .post(format!("{}/session", self.endpoint))
                    .json(&capabilities),
                "new session",
            )
            .await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| CollectorError::Parse("new session reply without sessionId".into()))?;

        let mut session = BrowserSession::new(session_id);
        if url != "about:blank" {
            self.navigate(&mut session, url).await?;
        }
        Ok(session)
    }

    async fn navigate(&self, session: &mut BrowserSession, url: &str) -> CollectorResult<()> {
        self.command(
            self.client
                .post(self.session_url(session, "/url"))
                .json(&json!({ "url": url })),
            "navigate",
        )
        .await?;
        session.current_url = Some(url.to_string());
        Ok(())
    }

    async fn extract(
        &self,
        session: &BrowserSession,
        fields: &[String],
    ) -> CollectorResult<RecordData> {
        let selectors: serde_json::Map<String, Value> = fields
            .iter()
            .map(|f| (f.clone(), Value::String(self.selector_for(f))))
            .collect();

        let value = self
            .command(
                self.client
                    .post(self.session_url(session, "/execute/sync"))
                    .json(&json!({ "script": EXTRACT_SCRIPT, "args": [selectors] })),
                "extract",
            )
            .await?;

        match value {
            Value::Object(record) => {
                debug!(
                    session_id = %session.session_id,
                    extracted = record.len(),
                    "Extracted fields via automation"
                );
                Ok(record)
            }
            _ => Err(CollectorError::Parse("extract script returned a non-object".into())),
        }
    }

    async fn close(&self, session: BrowserSession) -> CollectorResult<()> {
        self.command(
            self.client.delete(self.session_url(&session, "")),
            "delete session",
        )
        .await
        .map(|_| ())
    }

    async fn is_alive(&self, session: &BrowserSession) -> bool {
        match self
            .command(self.client.get(self.session_url(session, "/url")), "probe")
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "Browser session probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver(server: &MockServer) -> WebDriverAutomation {
        let mut selectors = BTreeMap::new();
        selectors.insert("tax_history".to_string(), "table.tax".to_string());
        WebDriverAutomation::new(reqwest::Client::new(), server.uri(), selectors)
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"value": {"sessionId": "abc", "capabilities": {}}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/abc/url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": null})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/abc/execute/sync"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"value": {"tax_history": ["2023: 1200", "2022: 1100"]}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/session/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": null})))
            .expect(1)
            .mount(&server)
            .await;

        let driver = driver(&server);
        let mut session = driver.open("about:blank").await.unwrap();
        assert_eq!(session.session_id, "abc");

        driver
            .navigate(&mut session, "http://records.test/42")
            .await
            .unwrap();
        assert_eq!(session.current_url.as_deref(), Some("http://records.test/42"));

        let record = driver
            .extract(&session, &["tax_history".to_string()])
            .await
            .unwrap();
        assert_eq!(record["tax_history"][0], json!("2023: 1200"));

        driver.close(session).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_session_maps_to_connectivity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/gone/url"))
            .respond_with(ResponseTemplate::new(404).set_body_json(
                json!({"value": {"error": "invalid session id", "message": "session deleted"}}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/gone/execute/sync"))
            .respond_with(ResponseTemplate::new(404).set_body_json(
                json!({"value": {"error": "invalid session id", "message": "session deleted"}}),
            ))
            .mount(&server)
            .await;

        let driver = driver(&server);
        let session = BrowserSession::new("gone");
        assert!(!driver.is_alive(&session).await);
        assert!(matches!(
            driver.extract(&session, &["owner".to_string()]).await,
            Err(CollectorError::Connectivity(_))
        ));
    }

    #[test]
    fn test_default_selector() {
        let driver = WebDriverAutomation::new(reqwest::Client::new(), "http://wd", BTreeMap::new());
        assert_eq!(driver.selector_for("owner"), "[data-field=\"owner\"]");
    }
}
