use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Endpoints and selectors of the three data acquisition strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub primary_base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub user_agent: String,
    pub webdriver_url: String,
    /// `{identifier}` is substituted with the record identifier
    pub record_page_template: String,
    /// field name -> CSS selector, shared by automation and scraping
    pub field_selectors: BTreeMap<String, String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            primary_base_url: "http://127.0.0.1:8081/api".to_string(),
            api_key: None,
            request_timeout_ms: 5_000,
            user_agent: concat!("collector/", env!("CARGO_PKG_VERSION")).to_string(),
            webdriver_url: "http://127.0.0.1:4444".to_string(),
            record_page_template: "http://127.0.0.1:8081/records/{identifier}".to_string(),
            field_selectors: BTreeMap::new(),
        }
    }
}

impl SourcesConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("primary_base_url", &self.primary_base_url),
            ("webdriver_url", &self.webdriver_url),
        ] {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(anyhow::anyhow!("{} 必须是 http(s) 地址: {}", name, value));
            }
        }
        if !self.record_page_template.contains("{identifier}") {
            return Err(anyhow::anyhow!("记录页面模板必须包含 {{identifier}} 占位符"));
        }
        if self.request_timeout_ms == 0 {
            return Err(anyhow::anyhow!("请求超时必须大于0"));
        }
        if self.field_selectors.values().any(|s| s.trim().is_empty()) {
            return Err(anyhow::anyhow!("字段选择器不能为空"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn record_page_url(&self, identifier: &str) -> String {
        self.record_page_template.replace("{identifier}", identifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceKind {
    None,
    JsonFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub kind: PersistenceKind,
    pub path: Option<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            kind: PersistenceKind::None,
            path: None,
        }
    }
}

impl PersistenceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.kind == PersistenceKind::JsonFile && self.path.as_deref().unwrap_or("").is_empty() {
            return Err(anyhow::anyhow!("json_file 持久化需要配置 path"));
        }
        Ok(())
    }
}
