use std::collections::BTreeMap;

use async_trait::async_trait;
use collector_core::config::SourcesConfig;
use collector_core::models::RecordData;
use collector_core::{CollectorError, CollectorResult};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

use super::{map_status, map_transport_error, ScrapeSource};
use crate::pool::HttpConnection;

/// Fetches record pages and extracts fields with configured CSS selectors
#[derive(Debug, Clone)]
pub struct HtmlScrapeSource {
    page_template: String,
    selectors: BTreeMap<String, String>,
}

impl HtmlScrapeSource {
    pub fn new(page_template: impl Into<String>, selectors: BTreeMap<String, String>) -> Self {
        Self {
            page_template: page_template.into(),
            selectors,
        }
    }

    pub fn from_config(config: &SourcesConfig) -> Self {
        Self::new(
            config.record_page_template.clone(),
            config.field_selectors.clone(),
        )
    }

    fn selector_for(&self, field: &str) -> CollectorResult<Selector> {
        let raw = self
            .selectors
            .get(field)
            .cloned()
            .unwrap_or_else(|| format!("[data-field=\"{field}\"]"));
        Selector::parse(&raw)
            .map_err(|e| CollectorError::Configuration(format!("invalid selector for {field}: {e}")))
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tables become arrays of rows, everything else becomes trimmed text
fn value_of(element: ElementRef<'_>) -> Value {
    if element.value().name() != "table" {
        return Value::String(text_of(element));
    }
    let (Ok(row_selector), Ok(cell_selector)) = (Selector::parse("tr"), Selector::parse("td, th"))
    else {
        return Value::String(text_of(element));
    };
    let rows: Vec<Value> = element
        .select(&row_selector)
        .map(|row| {
            Value::Array(
                row.select(&cell_selector)
                    .map(|cell| Value::String(text_of(cell)))
                    .collect(),
            )
        })
        .filter(|row| row.as_array().is_some_and(|cells| !cells.is_empty()))
        .collect();
    Value::Array(rows)
}

#[async_trait]
impl ScrapeSource for HtmlScrapeSource {
    async fn fetch(&self, connection: &HttpConnection, url: &str) -> CollectorResult<String> {
        debug!(url = url, connection_id = connection.id, "Fetching page");
        let response = connection
            .client
            .get(url)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, url));
        }
        response.text().await.map_err(map_transport_error)
    }

    fn parse(&self, document: &str, fields: &[String]) -> CollectorResult<RecordData> {
        let html = Html::parse_document(document);
        let mut record = RecordData::new();

        for field in fields {
            let selector = self.selector_for(field)?;
            let matches: Vec<Value> = html.select(&selector).map(value_of).collect();
            match matches.len() {
                0 => {}
                1 => {
                    if let Some(value) = matches.into_iter().next() {
                        record.insert(field.clone(), value);
                    }
                }
                _ => {
                    record.insert(field.clone(), Value::Array(matches));
                }
            }
        }

        if record.is_empty() && !fields.is_empty() {
            return Err(CollectorError::Parse(format!(
                "none of the requested fields matched: {}",
                fields.join(", ")
            )));
        }
        Ok(record)
    }

    fn page_url(&self, identifier: &str) -> String {
        self.page_template.replace("{identifier}", identifier)
    }
}
