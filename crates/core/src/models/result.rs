use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{CollectorError, ErrorKind};
use crate::models::job::JobStage;

/// Accumulating field map of one record
pub type RecordData = serde_json::Map<String, serde_json::Value>;

/// Data acquisition mechanism, in escalation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Primary,
    Automation,
    Scraping,
}

impl StrategyKind {
    /// Tag recorded in `data_sources_used`
    pub fn as_tag(&self) -> &'static str {
        match self {
            StrategyKind::Primary => "primary_api",
            StrategyKind::Automation => "browser_automation",
            StrategyKind::Scraping => "page_scraping",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// One strategy failure recorded on a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: JobStage,
    pub strategy: Option<StrategyKind>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(stage: JobStage, strategy: Option<StrategyKind>, error: &CollectorError) -> Self {
        Self {
            stage,
            strategy,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Result of the progressive pipeline for one identifier.
///
/// Fields only ever accumulate: a later stage fills gaps and never removes a
/// populated field, and the completion percentage never decreases. Once the
/// result is sealed (`Done`/`Failed`/`Cancelled`) every mutator is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveResult {
    pub identifier: String,
    pub task_type: String,
    /// Current pipeline stage, or the terminal stage once sealed
    pub stage: JobStage,
    /// Last pipeline stage that ran to completion; survives sealing
    pub last_completed_stage: Option<JobStage>,
    /// 33 / 66 / 100 after Basic / Detailed / Extended, never decreasing
    pub completion_percentage: u8,
    /// Collected fields of the record
    pub data: RecordData,
    /// The Basic stage returned a non-empty record
    pub basic_data_available: bool,
    /// The Detailed stage returned secondary attributes
    pub detailed_data_available: bool,
    /// The Extended stage filled its fields, from the primary source or a fallback
    pub extended_data_available: bool,
    /// Strategies that contributed at least one field, in first-use order
    pub data_sources_used: Vec<StrategyKind>,
    /// Strategy that wrote each field
    pub field_sources: BTreeMap<String, StrategyKind>,
    /// Extended fields no strategy could provide
    pub missing_fields: Vec<String>,
    /// Every strategy failure, in the order it happened
    pub errors: Vec<StageError>,
    pub collection_time_seconds: f64,
    /// Answered from the result cache without running the pipeline
    pub from_cache: bool,
}

impl ProgressiveResult {
    pub fn new(task_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            task_type: task_type.into(),
            stage: JobStage::Pending,
            last_completed_stage: None,
            completion_percentage: 0,
            data: RecordData::new(),
            basic_data_available: false,
            detailed_data_available: false,
            extended_data_available: false,
            data_sources_used: Vec::new(),
            field_sources: BTreeMap::new(),
            missing_fields: Vec::new(),
            errors: Vec::new(),
            collection_time_seconds: 0.0,
            from_cache: false,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Merges a partial record; returns the number of fields written.
    ///
    /// Existing non-null fields are kept unless `overwrite` is set.
    pub fn merge(&mut self, partial: RecordData, source: StrategyKind, overwrite: bool) -> usize {
        if self.is_sealed() {
            return 0;
        }
        let mut written = 0;
        for (field, value) in partial {
            if value.is_null() {
                continue;
            }
            let populated = self.data.get(&field).is_some_and(|v| !v.is_null());
            if populated && !overwrite {
                continue;
            }
            self.field_sources.insert(field.clone(), source);
            self.missing_fields.retain(|f| f != &field);
            self.data.insert(field, value);
            written += 1;
        }
        if written > 0 && !self.data_sources_used.contains(&source) {
            self.data_sources_used.push(source);
        }
        written
    }

    /// Records the stage transition; the percentage is clamped to be monotonic
    pub fn advance(&mut self, stage: JobStage, completion_percentage: u8) {
        if self.is_sealed() {
            return;
        }
        self.stage = stage;
        if stage.is_running() {
            self.last_completed_stage = Some(stage);
        }
        self.completion_percentage = self
            .completion_percentage
            .max(completion_percentage.min(100));
    }

    /// Appends a strategy failure; never changes the stage
    pub fn record_error(
        &mut self,
        stage: JobStage,
        strategy: Option<StrategyKind>,
        error: &CollectorError,
    ) {
        if self.is_sealed() {
            return;
        }
        self.errors.push(StageError::new(stage, strategy, error));
    }

    /// Marks fields as unobtainable unless some strategy already filled them
    pub fn record_missing<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.is_sealed() {
            return;
        }
        for field in fields {
            let field = field.into();
            let populated = self.data.get(&field).is_some_and(|v| !v.is_null());
            if !populated && !self.missing_fields.contains(&field) {
                self.missing_fields.push(field);
            }
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.data.get(field).is_some_and(|v| !v.is_null())
    }

    /// Whether a finished record is complete enough to answer later requests.
    ///
    /// Every stage the record went through must have produced its data;
    /// a record with a failed stage is recomputed instead of cached.
    pub fn is_cacheable(&self) -> bool {
        if self.stage != JobStage::Done || !self.basic_data_available {
            return false;
        }
        match self.last_completed_stage {
            Some(JobStage::Basic) => true,
            Some(JobStage::Detailed) => self.detailed_data_available,
            Some(JobStage::Extended) => {
                self.detailed_data_available
                    && self.extended_data_available
                    && self.missing_fields.is_empty()
            }
            _ => false,
        }
    }

    pub fn sources_tags(&self) -> Vec<&'static str> {
        self.data_sources_used.iter().map(|s| s.as_tag()).collect()
    }

    /// Terminal transition; the result is immutable afterwards
    pub fn seal(&mut self, stage: JobStage, collection_time_seconds: f64) {
        if self.is_sealed() {
            return;
        }
        debug_assert!(stage.is_terminal());
        self.collection_time_seconds = collection_time_seconds;
        self.stage = stage;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, serde_json::Value)]) -> RecordData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_merge_fills_gaps_without_overwriting() {
        let mut result = ProgressiveResult::new("basic-record", "42");
        let written = result.merge(
            record(&[("owner", json!("Smith")), ("zoning", json!("R1"))]),
            StrategyKind::Primary,
            false,
        );
        assert_eq!(written, 2);

        let written = result.merge(
            record(&[("owner", json!("Jones")), ("tax_history", json!([1, 2]))]),
            StrategyKind::Scraping,
            false,
        );
        assert_eq!(written, 1);
        assert_eq!(result.data["owner"], json!("Smith"));
        assert_eq!(result.field_sources["tax_history"], StrategyKind::Scraping);
        assert_eq!(
            result.data_sources_used,
            vec![StrategyKind::Primary, StrategyKind::Scraping]
        );
    }

    #[test]
    fn test_merge_overwrite_when_fresh() {
        let mut result = ProgressiveResult::new("basic-record", "42");
        result.merge(record(&[("owner", json!("Smith"))]), StrategyKind::Primary, false);
        result.merge(record(&[("owner", json!("Jones"))]), StrategyKind::Automation, true);
        assert_eq!(result.data["owner"], json!("Jones"));
    }

    #[test]
    fn test_null_values_never_clear_fields() {
        let mut result = ProgressiveResult::new("basic-record", "42");
        result.merge(record(&[("owner", json!("Smith"))]), StrategyKind::Primary, false);
        result.merge(record(&[("owner", json!(null))]), StrategyKind::Primary, true);
        assert_eq!(result.data["owner"], json!("Smith"));
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut result = ProgressiveResult::new("basic-record", "42");
        result.advance(JobStage::Detailed, 66);
        result.advance(JobStage::Detailed, 33);
        assert_eq!(result.completion_percentage, 66);
        result.advance(JobStage::Extended, 180);
        assert_eq!(result.completion_percentage, 100);
    }

    #[test]
    fn test_sealed_result_is_immutable() {
        let mut result = ProgressiveResult::new("basic-record", "42");
        result.advance(JobStage::Basic, 33);
        result.seal(JobStage::Done, 0.5);
        assert_eq!(
            result.merge(record(&[("late", json!(1))]), StrategyKind::Primary, true),
            0
        );
        result.advance(JobStage::Extended, 100);
        assert_eq!(result.completion_percentage, 33);
        assert_eq!(result.stage, JobStage::Done);
        assert_eq!(result.last_completed_stage, Some(JobStage::Basic));
    }

    #[test]
    fn test_only_complete_records_are_cacheable() {
        let mut empty = ProgressiveResult::new("basic-record", "42");
        empty.record_error(
            JobStage::Basic,
            Some(StrategyKind::Primary),
            &CollectorError::NotFound("42".into()),
        );
        empty.advance(JobStage::Basic, 33);
        empty.seal(JobStage::Done, 0.1);
        assert!(!empty.is_cacheable());

        let mut basic = ProgressiveResult::new("basic-record", "42");
        basic.merge(record(&[("owner", json!("Smith"))]), StrategyKind::Primary, false);
        basic.basic_data_available = true;
        basic.advance(JobStage::Basic, 33);
        assert!(!basic.is_cacheable());
        basic.seal(JobStage::Done, 0.1);
        assert!(basic.is_cacheable());

        let mut degraded = ProgressiveResult::new("basic-record", "42");
        degraded.basic_data_available = true;
        degraded.detailed_data_available = true;
        degraded.record_missing(["tax_history"]);
        degraded.advance(JobStage::Extended, 100);
        degraded.seal(JobStage::Done, 0.1);
        assert!(!degraded.is_cacheable());
    }

    #[test]
    fn test_missing_fields_cleared_when_filled() {
        let mut result = ProgressiveResult::new("basic-record", "42");
        result.record_missing(["tax_history", "sale_history"]);
        result.merge(record(&[("tax_history", json!([]))]), StrategyKind::Scraping, false);
        assert_eq!(result.missing_fields, vec!["sale_history".to_string()]);
    }
}
