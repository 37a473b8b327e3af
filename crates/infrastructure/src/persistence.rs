use std::path::{Path, PathBuf};

use async_trait::async_trait;
use collector_core::config::{PersistenceConfig, PersistenceKind};
use collector_core::models::ProgressiveResult;
use collector_core::traits::PersistenceSink;
use collector_core::{CollectorError, CollectorResult};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Discards every record
#[derive(Debug, Default, Clone)]
pub struct NoopPersistenceSink;

#[async_trait]
impl PersistenceSink for NoopPersistenceSink {
    async fn save(&self, _record: &ProgressiveResult) -> CollectorResult<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Appends one JSON line per completed record
#[derive(Debug)]
pub struct JsonFilePersistenceSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFilePersistenceSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceSink for JsonFilePersistenceSink {
    async fn save(&self, record: &ProgressiveResult) -> CollectorResult<bool> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CollectorError::Internal(format!("open {}: {e}", self.path.display())))?;
        file.write_all(&line)
            .await
            .map_err(|e| CollectorError::Internal(format!("write {}: {e}", self.path.display())))?;
        file.flush()
            .await
            .map_err(|e| CollectorError::Internal(format!("flush {}: {e}", self.path.display())))?;

        debug!(identifier = %record.identifier, path = %self.path.display(), "Persisted record");
        Ok(true)
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

pub fn sink_from_config(config: &PersistenceConfig) -> Arc<dyn PersistenceSink> {
    match (config.kind, config.path.as_deref()) {
        (PersistenceKind::JsonFile, Some(path)) => Arc::new(JsonFilePersistenceSink::new(path)),
        _ => Arc::new(NoopPersistenceSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector_core::models::JobStage;

    #[tokio::test]
    async fn test_json_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let sink = JsonFilePersistenceSink::new(&path);

        for id in ["1", "2"] {
            let mut record = ProgressiveResult::new("basic-record", id);
            record.seal(JobStage::Done, 0.2);
            assert!(sink.save(&record).await.unwrap());
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: ProgressiveResult = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.identifier, "1");
    }

    #[tokio::test]
    async fn test_unwritable_path_is_error() {
        let sink = JsonFilePersistenceSink::new("/nonexistent-dir/records.jsonl");
        let record = ProgressiveResult::new("basic-record", "1");
        assert!(sink.save(&record).await.is_err());
    }

    #[test]
    fn test_sink_from_config() {
        let sink = sink_from_config(&PersistenceConfig::default());
        assert_eq!(sink.name(), "noop");
        let sink = sink_from_config(&PersistenceConfig {
            kind: PersistenceKind::JsonFile,
            path: Some("out.jsonl".to_string()),
        });
        assert_eq!(sink.name(), "json_file");
    }
}
