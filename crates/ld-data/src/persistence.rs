//! Record persistence boundary.
//!
//! The core only needs two operations: append a record and reload history
//! with the same schema guarantees as the in-memory table. The bundled
//! implementation writes one JSON record per line.

use async_trait::async_trait;
use ld_types::LdResult;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::table::Record;

/// Append-only record storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn append(&self, record: &Record) -> LdResult<()>;

    /// Reload all previously appended records, oldest first.
    async fn load_all(&self) -> LdResult<Vec<Record>>;
}

/// JSON-lines record store.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new<P: AsRef<Path>>(path: P) -> LdResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for JsonlStore {
    async fn append(&self, record: &Record) -> LdResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_all(&self) -> LdResult<Vec<Record>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let mut records = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        info!("Loaded {} records from {}", records.len(), self.path.display());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ld_types::DofValue;
    use std::collections::HashMap;

    fn sample_record(x: f64) -> Record {
        let mut inputs = HashMap::new();
        inputs.insert("x".to_string(), DofValue::Float(x));
        let mut outcomes = HashMap::new();
        outcomes.insert("f".to_string(), Some(x * x));
        Record::new(inputs, outcomes)
    }

    #[tokio::test]
    async fn append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("history.jsonl")).unwrap();

        store.append(&sample_record(1.0)).await.unwrap();
        store.append(&sample_record(2.0)).await.unwrap();

        let records = store.load_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].inputs["x"], DofValue::Float(1.0));
        assert_eq!(records[1].outcomes["f"], Some(4.0));
    }

    #[tokio::test]
    async fn load_from_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("absent.jsonl")).unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
