//! Append-only destinations for interaction records
//!
//! Every sink writes a record as one atomic unit: a single line for
//! [`JsonlFileSink`], a single renamed file for [`DirectorySink`]. Readers
//! never observe a partially written record.

use crate::interaction::record::InteractionRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Failure to durably persist a record. Never surfaced to the client.
#[derive(Error, Debug)]
pub enum LogWriteError {
    #[error("Failed to serialize interaction record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write interaction log at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Interaction log writer is not running")]
    WriterStopped,
}

impl LogWriteError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Destination for fully resolved interaction records
#[async_trait]
pub trait InteractionSink: Send + Sync {
    /// Append one record as a single atomic unit
    async fn append(&self, record: &InteractionRecord) -> Result<(), LogWriteError>;
}

/// Appends one JSON object per line to a single file
pub struct JsonlFileSink {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl JsonlFileSink {
    /// Open (or create) the log file, creating parent directories as needed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LogWriteError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| LogWriteError::io(parent, e))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| LogWriteError::io(&path, e))?;

        info!(path = %path.display(), "Interaction log file opened");

        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }
}

#[async_trait]
impl InteractionSink for JsonlFileSink {
    async fn append(&self, record: &InteractionRecord) -> Result<(), LogWriteError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| LogWriteError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| LogWriteError::io(&self.path, e))
    }
}

/// Writes each record to its own `{id}.json` file inside a directory
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, LogWriteError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| LogWriteError::io(&dir, e))?;

        info!(dir = %dir.display(), "Interaction log directory opened");

        Ok(Self { dir })
    }

    pub fn record_path(&self, record: &InteractionRecord) -> PathBuf {
        self.dir.join(format!("{}.json", record.id))
    }
}

#[async_trait]
impl InteractionSink for DirectorySink {
    async fn append(&self, record: &InteractionRecord) -> Result<(), LogWriteError> {
        let contents = serde_json::to_vec_pretty(record)?;
        let final_path = self.record_path(record);
        let temp_path = self.dir.join(format!(".{}.json.tmp", record.id));

        fs::write(&temp_path, &contents)
            .await
            .map_err(|e| LogWriteError::io(&temp_path, e))?;
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| LogWriteError::io(&final_path, e))
    }
}

/// Keeps records in memory, for embedding callers and tests
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<InteractionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<InteractionRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl InteractionSink for MemorySink {
    async fn append(&self, record: &InteractionRecord) -> Result<(), LogWriteError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Discards every record (interaction logging disabled)
pub struct NullSink;

#[async_trait]
impl InteractionSink for NullSink {
    async fn append(&self, _record: &InteractionRecord) -> Result<(), LogWriteError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::record::*;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn record(n: usize) -> InteractionRecord {
        InteractionRecord {
            id: InteractionId::new(),
            timestamp: Utc::now(),
            request: RequestSnapshot {
                method: "POST".to_string(),
                url: format!("http://upstream.test/items/{n}"),
                headers: HeaderSnapshot::new(),
                body: CapturedBody::Json(serde_json::json!({ "n": n })),
                client_addr: None,
            },
            resolution: Resolution::Response(ResponseSnapshot {
                status: 200,
                headers: HeaderSnapshot::new(),
                elapsed: Duration::from_millis(1),
                body: ResponseBody::Buffered {
                    content: CapturedBody::Text("x".repeat(n * 100)),
                },
            }),
            outcome: Outcome::Completed,
            duration: Duration::from_millis(n as u64),
            streaming: false,
        }
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/interactions.jsonl");
        let sink = JsonlFileSink::open(&path).await.unwrap();

        sink.append(&record(1)).await.unwrap();
        sink.append(&record(2)).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: InteractionRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.request.url, "http://upstream.test/items/2");
    }

    #[tokio::test]
    async fn test_jsonl_sink_concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interactions.jsonl");
        let sink = Arc::new(JsonlFileSink::open(&path).await.unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..40 {
            let sink = sink.clone();
            tasks.spawn(async move { sink.append(&record(n)).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let records: Vec<InteractionRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 40);
        for record in records {
            let n = record.request.body.json().unwrap()["n"].as_u64().unwrap() as usize;
            assert_eq!(record.request.url, format!("http://upstream.test/items/{n}"));
        }
    }

    #[tokio::test]
    async fn test_directory_sink_writes_one_file_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::open(dir.path().join("records")).await.unwrap();
        let record = record(3);

        sink.append(&record).await.unwrap();

        let contents = tokio::fs::read_to_string(sink.record_path(&record))
            .await
            .unwrap();
        let parsed: InteractionRecord = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed, record);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("records"))
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_open_fails_for_unwritable_location() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let result = JsonlFileSink::open(blocker.join("log.jsonl")).await;
        assert!(matches!(result, Err(LogWriteError::Io { .. })));
    }
}
