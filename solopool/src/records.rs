//! Persisted share and block records.
//!
//! One JSON object per line, appended to a single file. Persistence is
//! best-effort operator tooling: a write failure is logged and the share
//! pipeline carries on. Consumers (payout audits, dashboards) parse the
//! file offline.

use std::path::Path;

use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::tracing::prelude::*;

/// One accepted share.
#[derive(Debug, Clone, Serialize)]
pub struct ShareRecord {
    pub ts: u64,
    pub worker: String,
    pub address: String,
    pub difficulty: f64,
    pub block_found: bool,
}

/// One found block.
#[derive(Debug, Clone, Serialize)]
pub struct BlockRecord {
    pub ts: u64,
    pub height: u64,
    pub hash: String,
    pub finder_address: String,
    pub worker: String,
    pub reward: u64,
}

/// Append-only JSON-lines writer; a no-op when no path is configured.
#[derive(Debug, Default)]
pub struct RecordWriter {
    file: Option<Mutex<File>>,
}

impl RecordWriter {
    /// A writer that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open (creating if needed) the record file for appending.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    pub async fn share(&self, record: &ShareRecord) {
        self.append("share", record).await;
    }

    pub async fn block(&self, record: &BlockRecord) {
        self.append("block", record).await;
    }

    async fn append<T: Serialize>(&self, kind: &str, record: &T) {
        let Some(file) = &self.file else { return };

        let mut line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(kind, error = %e, "failed to encode record");
                return;
            }
        };
        line.push('\n');

        let mut file = file.lock().await;
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!(kind, error = %e, "failed to append record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_writer_is_silent() {
        let writer = RecordWriter::disabled();
        writer
            .share(&ShareRecord {
                ts: 0,
                worker: "w".into(),
                address: "a".into(),
                difficulty: 1.0,
                block_found: false,
            })
            .await;
    }

    #[tokio::test]
    async fn records_append_as_json_lines() {
        let dir = std::env::temp_dir().join(format!("solopool-records-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("records.jsonl");

        let writer = RecordWriter::open(&path).await.unwrap();
        writer
            .share(&ShareRecord {
                ts: 1,
                worker: "w".into(),
                address: "a".into(),
                difficulty: 1000.0,
                block_found: false,
            })
            .await;
        writer
            .block(&BlockRecord {
                ts: 2,
                height: 100,
                hash: "00".repeat(32),
                finder_address: "a".into(),
                worker: "w".into(),
                reward: 5_000_000_000,
            })
            .await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let share: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(share["difficulty"], 1000.0);
        assert_eq!(share["block_found"], false);

        let block: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(block["height"], 100);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
