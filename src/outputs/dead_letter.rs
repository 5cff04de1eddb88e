//! Dead-letter file for articles the store would not accept.
//!
//! Records are appended as JSON lines, one file per UTC day:
//!
//! ```text
//! dead_letter_dir/
//! ├── 2025-05-06.jsonl
//! └── 2025-05-07.jsonl
//! ```
//!
//! Each line carries the failure time, the article URL, the store error and
//! the full record, so the file can be replayed once the store is back.

use crate::models::ArticleRecord;
use crate::utils::ensure_writable_dir;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::instrument;

#[derive(Debug, Serialize)]
struct DeadLetter<'a> {
    failed_at: DateTime<Utc>,
    url: &'a str,
    reason: &'a str,
    record: &'a ArticleRecord,
}

#[derive(Debug)]
pub struct DeadLetterSink {
    dir: PathBuf,
    // Serializes appends from concurrent workers.
    write_lock: Mutex<()>,
}

impl DeadLetterSink {
    pub async fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        ensure_writable_dir(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Append one record; returns the file it was written to.
    #[instrument(level = "debug", skip(self, record), fields(fingerprint = %record.fingerprint))]
    pub async fn write(&self, url: &str, record: &ArticleRecord, reason: &str) -> io::Result<PathBuf> {
        let failed_at = Utc::now();
        let mut line = serde_json::to_string(&DeadLetter {
            failed_at,
            url,
            reason,
            record,
        })
        .map_err(io::Error::other)?;
        line.push('\n');

        let path = self
            .dir
            .join(format!("{}.jsonl", failed_at.date_naive()));

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawArticle;

    #[tokio::test]
    async fn test_appends_json_lines() {
        let dir = std::env::temp_dir().join(format!("dead-letter-append-{}", std::process::id()));
        let sink = DeadLetterSink::new(&dir).await.unwrap();
        let record = ArticleRecord::from_raw(RawArticle {
            url: "https://a.test/n/1".to_string(),
            title: "Title".to_string(),
            publish_time: String::new(),
            content: "Hello world".to_string(),
            img: String::new(),
            category: "football".to_string(),
        });

        let first = sink.write("https://a.test/n/1", &record, "timeout").await.unwrap();
        let second = sink.write("https://a.test/n/1", &record, "timeout again").await.unwrap();
        assert_eq!(first, second);

        let contents = tokio::fs::read_to_string(&first).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["reason"], "timeout again");
        assert_eq!(parsed["record"]["fingerprint"], "3e25960a79dbc69b674cd4ec67a72c62");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
