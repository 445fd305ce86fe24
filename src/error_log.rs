use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

/// Which task reported the failure.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    Feed,
    Trader,
    Monitor,
    Ui,
}

#[derive(Debug, Serialize)]
struct ErrorRecord<'a> {
    timestamp_ms: i64,
    source: ErrorSource,
    message: &'a str,
}

/// Append-only JSONL record of non-fatal failures. The dashboard keeps
/// running on stale data; this file is where the outages went.
#[derive(Clone, Debug)]
pub struct ErrorLogStore {
    path: PathBuf,
}

impl ErrorLogStore {
    pub fn new(path: PathBuf) -> Self {
        ErrorLogStore { path }
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("error_logs.jsonl")
    }

    pub fn append_message(&self, source: ErrorSource, message: impl AsRef<str>) -> Result<()> {
        let record = ErrorRecord {
            timestamp_ms: Utc::now().timestamp_millis(),
            source,
            message: message.as_ref(),
        };
        let mut line = serde_json::to_string(&record).context("encoding error record")?;
        line.push('\n');
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(line.as_bytes())?;
        Ok(())
    }
}
