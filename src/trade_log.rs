use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::command::TradeResponse;

const MAX_ENTRIES: usize = 512;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub ts_ms: i64,
    pub response: TradeResponse,
}

impl TradeLogEntry {
    pub fn record(response: TradeResponse) -> Self {
        TradeLogEntry {
            ts_ms: Utc::now().timestamp_millis(),
            response,
        }
    }
}

/// JSONL store for submitted orders, accepted and rejected alike. Bounded:
/// loading keeps only the newest entries, and the file is rewritten once the
/// line count outgrows twice the retained cap.
#[derive(Clone, Debug)]
pub struct TradeLogStore {
    path: PathBuf,
}

impl TradeLogStore {
    pub fn new(path: PathBuf) -> Self {
        TradeLogStore { path }
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("trade_logs.jsonl")
    }

    /// Newest entries, oldest first. Unreadable lines are dropped rather
    /// than failing the whole load.
    pub fn load(&self) -> Result<Vec<TradeLogEntry>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut entries: Vec<TradeLogEntry> = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        if entries.len() > MAX_ENTRIES {
            entries.drain(..entries.len() - MAX_ENTRIES);
        }
        Ok(entries)
    }

    pub fn append(&self, entry: &TradeLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(entry).context("encoding trade log entry")?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(line.as_bytes())?;
        self.compact_if_oversized()
    }

    fn compact_if_oversized(&self) -> Result<()> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if raw.lines().count() <= MAX_ENTRIES * 2 {
            return Ok(());
        }
        let entries = self.load()?;
        let mut compacted = String::new();
        for entry in &entries {
            compacted.push_str(&serde_json::to_string(entry)?);
            compacted.push('\n');
        }
        fs::write(&self.path, compacted)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::TradeSide;

    fn response(message: &str) -> TradeResponse {
        TradeResponse {
            asset: "BTC".to_string(),
            side: TradeSide::Buy,
            fiat_amount: 10_000.0,
            quantity: 0.0001,
            order_id: Some("order-1".to_string()),
            message: message.to_string(),
            success: true,
        }
    }

    fn temp_store(name: &str) -> TradeLogStore {
        let dir = std::env::temp_dir().join("kimp-term-trade-log-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::remove_file(&path).ok();
        TradeLogStore::new(path)
    }

    #[test]
    fn append_then_load_round_trips() {
        let store = temp_store("trades.jsonl");
        store.append(&TradeLogEntry::record(response("first"))).unwrap();
        store.append(&TradeLogEntry::record(response("second"))).unwrap();
        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].response.message, "first");
        assert_eq!(entries[1].response.message, "second");
        fs::remove_file(&store.path).ok();
    }

    #[test]
    fn load_skips_garbage_and_keeps_the_newest_tail() {
        let store = temp_store("trades-garbage.jsonl");
        fs::write(&store.path, "not json\n").unwrap();
        store.append(&TradeLogEntry::record(response("kept"))).unwrap();
        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].response.message, "kept");
        fs::remove_file(&store.path).ok();
    }

    #[test]
    fn oversized_files_are_compacted_to_the_cap() {
        let store = temp_store("trades-compact.jsonl");
        for i in 0..(MAX_ENTRIES * 2 + 1) {
            store
                .append(&TradeLogEntry::record(response(&format!("order {i}"))))
                .unwrap();
        }
        let raw = fs::read_to_string(&store.path).unwrap();
        assert!(raw.lines().count() <= MAX_ENTRIES * 2);
        let entries = store.load().unwrap();
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert_eq!(
            entries.last().unwrap().response.message,
            format!("order {}", MAX_ENTRIES * 2)
        );
        fs::remove_file(&store.path).ok();
    }
}
