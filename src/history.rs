use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

pub const HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_RECENT: usize = 10;

pub type SharedHistory = Arc<Mutex<HistoryLog>>;

/// A requested download, as submitted by the client.
#[derive(Debug, Clone, Default)]
pub struct NewHistoryEntry {
    pub url: String,
    pub format: Option<String>,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Unix milliseconds at record time, bumped when needed to stay increasing.
    pub id: i64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub timestamp: String,
}

/// Insertion-ordered log of recent downloads. Holds at most `capacity`
/// entries; the oldest are evicted first.
#[derive(Debug)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    last_id: i64,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            last_id: 0,
        }
    }

    pub fn shared() -> SharedHistory {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn record(&mut self, entry: NewHistoryEntry) -> HistoryEntry {
        self.record_at(entry, Utc::now())
    }

    fn record_at(&mut self, entry: NewHistoryEntry, now: DateTime<Utc>) -> HistoryEntry {
        let id = now.timestamp_millis().max(self.last_id + 1);
        self.last_id = id;

        let recorded = HistoryEntry {
            id,
            url: entry.url,
            format: entry.format,
            resolution: entry.resolution,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        self.entries.push_back(recorded.clone());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        recorded
    }

    /// The last `n` entries, most recent first.
    pub fn recent_reversed(&self, n: usize) -> Vec<HistoryEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
