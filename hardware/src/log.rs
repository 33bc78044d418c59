//! Bounded log of device operations, kept for audit.

use std::collections::VecDeque;

use keyguard_types::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Connect,
    Disconnect,
    Derive,
    Sign,
    Verify,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub device_id: String,
    pub kind: LogKind,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: Timestamp,
    /// Blake2b-256 of the request payload, hex. Payloads themselves are not kept.
    pub data_digest: String,
    pub signature: Option<String>,
}

/// Ring buffer of [`LogEntry`]; the oldest entry is dropped once `capacity`
/// is reached.
#[derive(Debug)]
pub struct DeviceLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    total: u64,
}

impl DeviceLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total: 0,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        self.total += 1;
    }

    /// Up to `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ever recorded, including those already evicted.
    pub fn total(&self) -> u64 {
        self.total
    }
}
