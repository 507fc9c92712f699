// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded record of recent tool calls.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of calls kept.
pub const HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub timestamp: DateTime<Utc>,
    pub req_id: String,
    pub server: String,
    pub tool: String,
    pub parameters: Value,
    pub timeout_ms: Option<u64>,
    pub success: bool,
    pub error: Option<String>,
}

/// Ring buffer of the most recent calls, oldest first.
#[derive(Debug)]
pub struct ToolHistory {
    entries: Mutex<VecDeque<ToolCallRecord>>,
    capacity: usize,
}

impl Default for ToolHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl ToolHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, VecDeque<ToolCallRecord>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, record: ToolCallRecord) {
        let mut entries = self.entries();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    pub fn snapshot(&self) -> Vec<ToolCallRecord> {
        self.entries().iter().cloned().collect()
    }

    /// Servers by most recent use, without repeats.
    pub fn recent_servers(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for record in self.entries().iter().rev() {
            if !seen.contains(&record.server) {
                seen.push(record.server.clone());
            }
        }
        seen
    }
}
