use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use crate::protocol::{TurnEntry, TurnKind};

const DEFAULT_TURN_LOG_CAPACITY: usize = 256;

/// Latest utterances and fillers of a session, for display. Oldest entries
/// are evicted once the log is full.
#[derive(Debug)]
pub struct TurnLog {
    entries: Mutex<VecDeque<TurnEntry>>,
    capacity: usize,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TURN_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn append(&self, kind: TurnKind, text: impl Into<String>) {
        let entry = TurnEntry {
            kind,
            text: text.into(),
            at: Utc::now(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Oldest first, at most `limit` of the latest entries.
    pub fn recent(&self, limit: usize) -> Vec<TurnEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let start = entries.len().saturating_sub(limit);
        entries.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for TurnLog {
    fn default() -> Self {
        Self::new()
    }
}
