//! The Retry Queue (spec.md §4.2): a single FIFO of operations that
//! failed against the Server, re-driven every 10 s until they succeed.
//! No backoff and no maximum size — both are open questions left
//! unresolved by design (spec.md §9).

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use datacat_common::{EventRecord, MetricRecord};
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum RetryOperation {
    CreateSession {
        local_id: String,
        product: String,
        version: String,
        machine_id: Option<String>,
        hostname: Option<String>,
    },
    State { session_id: String, patch: Value },
    Event { session_id: String, event: EventRecord },
    Metric { session_id: String, metric: MetricRecord },
    End { session_id: String },
}

#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub operation: RetryOperation,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RetryQueue {
    inner: Mutex<VecDeque<RetryEntry>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, operation: RetryOperation) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).push_back(RetryEntry {
            operation,
            enqueued_at: Utc::now(),
        });
    }

    /// Atomically swaps the queue contents out with an empty one, so the
    /// retry processor can iterate without holding the lock while it makes
    /// outbound calls.
    pub fn take_all(&self) -> Vec<RetryEntry> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *guard).into_iter().collect()
    }

    pub fn push_back_many(&self, entries: impl IntoIterator<Item = RetryEntry>) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for entry in entries {
            guard.push_back(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_drained_in_fifo_order() {
        let queue = RetryQueue::new();
        queue.push(RetryOperation::End { session_id: "a".into() });
        queue.push(RetryOperation::End { session_id: "b".into() });
        let drained = queue.take_all();
        assert_eq!(drained.len(), 2);
        match &drained[0].operation {
            RetryOperation::End { session_id } => assert_eq!(session_id, "a"),
            _ => panic!("wrong variant"),
        }
        assert_eq!(queue.len(), 0);
    }
}
