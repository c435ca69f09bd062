#![forbid(unsafe_code)]

//! Transform trace records and the bounded FIFO ledger that keeps them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::mode::RuntimeMode;

static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique, monotonically increasing operation id.
#[must_use]
pub fn next_operation_id() -> String {
    let next = OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("fxl-op-{next:016x}")
}

/// Final status of a traced transform execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TraceOutcome {
    Completed,
    Failed { message: String },
}

impl TraceOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Complete record of one transform execution, for audit and replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformTrace {
    pub operation_id: String,
    pub kind: String,
    pub direction: String,
    pub in_place: bool,
    pub full_extents: Vec<usize>,
    pub packed_extents: Vec<usize>,
    pub backend: String,
    pub staged_bytes: usize,
    pub plan_cache_hit: bool,
    pub mode: RuntimeMode,
    pub timing_ns: u128,
    pub outcome: TraceOutcome,
}

impl TransformTrace {
    /// Single-line JSON rendering used for JSONL audit logs.
    #[must_use]
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(
                "{{\"operation_id\":\"{}\",\"serialize_error\":\"{err}\"}}",
                self.operation_id
            )
        })
    }
}

/// Bounded FIFO buffer of transform traces.
///
/// Capacity is clamped to at least one entry. When full, the oldest entry is
/// evicted before a new one is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceLedger {
    capacity: usize,
    entries: VecDeque<TransformTrace>,
}

impl TraceLedger {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Append an entry, evicting the oldest if at capacity.
    pub fn record(&mut self, entry: TransformTrace) {
        if self.entries.len() == self.capacity {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recently recorded entry.
    #[must_use]
    pub fn latest(&self) -> Option<&TransformTrace> {
        self.entries.back()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransformTrace> {
        self.entries.iter()
    }

    /// Remove and return every recorded entry, oldest first.
    pub fn drain(&mut self) -> Vec<TransformTrace> {
        self.entries.drain(..).collect()
    }

    /// JSONL rendering of the ledger, oldest first.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        self.entries
            .iter()
            .map(TransformTrace::to_json_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
