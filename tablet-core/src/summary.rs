//! Per-table operation counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Snapshot of what a table has done since it was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    pub errors: u64,
    pub creations: u64,
    pub reads: u64,
    pub updates: u64,
    pub deletions: u64,
    /// Backend-specific details (file path, saved entries, ...), shown only
    /// in verbose reports.
    pub details: BTreeMap<String, String>,
}

impl TableSummary {
    /// Render the non-zero counters, plus details when `verbose`.
    pub fn lines(&self, verbose: bool) -> Vec<String> {
        let counters = [
            ("ERRORS", self.errors),
            ("CREATIONS", self.creations),
            ("READS", self.reads),
            ("UPDATES", self.updates),
            ("DELETIONS", self.deletions),
        ];
        let mut lines: Vec<String> = counters
            .iter()
            .filter(|(_, value)| *value != 0)
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        if verbose {
            lines.extend(
                self.details
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key, value)),
            );
        }
        lines
    }
}

/// Live counters shared between a table and the catalog that reports on it.
#[derive(Debug, Default)]
pub struct TableCounters {
    errors: AtomicU64,
    creations: AtomicU64,
    reads: AtomicU64,
    updates: AtomicU64,
    deletions: AtomicU64,
    details: Mutex<BTreeMap<String, String>>,
}

impl TableCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_creation(&self) {
        self.creations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletion(&self) {
        self.deletions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_detail(&self, key: impl Into<String>, value: impl Into<String>) {
        self.details
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn snapshot(&self) -> TableSummary {
        TableSummary {
            errors: self.errors.load(Ordering::Relaxed),
            creations: self.creations.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
            details: self
                .details
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}
