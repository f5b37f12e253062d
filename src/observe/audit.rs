//! Audit Log
//!
//! Append-only ledger of operations on audited tables, including failures.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::TsvError;

use super::now_millis;

/// Kind of audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operation {
    Insert,
    InsertMany,
    Update,
    Delete,
    Query,
    QueryOne,
    Count,
    CreateIndex,
    Commit,
    Rollback,
    Restore,
    Drop,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::InsertMany => "insert_many",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Query => "query",
            Operation::QueryOne => "query_one",
            Operation::Count => "count",
            Operation::CreateIndex => "create_index",
            Operation::Commit => "commit",
            Operation::Rollback => "rollback",
            Operation::Restore => "restore",
            Operation::Drop => "drop",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Completion time (unix millis)
    pub timestamp: u64,
    pub table: String,
    pub operation: Operation,
    pub success: bool,
    /// Error text for failed operations
    pub error: Option<String>,
}

/// Aggregated audit statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditStats {
    pub total_operations: u64,
    pub failed_operations: u64,
    /// failed / total (0.0 when nothing was recorded)
    pub error_rate: f64,
    pub by_operation: BTreeMap<Operation, u64>,
}

struct AuditInner {
    entries: VecDeque<AuditEntry>,
    total: u64,
    failed: u64,
    by_operation: BTreeMap<Operation, u64>,
}

/// Process-shareable audit ledger.
///
/// Appends are serialized by one mutex, so entries keep completion order
/// under concurrent callers. Retention is bounded by `capacity`; the
/// statistics cover every entry ever recorded.
pub struct AuditLog {
    inner: Mutex<AuditInner>,
    capacity: usize,
}

impl AuditLog {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(AuditInner {
                entries: VecDeque::new(),
                total: 0,
                failed: 0,
                by_operation: BTreeMap::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Record the outcome of `operation` on `table`
    pub fn record<T>(&self, table: &str, operation: Operation, outcome: &Result<T, TsvError>) {
        let error = outcome.as_ref().err().map(ToString::to_string);
        self.append(AuditEntry {
            timestamp: now_millis(),
            table: table.to_string(),
            operation,
            success: error.is_none(),
            error,
        });
    }

    /// Append a prepared entry
    pub fn append(&self, entry: AuditEntry) {
        if !entry.success {
            tracing::debug!(
                table = %entry.table,
                operation = %entry.operation,
                error = entry.error.as_deref().unwrap_or(""),
                "audited operation failed"
            );
        }

        let mut inner = self.inner.lock();
        inner.total += 1;
        if !entry.success {
            inner.failed += 1;
        }
        *inner.by_operation.entry(entry.operation).or_insert(0) += 1;

        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(entry);
    }

    /// Most recent `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    /// Retained entries for one table, oldest first
    pub fn for_table(&self, table: &str) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.table == table)
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> AuditStats {
        let inner = self.inner.lock();
        AuditStats {
            total_operations: inner.total,
            failed_operations: inner.failed,
            error_rate: if inner.total == 0 {
                0.0
            } else {
                inner.failed as f64 / inner.total as f64
            },
            by_operation: inner.by_operation.clone(),
        }
    }

    /// Retained entry count
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all but the newest `keep` entries
    pub fn trim(&self, keep: usize) {
        let mut inner = self.inner.lock();
        let excess = inner.entries.len().saturating_sub(keep);
        inner.entries.drain(..excess);
    }

    /// Reset entries and statistics
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total = 0;
        inner.failed = 0;
        inner.by_operation.clear();
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog")
            .field("entries", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
