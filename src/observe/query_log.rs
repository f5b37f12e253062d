//! Query Instrumentation
//!
//! Classifies and times every read, and owns the result cache.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::record::Row;

use super::cache::{CacheKey, ResultCache};
use super::now_millis;

/// How a read was served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    /// Answered from the result cache without touching disk
    CacheHit,
    /// Candidate rows located through an index
    IndexHit,
    /// Every row examined
    FullScan,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryKind::CacheHit => "cache-hit",
            QueryKind::IndexHit => "index-hit",
            QueryKind::FullScan => "full-scan",
        })
    }
}

/// One immutable query record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    /// Completion time (unix millis)
    pub timestamp: u64,
    pub table: String,
    pub elapsed: Duration,
    pub kind: QueryKind,
}

/// Aggregated query statistics.
///
/// The three rates sum to 1.0 once at least one query was recorded
/// (all are 0.0 before that).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStats {
    pub total_queries: u64,
    pub avg_time: Duration,
    pub cache_hit_rate: f64,
    pub index_hit_rate: f64,
    pub full_scan_rate: f64,
}

impl QueryStats {
    pub fn avg_time_ms(&self) -> f64 {
        self.avg_time.as_secs_f64() * 1000.0
    }
}

#[derive(Default)]
struct QueryInner {
    entries: VecDeque<QueryLogEntry>,
    total: u64,
    total_elapsed: Duration,
    cache_hits: u64,
    index_hits: u64,
    full_scans: u64,
}

/// Process-shareable query observer
pub struct QueryLog {
    inner: Mutex<QueryInner>,
    capacity: usize,
    cache: Arc<ResultCache>,
}

impl QueryLog {
    pub const DEFAULT_CAPACITY: usize = 10_000;
    pub const DEFAULT_CACHE_CAPACITY: usize = 256;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY, Self::DEFAULT_CACHE_CAPACITY)
    }

    /// `capacity` bounds retained entries; `cache_capacity` bounds cached results
    pub fn with_capacity(capacity: usize, cache_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueryInner::default()),
            capacity: capacity.max(1),
            cache: Arc::new(ResultCache::new(cache_capacity)),
        }
    }

    pub fn record(&self, table: &str, elapsed: Duration, kind: QueryKind) {
        tracing::trace!(table, ?elapsed, %kind, "query");

        let mut inner = self.inner.lock();
        inner.total += 1;
        inner.total_elapsed += elapsed;
        match kind {
            QueryKind::CacheHit => inner.cache_hits += 1,
            QueryKind::IndexHit => inner.index_hits += 1,
            QueryKind::FullScan => inner.full_scans += 1,
        }

        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(QueryLogEntry {
            timestamp: now_millis(),
            table: table.to_string(),
            elapsed,
            kind,
        });
    }

    /// Most recent `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<QueryLogEntry> {
        let inner = self.inner.lock();
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    pub fn get_stats(&self) -> QueryStats {
        let inner = self.inner.lock();
        if inner.total == 0 {
            return QueryStats::default();
        }
        let total = inner.total as f64;
        QueryStats {
            total_queries: inner.total,
            avg_time: Duration::from_nanos(
                (inner.total_elapsed.as_nanos() / u128::from(inner.total)) as u64,
            ),
            cache_hit_rate: inner.cache_hits as f64 / total,
            index_hit_rate: inner.index_hits as f64 / total,
            full_scan_rate: inner.full_scans as f64 / total,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset entries, statistics and the result cache
    pub fn clear(&self) {
        *self.inner.lock() = QueryInner::default();
        self.cache.clear();
    }

    // =========================================================================
    // Result cache
    // =========================================================================

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub(crate) fn cached(&self, key: &CacheKey) -> Option<Vec<Row>> {
        self.cache.get(key).map(|rows| rows.as_ref().clone())
    }

    pub(crate) fn store(&self, key: CacheKey, rows: Vec<Row>) {
        self.cache.insert(key, rows);
    }

    /// Forget cached results for a table after it changed; `data_path`
    /// is the table's cache identity (its data file path)
    pub(crate) fn invalidate(&self, data_path: &str) {
        let dropped = self.cache.invalidate_table(data_path);
        if dropped > 0 {
            tracing::trace!(data_path, dropped, "result cache invalidated");
        }
    }
}

impl Default for QueryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryLog")
            .field("entries", &self.len())
            .field("capacity", &self.capacity)
            .field("cached_results", &self.cache.len())
            .finish()
    }
}
