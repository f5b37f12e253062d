//! Query result cache
//!
//! Bounded map from (table, query shape, conditions) to a computed result.
//! Least recently used entries are evicted first; every mutation of a
//! table drops all of that table's entries.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::record::{Conditions, Predicate, Row};

/// Which read produced a cached result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryShape {
    /// `query`: every matching row
    Many,
    /// `query_one`: first matching row only
    One,
}

/// Cache key for one read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    table: String,
    shape: QueryShape,
    conditions: Vec<Predicate>,
}

impl CacheKey {
    /// `table` identifies the table uniquely within the process
    pub fn new(table: &str, shape: QueryShape, conditions: &Conditions) -> Self {
        Self {
            table: table.to_string(),
            shape,
            conditions: conditions.cache_key(),
        }
    }
}

struct CacheEntry {
    rows: Arc<Vec<Row>>,
    last_used: u64,
}

struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    tick: u64,
}

/// Bounded LRU result cache
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
            capacity,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<Row>>> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(Arc::clone(&entry.rows))
    }

    pub fn insert(&self, key: CacheKey, rows: Vec<Row>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if inner.entries.len() >= self.capacity && !inner.entries.contains_key(&key) {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                rows: Arc::new(rows),
                last_used: tick,
            },
        );
    }

    /// Drop every entry whose key was built with `table`; returns how many
    /// were removed
    pub fn invalidate_table(&self, table: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|k, _| k.table != table);
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}
