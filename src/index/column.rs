//! Single-column index
//!
//! value → ascending row offsets. Duplicate values share a bucket.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Index over one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnIndex {
    /// Indexed column name
    column: String,
    /// Field position of the column in the schema
    position: usize,
    /// value → ascending row offsets
    buckets: HashMap<String, Vec<usize>>,
}

impl ColumnIndex {
    pub fn new(column: impl Into<String>, position: usize) -> Self {
        Self {
            column: column.into(),
            position,
            buckets: HashMap::new(),
        }
    }

    /// Wrap buckets produced by a backend build (already ascending)
    pub fn from_buckets(
        column: impl Into<String>,
        position: usize,
        buckets: HashMap<String, Vec<usize>>,
    ) -> Self {
        Self {
            column: column.into(),
            position,
            buckets,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Offsets holding `value`, ascending
    pub fn lookup(&self, value: &str) -> &[usize] {
        self.buckets.get(value).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Add `offset` under `value`
    pub fn insert(&mut self, value: &str, offset: usize) {
        let bucket = self.buckets.entry(value.to_string()).or_default();
        // Appends are the common case: offsets grow monotonically on insert
        match bucket.last() {
            Some(&last) if last >= offset => {
                if let Err(at) = bucket.binary_search(&offset) {
                    bucket.insert(at, offset);
                }
            }
            _ => bucket.push(offset),
        }
    }

    /// Remove `offset` from `value`'s bucket; empty buckets are dropped
    pub fn remove(&mut self, value: &str, offset: usize) {
        if let Some(bucket) = self.buckets.get_mut(value) {
            if let Ok(at) = bucket.binary_search(&offset) {
                bucket.remove(at);
            }
            if bucket.is_empty() {
                self.buckets.remove(value);
            }
        }
    }

    /// Apply a physical delete of `removed` (ascending offsets).
    ///
    /// Removed offsets leave their buckets; every surviving offset is
    /// decremented by the number of removed offsets below it.
    pub fn shift_after_delete(&mut self, removed: &[usize]) {
        if removed.is_empty() {
            return;
        }
        self.buckets.retain(|_, bucket| {
            bucket.retain(|o| removed.binary_search(o).is_err());
            for offset in bucket.iter_mut() {
                let current = *offset;
                *offset = current - removed.partition_point(|&r| r < current);
            }
            !bucket.is_empty()
        });
    }

    /// Number of distinct values
    pub fn distinct_values(&self) -> usize {
        self.buckets.len()
    }

    /// Total offsets across all buckets
    pub fn entry_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Largest offset referenced, if any
    pub(crate) fn max_offset(&self) -> Option<usize> {
        self.buckets.values().filter_map(|b| b.last().copied()).max()
    }

    /// Buckets are non-empty and strictly ascending
    pub(crate) fn is_well_formed(&self) -> bool {
        self.buckets
            .values()
            .all(|b| !b.is_empty() && b.windows(2).all(|w| w[0] < w[1]))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.buckets.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}
