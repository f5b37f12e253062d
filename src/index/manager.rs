//! Index Manager
//!
//! Owns every index of one table and keeps them in step with row
//! mutations.
//!
//! ## Update discipline
//! - insert: append the new offset to its value's bucket
//! - update: move the offset between buckets only when the value changed
//! - delete: drop removed offsets and shift survivors down (dense offsets)

use std::collections::BTreeMap;

use crate::error::Result;
use crate::storage::StorageBackend;
use crate::TsvError;

use super::ColumnIndex;

/// Column that gets the implicit primary index
pub const PRIMARY_KEY: &str = "id";

/// Candidate rows produced from indexes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidates {
    /// Ascending row offsets
    pub offsets: Vec<usize>,
    /// Every predicate was answered by an index (no residual filter needed)
    pub covered: bool,
}

/// All indexes of a table, keyed by column name
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    indexes: BTreeMap<String, ColumnIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index column set for a schema: the primary key (when declared) plus `extra`
    pub fn declared(columns: &[String], extra: &[String]) -> Vec<String> {
        let mut declared: Vec<String> = Vec::new();
        if columns.iter().any(|c| c == PRIMARY_KEY) {
            declared.push(PRIMARY_KEY.to_string());
        }
        for column in extra {
            if columns.contains(column) && !declared.contains(column) {
                declared.push(column.clone());
            }
        }
        declared
    }

    /// Build every index in `declared` from the full row set
    pub fn build(
        columns: &[String],
        declared: &[String],
        rows: &[Vec<String>],
        backend: &dyn StorageBackend,
    ) -> Self {
        let mut manager = Self::new();
        for column in declared {
            manager.create(columns, column, rows, backend);
        }
        manager
    }

    /// Build from already-constructed indexes (snapshot load)
    pub(crate) fn from_indexes(indexes: Vec<ColumnIndex>) -> Self {
        Self {
            indexes: indexes
                .into_iter()
                .map(|i| (i.column().to_string(), i))
                .collect(),
        }
    }

    /// Create an index on `column`. Returns false if it already existed or
    /// the column is not part of the schema.
    pub fn create(
        &mut self,
        columns: &[String],
        column: &str,
        rows: &[Vec<String>],
        backend: &dyn StorageBackend,
    ) -> bool {
        if self.indexes.contains_key(column) {
            return false;
        }
        let Some(position) = columns.iter().position(|c| c == column) else {
            return false;
        };

        let buckets = backend.build_index(rows, position);
        self.indexes.insert(
            column.to_string(),
            ColumnIndex::from_buckets(column, position, buckets),
        );
        true
    }

    pub fn has(&self, column: &str) -> bool {
        self.indexes.contains_key(column)
    }

    pub fn get(&self, column: &str) -> Option<&ColumnIndex> {
        self.indexes.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Indexed column names, sorted
    pub fn columns(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub(crate) fn indexes(&self) -> impl Iterator<Item = &ColumnIndex> {
        self.indexes.values()
    }

    /// Total offsets held across all indexes
    pub fn entry_count(&self) -> usize {
        self.indexes.values().map(ColumnIndex::entry_count).sum()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub fn on_insert(&mut self, offset: usize, values: &[String]) {
        for index in self.indexes.values_mut() {
            if let Some(value) = values.get(index.position()) {
                index.insert(value, offset);
            }
        }
    }

    pub fn on_update(&mut self, offset: usize, old: &[String], new: &[String]) {
        for index in self.indexes.values_mut() {
            let pos = index.position();
            match (old.get(pos), new.get(pos)) {
                (Some(before), Some(after)) if before != after => {
                    index.remove(before, offset);
                    index.insert(after, offset);
                }
                _ => {}
            }
        }
    }

    /// `removed` must be ascending
    pub fn on_delete(&mut self, removed: &[usize]) {
        for index in self.indexes.values_mut() {
            index.shift_after_delete(removed);
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Intersect the buckets of every indexed predicate column.
    ///
    /// Returns `None` when no predicate column has an index.
    pub fn candidates(&self, predicates: &[(usize, String)]) -> Option<Candidates> {
        let mut buckets: Vec<&[usize]> = Vec::new();
        let mut covered = true;

        for (pos, value) in predicates {
            match self.indexes.values().find(|i| i.position() == *pos) {
                Some(index) => buckets.push(index.lookup(value)),
                None => covered = false,
            }
        }
        if buckets.is_empty() {
            return None;
        }

        // Smallest bucket first keeps the intersection cheap
        buckets.sort_by_key(|b| b.len());
        let mut offsets = buckets[0].to_vec();
        for bucket in &buckets[1..] {
            if offsets.is_empty() {
                break;
            }
            offsets = intersect_sorted(&offsets, bucket);
        }

        Some(Candidates { offsets, covered })
    }

    /// Structural check against the data's row count
    pub(crate) fn validate(&self, columns: &[String], row_count: usize) -> Result<()> {
        for index in self.indexes.values() {
            if columns.get(index.position()).map(String::as_str) != Some(index.column()) {
                return Err(TsvError::CorruptIndex(format!(
                    "index '{}' points at the wrong column",
                    index.column()
                )));
            }
            if !index.is_well_formed() {
                return Err(TsvError::CorruptIndex(format!(
                    "index '{}' has unsorted or empty buckets",
                    index.column()
                )));
            }
            if index.max_offset().is_some_and(|max| max >= row_count) {
                return Err(TsvError::CorruptIndex(format!(
                    "index '{}' references a row beyond {}",
                    index.column(),
                    row_count
                )));
            }
            if index.entry_count() != row_count {
                return Err(TsvError::CorruptIndex(format!(
                    "index '{}' holds {} entries for {} rows",
                    index.column(),
                    index.entry_count(),
                    row_count
                )));
            }
        }
        Ok(())
    }
}

/// Intersection of two ascending offset lists
fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}
