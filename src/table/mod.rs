//! Table Module
//!
//! Shared handle over one table.
//!
//! ## Concurrency Model: Single-Writer / Multiple-Reader
//!
//! - **Mutations** and open transactions hold `write_lock` (bounded wait,
//!   `LockContention` on expiry), then take the core write guard only for
//!   the duration of the change
//! - **Reads** take the core read guard; they run concurrently with each
//!   other and with an open transaction, and wait only while a mutation or
//!   commit is being applied
//!
//! Result cache entries are stored under the core read guard and dropped
//! under the core write guard, so a cached result can never outlive the
//! data it was computed from.
//!
//! Calling a mutating method on a table while the same thread holds an
//! open [`Transaction`] on it waits out the lock timeout and fails with
//! `LockContention`; use the transaction handle instead.

mod stats;
mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::config::TableOptions;
use crate::error::Result;
use crate::observe::{CacheKey, Observers, Operation, QueryKind, QueryShape};
use crate::record::{Conditions, Record, Row};
use crate::txn::Transaction;
use crate::TsvError;

pub use stats::TableStats;
pub use store::RowIter;
pub(crate) use store::{CoreSettings, TableCore, TablePaths};

pub(crate) struct TableShared {
    pub(crate) name: String,
    /// Identity in the shared result cache (data file path)
    pub(crate) cache_key: String,
    pub(crate) core: RwLock<TableCore>,
    /// Serializes mutations and transactions
    pub(crate) write_lock: Mutex<()>,
    pub(crate) lock_timeout: Duration,
    audit: AtomicBool,
    audit_reads: AtomicBool,
    pub(crate) observers: Observers,
}

impl Drop for TableShared {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if core.has_pending_writes() {
            if let Err(e) = core.flush() {
                tracing::warn!(table = %self.name, error = %e, "failed to persist index on close");
            }
        }
    }
}

/// Cloneable handle to an open table
#[derive(Clone)]
pub struct Table {
    pub(crate) shared: Arc<TableShared>,
}

impl Table {
    pub(crate) fn new(
        core: TableCore,
        options: TableOptions,
        observers: Observers,
        lock_timeout: Duration,
    ) -> Self {
        let name = core.name().to_string();
        let cache_key = core.paths().data.to_string_lossy().into_owned();
        Self {
            shared: Arc::new(TableShared {
                name,
                cache_key,
                core: RwLock::new(core),
                write_lock: Mutex::new(()),
                lock_timeout,
                audit: AtomicBool::new(options.audit),
                audit_reads: AtomicBool::new(options.audit && options.audit_reads),
                observers,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Declared columns, in file order
    pub fn columns(&self) -> Vec<String> {
        self.shared.core.read().columns().to_vec()
    }

    /// Enable or disable auditing for this handle and its clones
    pub fn set_audit(&self, audit: bool, audit_reads: bool) {
        self.shared.audit.store(audit, Ordering::Relaxed);
        self.shared
            .audit_reads
            .store(audit && audit_reads, Ordering::Relaxed);
    }

    /// True once the table's artifacts were removed
    pub fn is_dropped(&self) -> bool {
        self.shared.core.read().ensure_live().is_err()
    }

    pub fn observers(&self) -> &Observers {
        &self.shared.observers
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Append one row.
    ///
    /// Keys that are not columns are ignored; missing columns are stored as
    /// empty strings.
    pub fn insert(&self, record: &Record) -> Result<()> {
        self.mutate(Operation::Insert, |core| {
            let row = core.project(record)?;
            core.insert_rows(vec![row]).map(|_| ())
        })
    }

    /// Append many rows in one buffered write; returns how many were inserted
    pub fn insert_many(&self, records: &[Record]) -> Result<usize> {
        self.mutate(Operation::InsertMany, |core| {
            let rows = records
                .iter()
                .map(|r| core.project(r))
                .collect::<Result<Vec<_>>>()?;
            core.insert_rows(rows)
        })
    }

    /// Apply `changes` to every row matching `conditions`; returns the
    /// number of matching rows
    pub fn update(&self, conditions: &Conditions, changes: &Record) -> Result<usize> {
        self.mutate(Operation::Update, |core| core.update(conditions, changes))
    }

    /// Remove every row matching `conditions`; returns how many were removed.
    ///
    /// Later rows move down to keep row offsets dense.
    pub fn delete(&self, conditions: &Conditions) -> Result<usize> {
        self.mutate(Operation::Delete, |core| core.delete(conditions))
    }

    /// Build an index on `column`. Returns false if it already existed.
    pub fn create_index(&self, column: &str) -> Result<bool> {
        self.mutate(Operation::CreateIndex, |core| core.create_index(column))
    }

    /// Delete the table's artifacts; every handle fails with
    /// `TableDropped` afterwards
    pub fn drop_table(&self) -> Result<()> {
        let outcome = self.mutate(Operation::Drop, TableCore::remove_files);
        if outcome.is_ok() {
            tracing::info!(table = %self.shared.name, "table dropped");
        }
        outcome
    }

    /// Write the index artifact if mutations are outstanding
    pub fn flush(&self) -> Result<()> {
        let _guard = self.lock_writer()?;
        self.shared.core.write().flush()
    }

    /// Open a transaction over a private working copy.
    ///
    /// Holds the table's write lock until committed, aborted or dropped.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        let guard = self.lock_writer()?;
        let working = self.shared.core.read().fork()?;
        tracing::debug!(table = %self.shared.name, "transaction opened");
        Ok(Transaction::new(self, guard, working))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Every row matching all `conditions`, in row order
    pub fn query(&self, conditions: &Conditions) -> Result<Vec<Row>> {
        self.select(Operation::Query, QueryShape::Many, conditions)
    }

    /// First matching row in row order
    pub fn query_one(&self, conditions: &Conditions) -> Result<Option<Row>> {
        self.select(Operation::QueryOne, QueryShape::One, conditions)
            .map(|rows| rows.into_iter().next())
    }

    /// Number of matching rows
    pub fn count(&self, conditions: &Conditions) -> Result<usize> {
        let start = Instant::now();
        let outcome = self.read(|core| core.count(conditions)).map(|(n, path)| {
            if let Some(kind) = path.kind() {
                self.shared
                    .observers
                    .queries
                    .record(&self.shared.name, start.elapsed(), kind);
            }
            n
        });
        self.audit_read(Operation::Count, &outcome);
        outcome
    }

    /// Stream every row in file order.
    ///
    /// The iterator covers the rows present when it was created; call again
    /// to restart.
    pub fn all(&self) -> Result<RowIter> {
        self.shared.core.read().iter()
    }

    pub fn stats(&self) -> Result<TableStats> {
        let core = self.shared.core.read();
        core.ensure_live()?;
        Ok(core.stats())
    }

    /// Distinct values of `column`, sorted
    pub fn distinct(&self, column: &str) -> Result<Vec<String>> {
        self.read(|core| core.distinct(column))
    }

    /// Row count per value of `column`
    pub fn group_count(&self, column: &str) -> Result<BTreeMap<String, usize>> {
        self.read(|core| core.group_count(column))
    }

    /// Numeric sum of `sum_column` per value of `group_column`
    pub fn group_sum(&self, group_column: &str, sum_column: &str) -> Result<BTreeMap<String, f64>> {
        self.read(|core| core.group_sum(group_column, sum_column))
    }

    fn select(&self, operation: Operation, shape: QueryShape, conditions: &Conditions) -> Result<Vec<Row>> {
        let start = Instant::now();
        let queries = &self.shared.observers.queries;
        let key = CacheKey::new(&self.shared.cache_key, shape, conditions);
        let limit = match shape {
            QueryShape::Many => None,
            QueryShape::One => Some(1),
        };

        let outcome = self
            .read(|core| {
                core.ensure_live()?;
                if let Some(rows) = queries.cached(&key) {
                    return Ok((rows, QueryKind::CacheHit));
                }
                let (rows, path) = core.select(conditions, limit)?;
                queries.store(key.clone(), rows.clone());
                Ok((rows, path.kind().unwrap_or(QueryKind::FullScan)))
            })
            .map(|(rows, kind)| {
                queries.record(&self.shared.name, start.elapsed(), kind);
                rows
            });

        self.audit_read(operation, &outcome);
        outcome
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Acquire the table's write lock within the configured timeout
    pub(crate) fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.shared
            .write_lock
            .try_lock_for(self.shared.lock_timeout)
            .ok_or_else(|| {
                tracing::debug!(table = %self.shared.name, "write lock timed out");
                TsvError::LockContention {
                    table: self.shared.name.clone(),
                    waited_ms: self.shared.lock_timeout.as_millis() as u64,
                }
            })
    }

    /// Run a mutation under the write lock, invalidate cached results and
    /// audit the outcome
    pub(crate) fn mutate<T, F>(&self, operation: Operation, f: F) -> Result<T>
    where
        F: FnMut(&mut TableCore) -> Result<T>,
    {
        let guard = match self.lock_writer() {
            Ok(guard) => guard,
            Err(e) => {
                let outcome = Err(e);
                self.audit(operation, &outcome);
                return outcome;
            }
        };

        let outcome = {
            let mut core = self.shared.core.write();
            let outcome = recovering(&mut *core, f);
            // Also on failure: a rewrite may have landed before the error
            self.invalidate();
            outcome
        };

        self.audit(operation, &outcome);
        drop(guard);
        outcome
    }

    /// Run a read; an index found inconsistent is rebuilt and the read retried
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: Fn(&TableCore) -> Result<T>,
    {
        {
            let core = self.shared.core.read();
            match f(&*core) {
                Err(TsvError::CorruptIndex(reason)) => {
                    tracing::warn!(table = %self.shared.name, %reason, "read hit inconsistent index");
                }
                other => return other,
            }
        }

        let mut core = self.shared.core.write();
        core.recover_index()?;
        self.invalidate();
        f(&*core)
    }

    pub(crate) fn invalidate(&self) {
        self.shared.observers.queries.invalidate(&self.shared.cache_key);
    }

    pub(crate) fn audit<T>(&self, operation: Operation, outcome: &Result<T>) {
        if self.shared.audit.load(Ordering::Relaxed) {
            self.shared
                .observers
                .audit
                .record(&self.shared.name, operation, outcome);
        }
    }

    pub(crate) fn audit_read<T>(&self, operation: Operation, outcome: &Result<T>) {
        if self.shared.audit_reads.load(Ordering::Relaxed) {
            self.audit(operation, outcome);
        }
    }
}

/// Run `f`; on an index inconsistency rebuild the index and retry once
pub(crate) fn recovering<T, F>(core: &mut TableCore, mut f: F) -> Result<T>
where
    F: FnMut(&mut TableCore) -> Result<T>,
{
    match f(core) {
        Err(TsvError::CorruptIndex(reason)) => {
            tracing::warn!(table = %core.name(), %reason, "mutation hit inconsistent index");
            core.recover_index()?;
            f(core)
        }
        other => other,
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.shared.name)
            .field("audit", &self.shared.audit.load(Ordering::Relaxed))
            .finish()
    }
}
