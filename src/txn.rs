//! Transaction Module
//!
//! All-or-nothing batches of mutations against one table.
//!
//! ## State Machine
//! ```text
//!           ┌────────────┐   commit    ┌───────────┐
//!  open ──▶ │    Open    │ ──────────▶ │ Committing│ ──▶ Committed
//!           └────────────┘             └───────────┘
//!                 │ abort / error / drop
//!                 ▼
//!           ┌────────────┐
//!           │  Aborting  │ ──▶ Aborted
//!           └────────────┘
//! ```
//!
//! Opening copies the data file to `{table}.tsv.txn` and clones the
//! in-memory index; operations run against that copy only. Commit writes the
//! working index, renames the working data file over the live one (the
//! commit point), then renames the index. A crash before the data rename
//! leaves the old state; after it, the new data with an index that is either
//! current or detected as stale and rebuilt on the next open.

use std::fmt;
use std::time::Instant;

use parking_lot::MutexGuard;

use crate::error::Result;
use crate::observe::{Operation, QueryKind};
use crate::record::{Conditions, Record, Row};
use crate::table::{recovering, Table, TableCore};
use crate::TsvError;

/// Lifecycle of a [`Transaction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

/// Scoped handle over a table's private working copy.
///
/// Dropping an open transaction rolls it back.
pub struct Transaction<'a> {
    table: &'a Table,
    _guard: MutexGuard<'a, ()>,
    working: Option<TableCore>,
    state: TxnState,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(table: &'a Table, guard: MutexGuard<'a, ()>, working: TableCore) -> Self {
        Self {
            table,
            _guard: guard,
            working: Some(working),
            state: TxnState::Open,
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn table(&self) -> &Table {
        self.table
    }

    // =========================================================================
    // Operations on the working copy
    // =========================================================================

    pub fn insert(&mut self, record: &Record) -> Result<()> {
        self.mutate(Operation::Insert, |core| {
            let row = core.project(record)?;
            core.insert_rows(vec![row]).map(|_| ())
        })
    }

    pub fn insert_many(&mut self, records: &[Record]) -> Result<usize> {
        self.mutate(Operation::InsertMany, |core| {
            let rows = records
                .iter()
                .map(|r| core.project(r))
                .collect::<Result<Vec<_>>>()?;
            core.insert_rows(rows)
        })
    }

    pub fn update(&mut self, conditions: &Conditions, changes: &Record) -> Result<usize> {
        self.mutate(Operation::Update, |core| core.update(conditions, changes))
    }

    pub fn delete(&mut self, conditions: &Conditions) -> Result<usize> {
        self.mutate(Operation::Delete, |core| core.delete(conditions))
    }

    /// Matching rows as seen by this transaction
    pub fn query(&mut self, conditions: &Conditions) -> Result<Vec<Row>> {
        self.read(Operation::Query, |core| {
            core.select(conditions, None)
                .map(|(rows, path)| (rows, path.kind()))
        })
    }

    pub fn query_one(&mut self, conditions: &Conditions) -> Result<Option<Row>> {
        self.read(Operation::QueryOne, |core| {
            core.select(conditions, Some(1))
                .map(|(rows, path)| (rows.into_iter().next(), path.kind()))
        })
    }

    pub fn count(&mut self, conditions: &Conditions) -> Result<usize> {
        self.read(Operation::Count, |core| {
            core.count(conditions).map(|(n, path)| (n, path.kind()))
        })
    }

    fn working_mut(&mut self) -> Result<&mut TableCore> {
        match (self.state, self.working.as_mut()) {
            (TxnState::Open, Some(working)) => Ok(working),
            _ => Err(TsvError::TransactionClosed),
        }
    }

    /// Apply a mutation to the working copy; any failure rolls back
    fn mutate<T, F>(&mut self, operation: Operation, f: F) -> Result<T>
    where
        F: FnMut(&mut TableCore) -> Result<T>,
    {
        let outcome = self.working_mut().and_then(|working| recovering(working, f));
        if !matches!(outcome, Err(TsvError::TransactionClosed)) {
            self.table.audit(operation, &outcome);
        }
        self.settle(outcome)
    }

    fn read<T, F>(&mut self, operation: Operation, mut f: F) -> Result<T>
    where
        F: FnMut(&TableCore) -> Result<(T, Option<QueryKind>)>,
    {
        let start = Instant::now();
        let outcome = self
            .working_mut()
            .and_then(|working| recovering(working, |core| f(&*core)))
            .map(|(value, kind)| {
                if let Some(kind) = kind {
                    self.table
                        .shared
                        .observers
                        .queries
                        .record(self.table.name(), start.elapsed(), kind);
                }
                value
            });
        if !matches!(outcome, Err(TsvError::TransactionClosed)) {
            self.table.audit_read(operation, &outcome);
        }
        self.settle(outcome)
    }

    /// Roll back on error and wrap it
    fn settle<T>(&mut self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => Ok(value),
            Err(TsvError::TransactionClosed) => Err(TsvError::TransactionClosed),
            Err(e) => {
                tracing::debug!(table = %self.table.name(), error = %e, "transaction operation failed");
                self.rollback();
                Err(TsvError::aborted(e))
            }
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Atomically make the working copy the table's state
    pub fn commit(mut self) -> Result<()> {
        let working = match (self.state, self.working.take()) {
            (TxnState::Open, Some(working)) => working,
            _ => return Err(TsvError::TransactionClosed),
        };
        self.state = TxnState::Committing;

        let outcome = {
            let mut core = self.table.shared.core.write();
            let outcome = core.commit_from(working);
            if outcome.is_err() {
                core.paths().remove_leftovers();
            }
            self.table.invalidate();
            outcome
        };

        self.table.audit(Operation::Commit, &outcome);
        match outcome {
            Ok(()) => {
                self.state = TxnState::Committed;
                tracing::info!(table = %self.table.name(), "transaction committed");
                Ok(())
            }
            Err(e) => {
                self.state = TxnState::Aborted;
                tracing::warn!(table = %self.table.name(), error = %e, "commit failed, table unchanged");
                Err(TsvError::aborted(e))
            }
        }
    }

    /// Discard the working copy; the table is left untouched
    pub fn abort(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        let Some(working) = self.working.take() else {
            return;
        };
        self.state = TxnState::Aborting;
        working.discard();
        self.state = TxnState::Aborted;

        self.table.audit::<()>(Operation::Rollback, &Ok(()));
        tracing::debug!(table = %self.table.name(), "transaction rolled back");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxnState::Open {
            tracing::warn!(table = %self.table.name(), "transaction dropped while open, rolling back");
            self.rollback();
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("table", &self.table.name())
            .field("state", &self.state)
            .finish()
    }
}

impl Table {
    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`; otherwise rolls back and returns
    /// `TransactionAborted` wrapping the original error.
    pub fn run_in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut tx = self.transaction()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.abort();
                Err(TsvError::aborted(e))
            }
        }
    }
}
