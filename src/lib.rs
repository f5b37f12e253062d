//! # tsvdb
//!
//! An embedded record store over tab-separated text files with:
//! - Human-readable, diffable data files (one table per file)
//! - Primary (`id`) and secondary equality indexes, persisted as a cache
//! - All-or-nothing transactions over a copy-on-write working file
//! - Query classification (cache / index / scan) and an audit ledger
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Database                              │
//! │              (data dir + open-table registry)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    Table handle                              │
//! │      (write lock, result cache, query log, audit log)        │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │   Transaction   │── commit ─────▶│   Table store   │
//!   │ (working copy)  │                │  (rows + index) │
//!   └─────────────────┘                └────────┬────────┘
//!                                               │
//!                              ┌────────────────┴───────────┐
//!                              ▼                            ▼
//!                       ┌─────────────┐             ┌─────────────┐
//!                       │  {t}.tsv    │             │  {t}.idx    │
//!                       │ (text rows) │             │  (bincode)  │
//!                       └─────────────┘             └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use tsvdb::{Conditions, Database, Record};
//!
//! let db = Database::open_path("./data")?;
//! let users = db.create_table("users", ["id", "name"])?;
//! users.insert(&Record::from([("id", "1"), ("name", "A")]))?;
//!
//! let row = users.query_one(&Conditions::eq("id", "1"))?;
//! assert_eq!(row.unwrap().get("name"), Some("A"));
//! # Ok::<(), tsvdb::TsvError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod record;

pub mod storage;
pub mod index;
pub mod observe;
pub mod table;
pub mod txn;
pub mod backup;
pub mod database;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TsvError};
pub use config::{BackendKind, Config, ConfigBuilder, IndexSyncStrategy, TableOptions};
pub use record::{Conditions, Predicate, Record, Row};
pub use observe::{audit_log, query_log, AuditEntry, AuditLog, Observers, Operation, QueryKind, QueryLog};
pub use table::{RowIter, Table, TableStats};
pub use txn::{Transaction, TxnState};
pub use backup::BackupManifest;
pub use database::Database;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of tsvdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
