//! Configuration for tsvdb
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::observe::Observers;

/// Main configuration for a tsvdb data directory
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all table files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── {table}.tsv      (data artifact: header + rows)
    ///     ├── {table}.idx      (persisted index, a rebuildable cache)
    ///     └── {table}.tsv.txn  (transaction working copy, transient)
    pub data_dir: PathBuf,

    /// fsync the data file after every mutation
    pub sync_writes: bool,

    /// Buffer size for batched writes (bytes)
    pub write_buffer_size: usize,

    /// Buffer size for streamed reads (bytes)
    pub read_buffer_size: usize,

    /// Which storage backend implementation tables use
    pub backend: BackendKind,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// How often the in-memory index is mirrored to the index artifact
    pub index_sync_strategy: IndexSyncStrategy,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// Max wait for a table's write lock before `LockContention` (milliseconds)
    pub lock_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Instrumentation Configuration
    // -------------------------------------------------------------------------
    /// Audit/query registry for tables opened with this config.
    /// `None` uses the process-wide default registry.
    pub observers: Option<Observers>,
}

/// Index persistence strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSyncStrategy {
    /// Rewrite the index artifact after every mutation (safest, slowest)
    EveryWrite,

    /// Rewrite the index artifact after N mutations; a stale artifact is
    /// detected on open and rebuilt from the data file
    EveryNWrites { count: usize },
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Sequential std-only implementation
    #[default]
    Reference,

    /// memchr line splitting + rayon data parallelism
    Parallel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sync_writes: false,
            write_buffer_size: 256 * 1024, // 256 KB
            read_buffer_size: 64 * 1024,   // 64 KB
            backend: BackendKind::Reference,
            index_sync_strategy: IndexSyncStrategy::EveryNWrites { count: 100 },
            lock_timeout_ms: 5000,
            observers: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Resolve the observer registry (injected or process-wide)
    pub fn observers(&self) -> Observers {
        self.observers
            .clone()
            .unwrap_or_else(|| crate::observe::global().clone())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all table files)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// fsync data after each mutation
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.config.sync_writes = enabled;
        self
    }

    /// Set the write buffer size (in bytes)
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Set the read buffer size (in bytes)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Select the storage backend
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the index sync strategy
    pub fn index_sync_strategy(mut self, strategy: IndexSyncStrategy) -> Self {
        self.config.index_sync_strategy = strategy;
        self
    }

    /// Set the lock acquisition timeout (in milliseconds)
    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    /// Inject an observer registry instead of the process-wide one
    pub fn observers(mut self, observers: Observers) -> Self {
        self.config.observers = Some(observers);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Per-table options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableOptions {
    /// Record mutating operations in the audit log
    pub audit: bool,

    /// Also record reads (requires `audit`)
    pub audit_reads: bool,
}

impl TableOptions {
    /// Options with auditing of mutations enabled
    pub fn audited() -> Self {
        Self {
            audit: true,
            audit_reads: false,
        }
    }
}
