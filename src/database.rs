//! Database Module
//!
//! A data directory plus the registry of tables opened from it.
//!
//! ## Responsibilities
//! - Create/open tables and hand out shared [`Table`] handles
//! - Choose the storage backend and observer registry for every table
//! - List and drop tables
//!
//! One `Database` per directory per process. Two handles (or processes)
//! mutating the same directory are not coordinated and may corrupt it.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{Config, IndexSyncStrategy, TableOptions};
use crate::error::Result;
use crate::observe::Observers;
use crate::storage::{backend_for, validate_table_name, StorageBackend, DATA_EXT};
use crate::table::{CoreSettings, Table, TableCore, TablePaths};
use crate::TsvError;

/// Entry point: owns configuration and the open-table registry
pub struct Database {
    config: Config,
    observers: Observers,
    backend: Arc<dyn StorageBackend>,
    tables: Mutex<HashMap<String, Table>>,
}

impl Database {
    /// Open (or initialize) the data directory described by `config`
    pub fn open(config: Config) -> Result<Self> {
        if config.read_buffer_size == 0 || config.write_buffer_size == 0 {
            return Err(TsvError::Config("buffer sizes must be non-zero".to_string()));
        }
        if let IndexSyncStrategy::EveryNWrites { count: 0 } = config.index_sync_strategy {
            return Err(TsvError::Config("index sync count must be non-zero".to_string()));
        }

        fs::create_dir_all(&config.data_dir)?;
        let observers = config.observers();
        let backend = backend_for(config.backend);

        tracing::info!(
            path = %config.data_dir.display(),
            backend = backend.name(),
            "database opened"
        );

        Ok(Self {
            config,
            observers,
            backend,
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Open with default config rooted at `path`
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::builder().data_dir(path.as_ref()).build())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Observer registry shared by every table of this database
    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Create a table, or open it if it already exists with the same columns
    pub fn create_table<I, S>(&self, name: &str, columns: I) -> Result<Table>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.create_table_with(name, columns, TableOptions::default())
    }

    /// [`create_table`](Database::create_table) with per-table options.
    ///
    /// Options apply to the returned handle and every clone of it.
    pub fn create_table_with<I, S>(&self, name: &str, columns: I, options: TableOptions) -> Result<Table>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_table_name(name)?;
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();

        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(name).filter(|t| !t.is_dropped()) {
            if table.columns() != columns {
                return Err(TsvError::Schema(format!(
                    "table '{}' is open with columns {:?}",
                    name,
                    table.columns()
                )));
            }
            table.set_audit(options.audit, options.audit_reads);
            return Ok(table.clone());
        }

        let paths = TablePaths::new(&self.config.data_dir, name);
        let core = if paths.data.exists() {
            TableCore::open(name, Some(columns.as_slice()), paths, self.backend(), self.settings())?
        } else {
            TableCore::create(name, columns, paths, self.backend(), self.settings())?
        };

        let table = self.register(&mut tables, core, options);
        Ok(table)
    }

    /// Open an existing table, reading its columns from the data file
    pub fn open_table(&self, name: &str) -> Result<Table> {
        self.open_table_with(name, TableOptions::default())
    }

    pub fn open_table_with(&self, name: &str, options: TableOptions) -> Result<Table> {
        validate_table_name(name)?;

        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(name).filter(|t| !t.is_dropped()) {
            table.set_audit(options.audit, options.audit_reads);
            return Ok(table.clone());
        }

        let paths = TablePaths::new(&self.config.data_dir, name);
        let core = TableCore::open(name, None, paths, self.backend(), self.settings())?;
        Ok(self.register(&mut tables, core, options))
    }

    /// Names of all tables in the data directory, sorted
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.config.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DATA_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_table_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a table's artifacts and forget it
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let table = match self.tables.lock().remove(name) {
            Some(table) => table,
            None => {
                let paths = TablePaths::new(&self.config.data_dir, name);
                if !paths.data.exists() {
                    return Err(TsvError::TableNotFound(name.to_string()));
                }
                let core = TableCore::open(name, None, paths, self.backend(), self.settings())?;
                Table::new(core, TableOptions::default(), self.observers.clone(), self.lock_timeout())
            }
        };
        table.drop_table()
    }

    fn register(
        &self,
        tables: &mut HashMap<String, Table>,
        core: TableCore,
        options: TableOptions,
    ) -> Table {
        let table = Table::new(core, options, self.observers.clone(), self.lock_timeout());
        tables.insert(table.name().to_string(), table.clone());
        table
    }

    fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend)
    }

    fn settings(&self) -> CoreSettings {
        CoreSettings::from(&self.config)
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.config.lock_timeout_ms)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.config.data_dir)
            .field("backend", &self.backend.name())
            .field("open_tables", &self.tables.lock().len())
            .finish()
    }
}
