//! Table store
//!
//! Single-owner mechanics over one data/index artifact pair. Every
//! mutation takes `&mut self`; locking, instrumentation and audit live in
//! [`Table`](super::Table).
//!
//! ## In-memory state
//! - `positions[offset]`: byte position of the row at `offset`
//! - `fingerprint`: length + CRC32 of the data file as last written
//! - `indexes`: value → offsets for the primary and secondary columns
//!
//! All three are derived from the data file and rebuilt from it whenever
//! the persisted index artifact is missing, stale or unreadable.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, IndexSyncStrategy};
use crate::error::Result;
use crate::index::persist::{self, IndexSnapshot, SnapshotRef};
use crate::index::IndexManager;
use crate::observe::QueryKind;
use crate::record::{matches, Conditions, Record, Row};
use crate::storage::{
    self, encode_header, encoded_len, read_header, repair_torn_tail, validate_columns,
    validate_value, write_atomic, CrcWriter, DataFingerprint, PositionedReader, RowReader,
    StorageBackend,
    DATA_EXT, INDEX_EXT, TMP_SUFFIX, TXN_SUFFIX,
};
use crate::TsvError;

use super::stats::TableStats;

/// Rows parsed per batch during a full scan
const SCAN_CHUNK_ROWS: usize = 4096;

/// Artifact paths of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TablePaths {
    pub data: PathBuf,
    pub index: PathBuf,
}

impl TablePaths {
    pub(crate) fn new(dir: &Path, name: &str) -> Self {
        Self {
            data: dir.join(format!("{}.{}", name, DATA_EXT)),
            index: dir.join(format!("{}.{}", name, INDEX_EXT)),
        }
    }

    /// Transaction working copy next to the live artifacts
    pub(crate) fn working(&self) -> Self {
        Self {
            data: with_suffix(&self.data, TXN_SUFFIX),
            index: with_suffix(&self.index, TXN_SUFFIX),
        }
    }

    /// Remove files left behind by an interrupted transaction or atomic
    /// write; returns how many were removed
    pub(crate) fn remove_leftovers(&self) -> usize {
        let working = self.working();
        let candidates = [
            working.data.clone(),
            working.index.clone(),
            with_suffix(&self.data, TMP_SUFFIX),
            with_suffix(&self.index, TMP_SUFFIX),
            with_suffix(&working.data, TMP_SUFFIX),
            with_suffix(&working.index, TMP_SUFFIX),
        ];

        candidates
            .iter()
            .filter(|path| fs::remove_file(path).is_ok())
            .count()
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// How a read located its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessPath {
    /// Candidates came from one or more indexes
    Index,
    /// Every row was examined
    FullScan,
    /// Answered from in-memory metadata (row count)
    Metadata,
}

impl AccessPath {
    /// Query log classification; metadata answers are not logged
    pub(crate) fn kind(self) -> Option<QueryKind> {
        match self {
            AccessPath::Index => Some(QueryKind::IndexHit),
            AccessPath::FullScan => Some(QueryKind::FullScan),
            AccessPath::Metadata => None,
        }
    }
}

/// I/O settings taken from [`Config`]
#[derive(Debug, Clone, Copy)]
pub(crate) struct CoreSettings {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub sync_writes: bool,
    pub index_sync: IndexSyncStrategy,
}

impl From<&Config> for CoreSettings {
    fn from(config: &Config) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            write_buffer_size: config.write_buffer_size,
            sync_writes: config.sync_writes,
            index_sync: config.index_sync_strategy,
        }
    }
}

/// One table's on-disk state plus the indexes derived from it
#[derive(Debug)]
pub(crate) struct TableCore {
    name: String,
    columns: Arc<[String]>,
    paths: TablePaths,
    backend: Arc<dyn StorageBackend>,
    settings: CoreSettings,

    positions: Vec<u64>,
    fingerprint: DataFingerprint,
    indexes: IndexManager,

    /// Mutations since the index artifact was last written
    pending_writes: usize,
    dropped: bool,
}

impl TableCore {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create an empty table, replacing any artifacts under the same name
    pub(crate) fn create(
        name: &str,
        columns: Vec<String>,
        paths: TablePaths,
        backend: Arc<dyn StorageBackend>,
        settings: CoreSettings,
    ) -> Result<Self> {
        validate_columns(&columns)?;
        paths.remove_leftovers();

        let fingerprint = write_header(&paths.data, &columns, settings.write_buffer_size)?;
        let declared = IndexManager::declared(&columns, &[]);
        let indexes = IndexManager::build(&columns, &declared, &[], backend.as_ref());

        let mut core = Self {
            name: name.to_string(),
            columns: columns.into(),
            paths,
            backend,
            settings,
            positions: Vec::new(),
            fingerprint,
            indexes,
            pending_writes: 0,
            dropped: false,
        };
        core.persist_index()?;

        tracing::info!(table = %core.name, columns = core.columns.len(), "table created");
        Ok(core)
    }

    /// Open an existing table.
    ///
    /// Recovery on open:
    /// 1. Remove transaction working files and temp files
    /// 2. Truncate a torn last line left by an interrupted append
    /// 3. Load the index artifact, or rebuild it from the data file
    pub(crate) fn open(
        name: &str,
        expected: Option<&[String]>,
        paths: TablePaths,
        backend: Arc<dyn StorageBackend>,
        settings: CoreSettings,
    ) -> Result<Self> {
        if !paths.data.exists() {
            return Err(TsvError::TableNotFound(name.to_string()));
        }

        // Step 1: Leftovers from a crashed process
        let removed = paths.remove_leftovers();
        if removed > 0 {
            tracing::warn!(table = name, files = removed, "removed leftover working files");
        }

        // Step 2: Torn tail
        let truncated = repair_torn_tail(&paths.data)?;
        if truncated > 0 {
            tracing::warn!(table = name, bytes = truncated, "truncated torn row at end of data file");
        }

        let empty = fs::metadata(&paths.data)?.len() == 0;
        let columns = match (read_header(&paths.data), expected) {
            (Ok(columns), _) => columns,
            // Header itself was torn: nothing but the schema can be recovered
            (Err(_), Some(expected)) if empty => {
                tracing::warn!(table = name, "data file empty, rewriting header");
                write_header(&paths.data, expected, settings.write_buffer_size)?;
                expected.to_vec()
            }
            (Err(e), _) => return Err(e),
        };

        if let Some(expected) = expected {
            if columns != expected {
                return Err(TsvError::Schema(format!(
                    "table '{}' has columns {:?}, expected {:?}",
                    name, columns, expected
                )));
            }
        }
        validate_columns(&columns)?;

        let mut core = Self {
            name: name.to_string(),
            columns: columns.into(),
            paths,
            backend,
            settings,
            positions: Vec::new(),
            fingerprint: DataFingerprint::default(),
            indexes: IndexManager::new(),
            pending_writes: 0,
            dropped: false,
        };

        // Step 3: Index
        core.load_state()?;

        tracing::info!(table = %core.name, rows = core.row_count(), "table opened");
        Ok(core)
    }

    /// (Re)load positions and indexes for the current data file
    pub(crate) fn load_state(&mut self) -> Result<()> {
        let current = storage::fingerprint(&self.paths.data, self.settings.read_buffer_size)?;
        let mut declared = Vec::new();

        if self.paths.index.exists() {
            match persist::load(&self.paths.index) {
                Ok(snapshot) => {
                    declared = snapshot
                        .indexes
                        .iter()
                        .map(|i| i.column().to_string())
                        .collect();
                    match self.adopt(snapshot, current) {
                        Ok(()) => {
                            tracing::debug!(table = %self.name, rows = self.row_count(), "index loaded");
                            return Ok(());
                        }
                        Err(e) => {
                            tracing::warn!(table = %self.name, error = %e, "stale index, rebuilding")
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(table = %self.name, error = %e, "unreadable index, rebuilding")
                }
            }
        }

        self.rebuild(current, &declared)
    }

    fn adopt(&mut self, snapshot: IndexSnapshot, current: DataFingerprint) -> Result<()> {
        if snapshot.fingerprint != current {
            return Err(TsvError::CorruptIndex(
                "data file changed since index was written".to_string(),
            ));
        }
        if snapshot.columns[..] != self.columns[..] {
            return Err(TsvError::CorruptIndex("index schema mismatch".to_string()));
        }
        let ordered = snapshot
            .positions
            .windows(2)
            .all(|pair| pair[0] < pair[1]);
        let in_bounds = snapshot.positions.last().map_or(true, |&p| p < current.len);
        if !ordered || !in_bounds {
            return Err(TsvError::CorruptIndex("row positions out of order".to_string()));
        }

        let indexes = IndexManager::from_indexes(snapshot.indexes);
        indexes.validate(&self.columns, snapshot.positions.len())?;

        self.positions = snapshot.positions;
        self.fingerprint = current;
        self.indexes = indexes;
        self.pending_writes = 0;
        Ok(())
    }

    /// Rebuild positions and indexes from the data file
    fn rebuild(&mut self, current: DataFingerprint, extra: &[String]) -> Result<()> {
        let mut positions = Vec::new();
        let mut rows = Vec::new();
        for item in self.reader(current.len)? {
            let (position, values) = item?;
            positions.push(position);
            rows.push(values);
        }

        let declared = IndexManager::declared(&self.columns, extra);
        self.indexes = IndexManager::build(&self.columns, &declared, &rows, self.backend.as_ref());
        self.positions = positions;
        self.fingerprint = current;

        tracing::debug!(table = %self.name, rows = rows.len(), indexes = declared.len(), "index rebuilt");
        self.persist_index()
    }

    /// Rebuild indexes after a read detected an inconsistency
    pub(crate) fn recover_index(&mut self) -> Result<()> {
        let current = storage::fingerprint(&self.paths.data, self.settings.read_buffer_size)?;
        let declared = self.indexes.columns();
        tracing::warn!(table = %self.name, "index inconsistent with data, rebuilding");
        self.rebuild(current, &declared)
    }

    /// Delete both artifacts; the core refuses all further work
    pub(crate) fn remove_files(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.paths.remove_leftovers();
        for path in [&self.paths.data, &self.paths.index] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.dropped = true;
        self.positions.clear();
        self.indexes = IndexManager::new();
        self.pending_writes = 0;
        Ok(())
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.dropped {
            return Err(TsvError::TableDropped(self.name.clone()));
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn columns(&self) -> &Arc<[String]> {
        &self.columns
    }

    pub(crate) fn paths(&self) -> &TablePaths {
        &self.paths
    }

    pub(crate) fn row_count(&self) -> usize {
        self.positions.len()
    }

    pub(crate) fn fingerprint(&self) -> DataFingerprint {
        self.fingerprint
    }

    #[cfg(test)]
    pub(crate) fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub(crate) fn has_pending_writes(&self) -> bool {
        self.pending_writes > 0
    }

    pub(crate) fn stats(&self) -> TableStats {
        let index_size = fs::metadata(&self.paths.index)
            .map(|m| m.len())
            .unwrap_or(0);
        TableStats {
            name: self.name.clone(),
            columns: self.columns.to_vec(),
            row_count: self.row_count(),
            data_size: self.fingerprint.len,
            indexed_columns: self.indexes.columns(),
            index_entries: self.indexes.entry_count(),
            index_size,
            backend: self.backend.name(),
        }
    }

    /// Convert a caller record to a schema-ordered row.
    ///
    /// Unknown keys are ignored; missing columns become empty strings.
    pub(crate) fn project(&self, record: &Record) -> Result<Vec<String>> {
        self.columns
            .iter()
            .map(|column| {
                let value = record.get(column).unwrap_or_default();
                validate_value(column, value)?;
                Ok(value.to_string())
            })
            .collect()
    }

    fn reader(&self, limit: u64) -> Result<RowReader> {
        RowReader::open(
            &self.paths.data,
            self.columns.len(),
            limit,
            self.settings.read_buffer_size,
        )
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Matching rows in row order, at most `limit`.
    ///
    /// Any indexed condition column narrows the candidates through its
    /// index (intersected when several apply) and the rest are checked
    /// on the fetched rows; only with no indexed column is it a full scan.
    pub(crate) fn select(
        &self,
        conditions: &Conditions,
        limit: Option<usize>,
    ) -> Result<(Vec<Row>, AccessPath)> {
        self.ensure_live()?;
        let limit = limit.unwrap_or(usize::MAX);
        let Some(predicates) = conditions.resolve(&self.columns) else {
            return Ok((Vec::new(), AccessPath::FullScan));
        };

        if let Some(candidates) = self.indexes.candidates(&predicates) {
            let mut reader = PositionedReader::open(
                &self.paths.data,
                self.columns.len(),
                self.settings.read_buffer_size,
            )?;
            let mut rows = Vec::new();
            for offset in candidates.offsets {
                if rows.len() >= limit {
                    break;
                }
                let values = reader.read_at(self.position_of(offset)?)?;
                if matches(&values, &predicates) {
                    rows.push(Row::new(Arc::clone(&self.columns), values));
                }
            }
            return Ok((rows, AccessPath::Index));
        }

        let mut rows = Vec::new();
        if limit > 0 {
            self.scan_matching(&predicates, |values| {
                rows.push(Row::new(Arc::clone(&self.columns), values));
                rows.len() < limit
            })?;
        }
        Ok((rows, AccessPath::FullScan))
    }

    /// Number of matching rows without building `Row` values
    pub(crate) fn count(&self, conditions: &Conditions) -> Result<(usize, AccessPath)> {
        self.ensure_live()?;
        if conditions.is_empty() {
            return Ok((self.row_count(), AccessPath::Metadata));
        }
        let Some(predicates) = conditions.resolve(&self.columns) else {
            return Ok((0, AccessPath::FullScan));
        };

        if let Some(candidates) = self.indexes.candidates(&predicates) {
            if candidates.covered {
                return Ok((candidates.offsets.len(), AccessPath::Index));
            }
            let mut reader = PositionedReader::open(
                &self.paths.data,
                self.columns.len(),
                self.settings.read_buffer_size,
            )?;
            let mut count = 0;
            for offset in candidates.offsets {
                if matches(&reader.read_at(self.position_of(offset)?)?, &predicates) {
                    count += 1;
                }
            }
            return Ok((count, AccessPath::Index));
        }

        let mut count = 0;
        self.scan_matching(&predicates, |_| {
            count += 1;
            true
        })?;
        Ok((count, AccessPath::FullScan))
    }

    /// Lazy iterator over the rows present when it was created
    pub(crate) fn iter(&self) -> Result<RowIter> {
        self.ensure_live()?;
        Ok(RowIter {
            reader: self.reader(self.fingerprint.len)?,
            columns: Arc::clone(&self.columns),
        })
    }

    /// Stream the data file in chunks, handing every matching row to
    /// `visit` until it returns false
    fn scan_matching<F>(&self, predicates: &[(usize, String)], mut visit: F) -> Result<()>
    where
        F: FnMut(Vec<String>) -> bool,
    {
        let mut reader = self.reader(self.fingerprint.len)?;
        let mut chunk = Vec::with_capacity(SCAN_CHUNK_ROWS);

        loop {
            chunk.clear();
            for item in reader.by_ref().take(SCAN_CHUNK_ROWS) {
                chunk.push(item?.1);
            }
            if chunk.is_empty() {
                return Ok(());
            }

            for hit in self.backend.filter(&chunk, predicates) {
                if !visit(std::mem::take(&mut chunk[hit])) {
                    return Ok(());
                }
            }

            if chunk.len() < SCAN_CHUNK_ROWS {
                return Ok(());
            }
        }
    }

    fn position_of(&self, offset: usize) -> Result<u64> {
        self.positions.get(offset).copied().ok_or_else(|| {
            TsvError::CorruptIndex(format!(
                "offset {} beyond row count {}",
                offset,
                self.positions.len()
            ))
        })
    }

    /// Offsets matching `predicates` within a full row set
    fn matching_offsets(&self, rows: &[Vec<String>], predicates: &[(usize, String)]) -> Vec<usize> {
        match self.indexes.candidates(predicates) {
            Some(candidates) => candidates
                .offsets
                .into_iter()
                .filter(|&o| rows.get(o).is_some_and(|row| matches(row, predicates)))
                .collect(),
            None => self.backend.filter(rows, predicates),
        }
    }

    // =========================================================================
    // Analytics
    // =========================================================================

    fn column_position(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                TsvError::Schema(format!("table '{}' has no column '{}'", self.name, column))
            })
    }

    /// Distinct values of `column`, sorted
    pub(crate) fn distinct(&self, column: &str) -> Result<Vec<String>> {
        self.ensure_live()?;
        let position = self.column_position(column)?;

        if let Some(index) = self.indexes.get(column) {
            let mut values: Vec<String> = index.iter().map(|(v, _)| v.to_string()).collect();
            values.sort();
            return Ok(values);
        }

        Ok(self.group_count_at(position)?.into_keys().collect())
    }

    /// Row count per distinct value of `column`
    pub(crate) fn group_count(&self, column: &str) -> Result<BTreeMap<String, usize>> {
        self.ensure_live()?;
        let position = self.column_position(column)?;

        if let Some(index) = self.indexes.get(column) {
            return Ok(index
                .iter()
                .map(|(value, offsets)| (value.to_string(), offsets.len()))
                .collect());
        }

        self.group_count_at(position)
    }

    fn group_count_at(&self, position: usize) -> Result<BTreeMap<String, usize>> {
        let mut groups = BTreeMap::new();
        for item in self.reader(self.fingerprint.len)? {
            let (_, mut values) = item?;
            let value = std::mem::take(&mut values[position]);
            *groups.entry(value).or_insert(0) += 1;
        }
        Ok(groups)
    }

    /// Sum of `sum_column` per distinct value of `group_column`.
    ///
    /// Values that do not parse as numbers are skipped.
    pub(crate) fn group_sum(
        &self,
        group_column: &str,
        sum_column: &str,
    ) -> Result<BTreeMap<String, f64>> {
        self.ensure_live()?;
        let group = self.column_position(group_column)?;
        let sum = self.column_position(sum_column)?;

        let mut totals = BTreeMap::new();
        for item in self.reader(self.fingerprint.len)? {
            let (_, values) = item?;
            let total = totals.entry(values[group].clone()).or_insert(0.0);
            if let Ok(n) = values[sum].trim().parse::<f64>() {
                *total += n;
            }
        }
        Ok(totals)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Append rows; returns how many were written
    pub(crate) fn insert_rows(&mut self, rows: Vec<Vec<String>>) -> Result<usize> {
        self.ensure_live()?;
        if rows.is_empty() {
            return Ok(0);
        }

        let fingerprint = match self.append(&rows) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                // Drop whatever part of the batch reached the file
                if let Err(undo) = truncate(&self.paths.data, self.fingerprint.len) {
                    tracing::warn!(table = %self.name, error = %undo, "failed to undo partial append");
                }
                return Err(e);
            }
        };

        let mut cursor = self.fingerprint.len;
        let first = self.positions.len();
        for (i, row) in rows.iter().enumerate() {
            self.positions.push(cursor);
            cursor += encoded_len(row);
            self.indexes.on_insert(first + i, row);
        }
        self.fingerprint = fingerprint;

        tracing::debug!(table = %self.name, rows = rows.len(), "rows appended");
        self.note_write();
        Ok(rows.len())
    }

    fn append(&self, rows: &[Vec<String>]) -> Result<DataFingerprint> {
        let file = OpenOptions::new().append(true).open(&self.paths.data)?;
        let buffered = BufWriter::with_capacity(self.settings.write_buffer_size, file);
        let mut writer = CrcWriter::resume(buffered, self.fingerprint);

        self.backend.write_batch(&mut writer, rows)?;
        writer.flush()?;
        let fingerprint = writer.fingerprint();

        if self.settings.sync_writes {
            writer.into_inner().get_ref().sync_data()?;
        }
        Ok(fingerprint)
    }

    /// Apply `changes` to every row matching `conditions`; returns the
    /// number of matching rows
    pub(crate) fn update(&mut self, conditions: &Conditions, changes: &Record) -> Result<usize> {
        self.ensure_live()?;
        let Some(predicates) = conditions.resolve(&self.columns) else {
            return Ok(0);
        };

        let mut assignments = Vec::new();
        for (column, value) in changes.iter() {
            validate_value(column, value)?;
            if let Some(position) = self.columns.iter().position(|c| c == column) {
                assignments.push((position, value.to_string()));
            }
        }

        let mut rows = self.read_all()?;
        let targets = self.matching_offsets(&rows, &predicates);
        if targets.is_empty() {
            return Ok(0);
        }

        let mut changed = Vec::new();
        for &offset in &targets {
            let row = &mut rows[offset];
            let before = row.clone();
            for (position, value) in &assignments {
                row[*position].clone_from(value);
            }
            if *row != before {
                changed.push((offset, before));
            }
        }

        if !changed.is_empty() {
            self.rewrite(&rows)?;
            for (offset, before) in &changed {
                self.indexes.on_update(*offset, before, &rows[*offset]);
            }
            self.note_write();
        }

        tracing::debug!(table = %self.name, matched = targets.len(), changed = changed.len(), "rows updated");
        Ok(targets.len())
    }

    /// Remove every row matching `conditions`; returns how many were removed
    pub(crate) fn delete(&mut self, conditions: &Conditions) -> Result<usize> {
        self.ensure_live()?;
        let Some(predicates) = conditions.resolve(&self.columns) else {
            return Ok(0);
        };

        let rows = self.read_all()?;
        let targets = self.matching_offsets(&rows, &predicates);
        if targets.is_empty() {
            return Ok(0);
        }

        let mut removed = targets.iter().peekable();
        let kept: Vec<Vec<String>> = rows
            .into_iter()
            .enumerate()
            .filter_map(|(offset, row)| {
                if removed.peek() == Some(&&offset) {
                    removed.next();
                    None
                } else {
                    Some(row)
                }
            })
            .collect();

        self.rewrite(&kept)?;
        self.indexes.on_delete(&targets);
        self.note_write();

        tracing::debug!(table = %self.name, removed = targets.len(), "rows deleted");
        Ok(targets.len())
    }

    /// Build an index on `column`; false if it already existed
    pub(crate) fn create_index(&mut self, column: &str) -> Result<bool> {
        self.ensure_live()?;
        self.column_position(column)?;
        if self.indexes.has(column) {
            return Ok(false);
        }

        let rows = self.read_all()?;
        self.indexes
            .create(&self.columns, column, &rows, self.backend.as_ref());
        self.persist_index()?;

        tracing::debug!(table = %self.name, column, "index created");
        Ok(true)
    }

    fn read_all(&self) -> Result<Vec<Vec<String>>> {
        let rows = self.backend.read_all(
            &self.paths.data,
            self.columns.len(),
            self.settings.read_buffer_size,
        )?;
        if rows.len() != self.positions.len() {
            return Err(TsvError::CorruptIndex(format!(
                "data file holds {} rows, index expects {}",
                rows.len(),
                self.positions.len()
            )));
        }
        Ok(rows)
    }

    /// Replace the data file with header + `rows` and recompute positions
    fn rewrite(&mut self, rows: &[Vec<String>]) -> Result<()> {
        let header = encode_header(&self.columns);
        let backend = Arc::clone(&self.backend);

        let fingerprint = write_atomic(&self.paths.data, self.settings.write_buffer_size, |w| {
            let mut writer = CrcWriter::new(w);
            writer.write_all(header.as_bytes())?;
            backend.write_batch(&mut writer, rows)?;
            Ok(writer.fingerprint())
        })?;

        let mut cursor = header.len() as u64;
        self.positions.clear();
        self.positions.reserve(rows.len());
        for row in rows {
            self.positions.push(cursor);
            cursor += encoded_len(row);
        }
        self.fingerprint = fingerprint;
        Ok(())
    }

    // =========================================================================
    // Index persistence
    // =========================================================================

    /// Count a landed data write and persist the index when due.
    ///
    /// A failed save leaves the write pending: the data file is already
    /// authoritative and the next flush or reopen repairs the artifact.
    fn note_write(&mut self) {
        self.pending_writes += 1;
        let due = match self.settings.index_sync {
            IndexSyncStrategy::EveryWrite => true,
            IndexSyncStrategy::EveryNWrites { count } => self.pending_writes >= count.max(1),
        };
        if due {
            if let Err(e) = self.persist_index() {
                tracing::warn!(table = %self.name, error = %e, "index persist failed, will retry");
            }
        }
    }

    /// Write the index artifact for the current data file
    pub(crate) fn persist_index(&mut self) -> Result<()> {
        self.ensure_live()?;
        let snapshot = SnapshotRef {
            fingerprint: self.fingerprint,
            columns: &self.columns,
            positions: &self.positions,
            indexes: self.indexes.indexes().collect(),
        };
        let size = persist::save(&self.paths.index, &snapshot, self.settings.write_buffer_size)?;
        self.pending_writes = 0;

        tracing::trace!(table = %self.name, bytes = size, "index persisted");
        Ok(())
    }

    /// Persist the index if mutations are outstanding
    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.has_pending_writes() {
            self.persist_index()?;
        }
        Ok(())
    }

    // =========================================================================
    // Transaction support
    // =========================================================================

    /// Private copy of this table backed by the working paths.
    ///
    /// The copy never persists its index on its own; [`commit_from`]
    /// writes it once.
    ///
    /// [`commit_from`]: TableCore::commit_from
    pub(crate) fn fork(&self) -> Result<Self> {
        self.ensure_live()?;
        let paths = self.paths.working();
        paths.remove_leftovers();
        storage::copy_atomic(&self.paths.data, &paths.data)?;

        let mut settings = self.settings;
        settings.index_sync = IndexSyncStrategy::EveryNWrites { count: usize::MAX };
        settings.sync_writes = false;

        Ok(Self {
            name: self.name.clone(),
            columns: Arc::clone(&self.columns),
            paths,
            backend: Arc::clone(&self.backend),
            settings,
            positions: self.positions.clone(),
            fingerprint: self.fingerprint,
            indexes: self.indexes.clone(),
            pending_writes: 0,
            dropped: false,
        })
    }

    /// Make `working` the live state.
    ///
    /// The data rename is the commit point. If the index rename fails
    /// afterwards the live artifact is removed so the next open rebuilds it.
    pub(crate) fn commit_from(&mut self, mut working: TableCore) -> Result<()> {
        self.ensure_live()?;
        working.persist_index()?;

        storage::replace_file(&working.paths.data, &self.paths.data)?;
        if let Err(e) = storage::replace_file(&working.paths.index, &self.paths.index) {
            tracing::warn!(table = %self.name, error = %e, "index swap failed after commit");
            let _ = fs::remove_file(&self.paths.index);
            let _ = fs::remove_file(&working.paths.index);
            self.pending_writes = 1;
        } else {
            self.pending_writes = 0;
        }

        self.positions = std::mem::take(&mut working.positions);
        self.fingerprint = working.fingerprint;
        self.indexes = std::mem::take(&mut working.indexes);
        Ok(())
    }

    /// Throw away a working copy's files
    pub(crate) fn discard(self) {
        for path in [&self.paths.data, &self.paths.index] {
            let _ = fs::remove_file(path);
        }
    }
}

/// Write a header-only data file
fn write_header(path: &Path, columns: &[String], buffer_size: usize) -> Result<DataFingerprint> {
    let header = encode_header(columns);
    write_atomic(path, buffer_size, |w| {
        let mut writer = CrcWriter::new(w);
        writer.write_all(header.as_bytes())?;
        Ok(writer.fingerprint())
    })
}

fn truncate(path: &Path, len: u64) -> Result<()> {
    OpenOptions::new().write(true).open(path)?.set_len(len)?;
    Ok(())
}

/// Streaming iterator over a table's rows, in file order
pub struct RowIter {
    reader: RowReader,
    columns: Arc<[String]>,
}

impl Iterator for RowIter {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.reader.next()?;
        Some(item.map(|(_, values)| Row::new(Arc::clone(&self.columns), values)))
    }
}
