//! Backup / Restore
//!
//! A backup is a directory holding verbatim copies of a table's artifacts
//! plus a manifest:
//!
//! ```text
//! {dest}/{table}.tsv        data artifact
//! {dest}/{table}.idx        index artifact (consistent with the copy)
//! {dest}/{table}.manifest   bincode BackupManifest
//! ```
//!
//! Both operations hold the table's write lock, so a backup never observes a
//! half-applied mutation and a restore replaces data and index as one unit.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use parking_lot::RwLockWriteGuard;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::observe::{now_millis, Operation};
use crate::storage::{copy_atomic, fingerprint, read_header, write_atomic, DataFingerprint};
use crate::table::{Table, TablePaths};
use crate::TsvError;

const MANIFEST_EXT: &str = "manifest";
const MANIFEST_VERSION: u16 = 1;

/// Description of one backup, stored next to the copied artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub format_version: u16,
    pub table: String,
    pub columns: Vec<String>,
    pub row_count: usize,
    /// Length + CRC32 of the copied data file
    pub data: DataFingerprint,
    /// Capture time (unix millis)
    pub created_at: u64,
    /// Crate version that wrote the backup
    pub crate_version: String,
}

impl BackupManifest {
    /// Read the manifest for `table` from a backup directory
    pub fn load(dir: &Path, table: &str) -> Result<Self> {
        let path = manifest_path(dir, table);
        let file = File::open(&path).map_err(|e| {
            TsvError::Backup(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        let manifest: BackupManifest = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| TsvError::Backup(format!("undecodable manifest: {}", e)))?;

        if manifest.format_version != MANIFEST_VERSION {
            return Err(TsvError::Backup(format!(
                "unsupported manifest version {}",
                manifest.format_version
            )));
        }
        Ok(manifest)
    }
}

fn manifest_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{}.{}", table, MANIFEST_EXT))
}

impl Table {
    /// Copy the table's data and index into `destination` (created if
    /// missing), overwriting an earlier backup of this table there
    pub fn backup(&self, destination: impl AsRef<Path>) -> Result<BackupManifest> {
        let destination = destination.as_ref();
        let _guard = self.lock_writer()?;

        // Index must describe exactly the data being copied
        let mut core = self.shared.core.write();
        core.persist_index()?;
        let core = RwLockWriteGuard::downgrade(core);

        fs::create_dir_all(destination)?;
        let target = TablePaths::new(destination, core.name());
        copy_atomic(&core.paths().data, &target.data)?;
        copy_atomic(&core.paths().index, &target.index)?;

        let copied = fingerprint(&target.data, 64 * 1024)?;
        if copied != core.fingerprint() {
            return Err(TsvError::Backup(format!(
                "copy of '{}' does not match the live data file",
                core.name()
            )));
        }

        let manifest = BackupManifest {
            format_version: MANIFEST_VERSION,
            table: core.name().to_string(),
            columns: core.columns().to_vec(),
            row_count: core.row_count(),
            data: copied,
            created_at: now_millis(),
            crate_version: crate::VERSION.to_string(),
        };
        write_atomic(&manifest_path(destination, core.name()), 4096, |w| {
            bincode::serialize_into(w, &manifest)?;
            Ok(())
        })?;

        tracing::info!(
            table = %manifest.table,
            rows = manifest.row_count,
            path = %destination.display(),
            "backup written"
        );
        Ok(manifest)
    }

    /// Replace the table's contents with a backup taken by [`Table::backup`].
    ///
    /// The backup is verified against its manifest before anything live is
    /// touched.
    pub fn restore(&self, source: impl AsRef<Path>) -> Result<()> {
        let source = source.as_ref();
        self.mutate(Operation::Restore, |core| {
            core.ensure_live()?;
            let manifest = BackupManifest::load(source, core.name())?;
            if manifest.columns[..] != core.columns()[..] {
                return Err(TsvError::Backup(format!(
                    "backup columns {:?} do not match table columns {:?}",
                    manifest.columns,
                    core.columns()
                )));
            }

            let backup = TablePaths::new(source, core.name());
            if fingerprint(&backup.data, 64 * 1024)? != manifest.data {
                return Err(TsvError::Backup("backup data checksum mismatch".to_string()));
            }
            if read_header(&backup.data)? != manifest.columns {
                return Err(TsvError::Backup("backup header mismatch".to_string()));
            }

            let live = core.paths().clone();
            let copied = copy_atomic(&backup.data, &live.data).and_then(|_| {
                if backup.index.exists() {
                    copy_atomic(&backup.index, &live.index)?;
                } else if live.index.exists() {
                    fs::remove_file(&live.index)?;
                }
                Ok(())
            });

            // Whatever landed on disk, in-memory state follows it; a missing
            // or mismatched index copy is rebuilt here
            let reloaded = core.load_state();
            copied?;
            reloaded?;

            tracing::info!(
                table = %manifest.table,
                rows = core.row_count(),
                path = %source.display(),
                "backup restored"
            );
            Ok(())
        })
    }
}
