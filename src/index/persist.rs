//! Index artifact
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (18 bytes)                                            │
//! │   Magic "TSVI" (4) | Version u16 (2) | CRC32 (4) | Len u64 (8)│
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (bincode IndexSnapshot)                              │
//! │   data fingerprint, schema, row byte positions, indexes      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The artifact is a cache: any mismatch is reported as `CorruptIndex`
//! and the caller rebuilds from the data file.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{write_atomic, DataFingerprint};
use crate::TsvError;

use super::ColumnIndex;

const MAGIC: &[u8; 4] = b"TSVI";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 18;

/// Everything needed to serve lookups without rescanning the data file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IndexSnapshot {
    /// Data file this snapshot was derived from
    pub fingerprint: DataFingerprint,
    /// Table schema at snapshot time
    pub columns: Vec<String>,
    /// Byte position of each row in the data file
    pub positions: Vec<u64>,
    pub indexes: Vec<ColumnIndex>,
}

/// Borrowed form of [`IndexSnapshot`] used when saving (same encoding)
#[derive(Debug, Serialize)]
pub(crate) struct SnapshotRef<'a> {
    pub fingerprint: DataFingerprint,
    pub columns: &'a [String],
    pub positions: &'a [u64],
    pub indexes: Vec<&'a ColumnIndex>,
}

/// Write the artifact atomically; returns its size in bytes
pub(crate) fn save(path: &Path, snapshot: &SnapshotRef<'_>, buffer_size: usize) -> Result<u64> {
    let payload = bincode::serialize(snapshot)?;
    let crc = crc32fast::hash(&payload);

    write_atomic(path, buffer_size, |w| {
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&crc.to_le_bytes())?;
        w.write_all(&(payload.len() as u64).to_le_bytes())?;
        w.write_all(&payload)?;
        Ok(())
    })?;

    Ok((HEADER_SIZE + payload.len()) as u64)
}

/// Read and verify the artifact
pub(crate) fn load(path: &Path) -> Result<IndexSnapshot> {
    let bytes = fs::read(path)?;
    if bytes.len() < HEADER_SIZE {
        return Err(TsvError::CorruptIndex("index file truncated".to_string()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(TsvError::CorruptIndex(format!(
            "invalid index magic: {:?}",
            &bytes[0..4]
        )));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(TsvError::CorruptIndex(format!(
            "unsupported index version: {}",
            version
        )));
    }

    let crc = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[10..18]);
    let len = u64::from_le_bytes(len_bytes) as usize;

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != len {
        return Err(TsvError::CorruptIndex(format!(
            "payload length {} does not match header {}",
            payload.len(),
            len
        )));
    }
    if crc32fast::hash(payload) != crc {
        return Err(TsvError::CorruptIndex("index checksum mismatch".to_string()));
    }

    bincode::deserialize(payload)
        .map_err(|e| TsvError::CorruptIndex(format!("undecodable index payload: {}", e)))
}
