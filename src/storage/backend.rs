//! Storage backends
//!
//! Capability interface for the bulk operations a table delegates:
//! read every row, write a batch, filter, build an index. Tables depend
//! only on the trait; the implementation is picked from [`BackendKind`]
//! when the database is opened.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::BackendKind;
use crate::error::Result;
use crate::record::matches;

use super::format::{encode_row, parse_line};

/// Bulk row operations over the data artifact
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Short name for logs and stats
    fn name(&self) -> &'static str;

    /// Every row after the header, each padded/truncated to `width` fields
    fn read_all(&self, path: &Path, width: usize, buffer_size: usize) -> Result<Vec<Vec<String>>>;

    /// Encode `rows` in order and write them to `out`; returns bytes written
    fn write_batch(&self, out: &mut dyn Write, rows: &[Vec<String>]) -> Result<u64>;

    /// Indices (into `rows`) of rows satisfying every predicate, ascending
    fn filter(&self, rows: &[Vec<String>], predicates: &[(usize, String)]) -> Vec<usize>;

    /// value → ascending row indices for field `column`
    fn build_index(&self, rows: &[Vec<String>], column: usize) -> HashMap<String, Vec<usize>>;
}

/// Backend for a configured kind
pub fn backend_for(kind: BackendKind) -> Arc<dyn StorageBackend> {
    match kind {
        BackendKind::Reference => Arc::new(ReferenceBackend),
        BackendKind::Parallel => Arc::new(ParallelBackend::default()),
    }
}

// =============================================================================
// Reference Backend
// =============================================================================

/// Sequential implementation using std buffered I/O
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBackend;

impl StorageBackend for ReferenceBackend {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn read_all(&self, path: &Path, width: usize, buffer_size: usize) -> Result<Vec<Vec<String>>> {
        let mut reader = BufReader::with_capacity(buffer_size, File::open(path)?);
        let mut line = Vec::with_capacity(1024);
        let mut rows = Vec::new();

        // Header
        reader.read_until(b'\n', &mut line)?;
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            rows.push(parse_line(&String::from_utf8_lossy(&line), width));
        }
        Ok(rows)
    }

    fn write_batch(&self, out: &mut dyn Write, rows: &[Vec<String>]) -> Result<u64> {
        let mut line = Vec::with_capacity(1024);
        let mut written = 0u64;
        for row in rows {
            line.clear();
            encode_row(row, &mut line);
            out.write_all(&line)?;
            written += line.len() as u64;
        }
        Ok(written)
    }

    fn filter(&self, rows: &[Vec<String>], predicates: &[(usize, String)]) -> Vec<usize> {
        rows.iter()
            .enumerate()
            .filter(|(_, row)| matches(row, predicates))
            .map(|(i, _)| i)
            .collect()
    }

    fn build_index(&self, rows: &[Vec<String>], column: usize) -> HashMap<String, Vec<usize>> {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (offset, row) in rows.iter().enumerate() {
            if let Some(value) = row.get(column) {
                index.entry(value.clone()).or_default().push(offset);
            }
        }
        index
    }
}

// =============================================================================
// Parallel Backend
// =============================================================================

/// memchr line/tab splitting and rayon data parallelism
#[derive(Debug, Clone, Copy)]
pub struct ParallelBackend {
    /// Rows per parallel work unit
    chunk_rows: usize,
}

impl Default for ParallelBackend {
    fn default() -> Self {
        Self { chunk_rows: 4096 }
    }
}

impl ParallelBackend {
    pub fn with_chunk_rows(chunk_rows: usize) -> Self {
        Self {
            chunk_rows: chunk_rows.max(1),
        }
    }

    /// Split one line on tabs with memchr
    fn parse_fast(line: &[u8], width: usize) -> Vec<String> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        let mut fields = Vec::with_capacity(width);
        let mut start = 0;
        for tab in memchr::memchr_iter(b'\t', line) {
            if fields.len() == width {
                break;
            }
            fields.push(String::from_utf8_lossy(&line[start..tab]).into_owned());
            start = tab + 1;
        }
        if fields.len() < width {
            fields.push(String::from_utf8_lossy(&line[start..]).into_owned());
        }
        fields.resize(width, String::new());
        fields
    }
}

impl StorageBackend for ParallelBackend {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn read_all(&self, path: &Path, width: usize, _buffer_size: usize) -> Result<Vec<Vec<String>>> {
        let bytes = std::fs::read(path)?;

        // Line boundaries, header skipped
        let mut lines: Vec<&[u8]> = Vec::new();
        let mut start = 0;
        for nl in memchr::memchr_iter(b'\n', &bytes) {
            lines.push(&bytes[start..=nl]);
            start = nl + 1;
        }
        if start < bytes.len() {
            lines.push(&bytes[start..]);
        }
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        Ok(lines[1..]
            .par_iter()
            .with_min_len(self.chunk_rows)
            .map(|line| Self::parse_fast(line, width))
            .collect())
    }

    fn write_batch(&self, out: &mut dyn Write, rows: &[Vec<String>]) -> Result<u64> {
        // Encode chunks in parallel, write them in order
        let chunks: Vec<Vec<u8>> = rows
            .par_chunks(self.chunk_rows)
            .map(|chunk| {
                let mut buf = Vec::with_capacity(chunk.len() * 64);
                for row in chunk {
                    encode_row(row, &mut buf);
                }
                buf
            })
            .collect();

        let mut written = 0u64;
        for chunk in chunks {
            out.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    fn filter(&self, rows: &[Vec<String>], predicates: &[(usize, String)]) -> Vec<usize> {
        rows.par_iter()
            .with_min_len(self.chunk_rows)
            .enumerate()
            .filter(|(_, row)| matches(row, predicates))
            .map(|(i, _)| i)
            .collect()
    }

    fn build_index(&self, rows: &[Vec<String>], column: usize) -> HashMap<String, Vec<usize>> {
        // Per-chunk partial maps, merged in chunk order so buckets stay ascending
        let partials: Vec<HashMap<String, Vec<usize>>> = rows
            .par_chunks(self.chunk_rows)
            .enumerate()
            .map(|(chunk_no, chunk)| {
                let base = chunk_no * self.chunk_rows;
                let mut partial: HashMap<String, Vec<usize>> = HashMap::new();
                for (i, row) in chunk.iter().enumerate() {
                    if let Some(value) = row.get(column) {
                        partial.entry(value.clone()).or_default().push(base + i);
                    }
                }
                partial
            })
            .collect();

        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for partial in partials {
            for (value, offsets) in partial {
                index.entry(value).or_default().extend(offsets);
            }
        }
        index
    }
}
