//! Streaming row reader
//!
//! Sequential iteration over the rows of a data artifact. Holds one line
//! in memory at a time.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Take};
use std::path::Path;

use crate::error::Result;
use crate::TsvError;

use super::format::parse_line;

/// Read and parse the header line of a data artifact
pub fn read_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 || !line.ends_with('\n') {
        return Err(TsvError::Schema(format!(
            "{} has no header line",
            path.display()
        )));
    }

    let line = line.trim_end_matches(['\n', '\r']);
    Ok(line.split('\t').map(str::to_string).collect())
}

/// Iterator over `(byte_position, fields)` of every row after the header
pub struct RowReader {
    reader: BufReader<Take<File>>,
    width: usize,
    /// Byte position of the next line
    position: u64,
    line: Vec<u8>,
}

impl RowReader {
    /// Open `path` and position after the header.
    ///
    /// Reading stops at `limit` bytes so rows appended after the caller's
    /// snapshot are not observed.
    pub fn open(path: &Path, width: usize, limit: u64, buffer_size: usize) -> Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(0))?;

        let mut reader = BufReader::with_capacity(buffer_size, file.take(limit));
        let mut header = Vec::new();
        let header_len = reader.read_until(b'\n', &mut header)? as u64;

        Ok(Self {
            reader,
            width,
            position: header_len,
            line: Vec::with_capacity(256),
        })
    }

    /// Byte position of the next row
    pub fn position(&self) -> u64 {
        self.position
    }

    fn next_row(&mut self) -> Result<Option<(u64, Vec<String>)>> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line)?;
        if n == 0 {
            return Ok(None);
        }

        let pos = self.position;
        self.position += n as u64;
        let text = String::from_utf8_lossy(&self.line);
        Ok(Some((pos, parse_line(&text, self.width))))
    }
}

impl Iterator for RowReader {
    type Item = Result<(u64, Vec<String>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

/// Read single lines at known byte positions
pub(crate) struct PositionedReader {
    reader: BufReader<File>,
    width: usize,
    line: Vec<u8>,
}

impl PositionedReader {
    pub(crate) fn open(path: &Path, width: usize, buffer_size: usize) -> Result<Self> {
        // Small buffer: each read is a seek to an arbitrary line
        let capacity = buffer_size.min(8 * 1024);
        Ok(Self {
            reader: BufReader::with_capacity(capacity, File::open(path)?),
            width,
            line: Vec::with_capacity(256),
        })
    }

    pub(crate) fn read_at(&mut self, position: u64) -> Result<Vec<String>> {
        self.reader.seek(SeekFrom::Start(position))?;
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line)?;
        if n == 0 {
            return Err(TsvError::CorruptIndex(format!(
                "row position {} is past end of data",
                position
            )));
        }
        Ok(parse_line(&String::from_utf8_lossy(&self.line), self.width))
    }
}
