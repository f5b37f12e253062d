//! Text format codec
//!
//! Header and row lines of the data artifact.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::TsvError;

/// Identity of a data file's exact contents (length + CRC32).
///
/// Stored in the index artifact and backup manifest; a mismatch means the
/// artifact was derived from different data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFingerprint {
    pub len: u64,
    pub crc: u32,
}

/// Check a value against the format constraint (no tabs / line breaks)
pub fn validate_value(column: &str, value: &str) -> Result<()> {
    if let Some(c) = value.chars().find(|c| matches!(c, '\t' | '\n' | '\r')) {
        return Err(TsvError::InvalidValue {
            column: column.to_string(),
            reason: format!("contains forbidden character {:?}", c),
        });
    }
    Ok(())
}

/// Column declarations: non-empty, unique, no separators
pub fn validate_columns(columns: &[String]) -> Result<()> {
    if columns.is_empty() {
        return Err(TsvError::Schema("table needs at least one column".to_string()));
    }

    let mut seen = HashSet::with_capacity(columns.len());
    for column in columns {
        if column.is_empty() {
            return Err(TsvError::Schema("column name is empty".to_string()));
        }
        if column.contains(['\t', '\n', '\r']) {
            return Err(TsvError::Schema(format!(
                "column name {:?} contains a tab or line break",
                column
            )));
        }
        if !seen.insert(column.as_str()) {
            return Err(TsvError::Schema(format!("duplicate column '{}'", column)));
        }
    }
    Ok(())
}

/// Table names become file stems: ASCII alphanumerics, '_' and '-' only
pub fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(TsvError::Schema(format!("invalid table name {:?}", name)));
    }
    Ok(())
}

/// Header line including trailing newline
pub fn encode_header(columns: &[String]) -> String {
    let mut line = columns.join("\t");
    line.push('\n');
    line
}

/// Append one encoded row (with trailing newline) to `out`
pub fn encode_row(values: &[String], out: &mut Vec<u8>) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(b'\t');
        }
        out.extend_from_slice(value.as_bytes());
    }
    out.push(b'\n');
}

/// Byte length of `encode_row(values)`
pub fn encoded_len(values: &[String]) -> u64 {
    let payload: usize = values.iter().map(String::len).sum();
    (payload + values.len().saturating_sub(1) + 1) as u64
}

/// Parse one line (without or with its line terminator) into `width` fields.
///
/// Missing trailing fields become empty strings; extra fields are ignored.
pub fn parse_line(line: &str, width: usize) -> Vec<String> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut fields: Vec<String> = line.split('\t').take(width).map(str::to_string).collect();
    fields.resize(width, String::new());
    fields
}
