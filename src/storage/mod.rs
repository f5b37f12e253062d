//! Storage Module
//!
//! Plain-text table storage.
//!
//! ## Responsibilities
//! - Encode/decode the tab-separated data artifact
//! - Stream rows without loading the whole table
//! - Atomic replace of whole files (temp file + rename)
//! - Backend capability interface (reference / parallel implementations)
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Header                                 │
//! │   col_0 \t col_1 \t ... \t col_n \n    │
//! ├────────────────────────────────────────┤
//! │ Rows (row offset 0, 1, 2, ...)         │
//! │   val_0 \t val_1 \t ... \t val_n \n    │
//! │   ... repeated for each row ...        │
//! └────────────────────────────────────────┘
//! ```
//!
//! UTF-8, no escaping: values must not contain tabs or line breaks.
//! Short rows are read leniently (missing trailing fields are empty).

mod backend;
mod file;
mod format;
mod reader;

pub use backend::{backend_for, ParallelBackend, ReferenceBackend, StorageBackend};
pub use file::{copy_atomic, fingerprint, repair_torn_tail, replace_file, write_atomic, CrcWriter};
pub use format::{
    encode_header, encode_row, encoded_len, parse_line, validate_columns, validate_table_name,
    validate_value, DataFingerprint,
};
pub use reader::{read_header, RowReader};
pub(crate) use reader::PositionedReader;

/// Data artifact extension
pub(crate) const DATA_EXT: &str = "tsv";

/// Index artifact extension
pub(crate) const INDEX_EXT: &str = "idx";

/// Suffix for transaction working copies
pub(crate) const TXN_SUFFIX: &str = "txn";

/// Suffix for in-flight atomic writes
pub(crate) const TMP_SUFFIX: &str = "tmp";
