/// Point-in-time description of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: usize,
    /// Data file size in bytes
    pub data_size: u64,
    /// Indexed columns, sorted (includes the primary key when declared)
    pub indexed_columns: Vec<String>,
    /// Offsets held across all indexes
    pub index_entries: usize,
    /// Index artifact size in bytes (0 when not yet written)
    pub index_size: u64,
    /// Storage backend serving this table
    pub backend: &'static str,
}

impl TableStats {
    pub fn has_index(&self, column: &str) -> bool {
        self.indexed_columns.iter().any(|c| c == column)
    }
}
