//! Records, rows and query conditions
//!
//! - [`Record`]: caller-supplied column → value mapping (insert input, update changes)
//! - [`Row`]: a stored row, values in schema order
//! - [`Conditions`]: ordered conjunction of exact-match predicates

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Column → value mapping supplied by callers.
///
/// Keys not declared by the table are ignored on insert/update;
/// declared columns missing from the record are stored as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(column.into(), value.into());
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Record {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// A stored row. Values are held in schema order and share the column list.
#[derive(Clone, PartialEq, Eq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<String>,
}

impl Row {
    /// Build a row, padding or truncating `values` to the column count
    pub(crate) fn new(columns: Arc<[String]>, mut values: Vec<String>) -> Self {
        values.resize(columns.len(), String::new());
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        let pos = self.columns.iter().position(|c| c == column)?;
        Some(self.values[pos].as_str())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }

    /// (column, value) pairs in schema order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    pub fn to_record(&self) -> Record {
        self.iter().collect()
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// One exact-match condition: `column == value`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Predicate {
    pub column: String,
    pub value: String,
}

/// Conjunction of equality predicates. Empty conditions match every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    predicates: Vec<Predicate>,
}

impl Conditions {
    /// Conditions matching every row
    pub fn all() -> Self {
        Self::default()
    }

    /// Single-predicate shorthand
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::default().and(column, value)
    }

    /// Add another predicate
    pub fn and(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.predicates.push(Predicate {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Order-independent key used by the result cache
    pub(crate) fn cache_key(&self) -> Vec<Predicate> {
        let mut sorted = self.predicates.clone();
        sorted.sort();
        sorted
    }

    /// Resolve against a schema.
    ///
    /// Returns `None` when a predicate names an unknown column: such a
    /// condition can never match.
    pub(crate) fn resolve(&self, columns: &[String]) -> Option<Vec<(usize, String)>> {
        self.predicates
            .iter()
            .map(|p| {
                columns
                    .iter()
                    .position(|c| *c == p.column)
                    .map(|pos| (pos, p.value.clone()))
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Conditions {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs
            .into_iter()
            .fold(Conditions::all(), |c, (k, v)| c.and(k, v))
    }
}

impl From<&Record> for Conditions {
    fn from(record: &Record) -> Self {
        record
            .iter()
            .fold(Conditions::all(), |c, (k, v)| c.and(k, v))
    }
}

/// True when `values` satisfies every resolved predicate
pub(crate) fn matches(values: &[String], predicates: &[(usize, String)]) -> bool {
    predicates
        .iter()
        .all(|(pos, want)| values.get(*pos).map_or(want.is_empty(), |v| v == want))
}
