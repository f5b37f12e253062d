//! Index Module
//!
//! Equality indexes from column value to row offsets.
//!
//! ## Responsibilities
//! - Implicit primary index on the `id` column
//! - Secondary indexes created on demand
//! - Incremental maintenance on insert / update / delete
//! - Mirror to a checksummed index artifact for fast reopen
//!
//! The in-memory index is derived from the data file and can always be
//! rebuilt from it; the artifact is an optimization, never authoritative.

mod column;
mod manager;
pub(crate) mod persist;

pub use column::ColumnIndex;
pub use manager::{Candidates, IndexManager, PRIMARY_KEY};
