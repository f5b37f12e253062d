//! Observe Module
//!
//! Shared instrumentation referenced by every table:
//! - [`AuditLog`]: operations on audited tables and their outcomes
//! - [`QueryLog`]: read classification/timing plus the result cache
//!
//! Both live in an [`Observers`] registry injected into each table through
//! [`Config`](crate::Config). A process-lifetime default registry backs
//! [`audit_log()`] and [`query_log()`].

mod audit;
mod cache;
mod query_log;

use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

pub use audit::{AuditEntry, AuditLog, AuditStats, Operation};
pub use cache::{CacheKey, QueryShape, ResultCache};
pub use query_log::{QueryKind, QueryLog, QueryLogEntry, QueryStats};

/// Audit + query instrumentation handles
#[derive(Debug, Clone, Default)]
pub struct Observers {
    pub audit: Arc<AuditLog>,
    pub queries: Arc<QueryLog>,
}

impl Observers {
    /// Fresh, private registry
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(log_capacity: usize, cache_capacity: usize) -> Self {
        Self {
            audit: Arc::new(AuditLog::with_capacity(log_capacity)),
            queries: Arc::new(QueryLog::with_capacity(log_capacity, cache_capacity)),
        }
    }
}

static GLOBAL: OnceLock<Observers> = OnceLock::new();

/// Process-wide default registry
pub fn global() -> &'static Observers {
    GLOBAL.get_or_init(Observers::new)
}

/// Process-wide audit log
pub fn audit_log() -> Arc<AuditLog> {
    Arc::clone(&global().audit)
}

/// Process-wide query log
pub fn query_log() -> Arc<QueryLog> {
    Arc::clone(&global().queries)
}

/// Current unix time in milliseconds
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
