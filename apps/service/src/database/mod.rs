/// Persistence layer
///
/// The monitoring database lives in an in-memory libsql instance for the
/// duration of one run. It is loaded from a [`Snapshot`](crate::snapshot::Snapshot)
/// at the start and exported back into one at the end.

pub mod models;
pub mod repository;
pub mod schema;

pub use models::{
    DatabaseStats, HourlyUptime, PlatformCount, StatusCheck, StoreRecord, StoreStatus, StoreUptime,
    SummaryReport,
};
pub use repository::{Database, DatabaseImpl};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database query failed: {0}")]
    Query(#[from] libsql::Error),

    #[error("Stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),

    #[error("Stored count {0} is out of range")]
    InvalidCount(i64),

    #[error("Stored platform '{0}' is not recognised")]
    InvalidPlatform(String),

    #[error("Summary counts do not add up: {online} online + {offline} offline != {total} total")]
    InconsistentSummary { total: u32, online: u32, offline: u32 },

    #[error("Snapshot schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },
}
