//! Snapshot handling
//!
//! A [`Snapshot`] is the complete monitoring database as one value. Runs hand
//! it to each other through a [`SnapshotStore`]: restore at the start, publish
//! at the end. The store is a single-slot register per name and the last
//! publish wins; nothing is merged.

pub mod file;
pub mod memory;
pub mod store;

pub use file::FileSnapshotStore;
pub use memory::InMemorySnapshotStore;
pub use store::SnapshotStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::schema::SCHEMA_VERSION;
use crate::database::{StatusCheck, StoreRecord, SummaryReport};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Snapshot '{name}' is corrupt: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("Snapshot schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Snapshot store unavailable: {0}")]
    Unavailable(String),
}

/// Entire persisted state: every table plus bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    /// Incremented on every publish of new state
    pub revision: u64,
    /// Absent from version 1 snapshots
    #[serde(default)]
    pub stores: Vec<StoreRecord>,
    pub status_checks: Vec<StatusCheck>,
    pub summary_reports: Vec<SummaryReport>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Snapshot {
    /// State of a system that has never run
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            revision: 0,
            stores: Vec::new(),
            status_checks: Vec::new(),
            summary_reports: Vec::new(),
        }
    }

    /// No monitoring rows; store metadata alone does not count
    pub fn is_empty(&self) -> bool {
        self.status_checks.is_empty() && self.summary_reports.is_empty()
    }

    /// Same contents, stamped as the successor of `previous`
    pub fn succeeding(mut self, previous: u64) -> Self {
        self.revision = previous + 1;
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_slice(bytes)?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    pub(crate) fn check_version(&self) -> Result<(), SnapshotError> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: self.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(())
    }
}
