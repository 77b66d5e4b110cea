use async_trait::async_trait;

use super::{Snapshot, SnapshotError};

/// Named blob store holding one snapshot per name
///
/// `fetch` returning `Ok(None)` means the name has never been published or the
/// artifact expired. Callers treat that as "start from an empty database",
/// never as a failure.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Retrieve the latest published snapshot for `name`
    async fn fetch(&self, name: &str) -> Result<Option<Snapshot>, SnapshotError>;

    /// Replace whatever is stored under `name`
    async fn publish(&self, name: &str, snapshot: &Snapshot) -> Result<(), SnapshotError>;

    /// Revision currently stored under `name`, used to detect overlapping runs
    async fn current_revision(&self, name: &str) -> Result<Option<u64>, SnapshotError> {
        Ok(self.fetch(name).await?.map(|snapshot| snapshot.revision))
    }
}
