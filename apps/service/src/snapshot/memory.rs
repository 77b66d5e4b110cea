use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{Snapshot, SnapshotError, SnapshotStore};

/// Process-local snapshot store
///
/// Used for dry runs and tests. Fetch and publish failures can be switched on
/// to exercise the orchestrator's degraded paths.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    slots: Mutex<HashMap<String, Snapshot>>,
    fail_fetch: AtomicBool,
    fail_publish: AtomicBool,
    fetches: AtomicUsize,
    publishes: AtomicUsize,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an already published snapshot
    pub fn with_snapshot(name: &str, snapshot: Snapshot) -> Self {
        let store = Self::new();
        store.lock().insert(name.to_string(), snapshot);
        store
    }

    /// Copy of whatever `source` currently publishes under `name`
    ///
    /// A missing artifact gives an empty store; a read error is returned as is.
    pub async fn mirror(source: &dyn SnapshotStore, name: &str) -> Result<Self, SnapshotError> {
        Ok(match source.fetch(name).await? {
            Some(snapshot) => Self::with_snapshot(name, snapshot),
            None => Self::new(),
        })
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Number of `fetch` calls made, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of `publish` calls made, failed ones included
    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    /// Current contents of a slot without counting as a fetch
    pub fn peek(&self, name: &str) -> Option<Snapshot> {
        self.lock().get(name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Snapshot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn fetch(&self, name: &str) -> Result<Option<Snapshot>, SnapshotError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(SnapshotError::Unavailable("fetch disabled".into()));
        }
        Ok(self.lock().get(name).cloned())
    }

    async fn publish(&self, name: &str, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SnapshotError::Unavailable("publish disabled".into()));
        }
        self.lock().insert(name.to_string(), snapshot.clone());
        Ok(())
    }

    async fn current_revision(&self, name: &str) -> Result<Option<u64>, SnapshotError> {
        Ok(self.lock().get(name).map(|snapshot| snapshot.revision))
    }
}
