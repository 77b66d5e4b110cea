use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{Snapshot, SnapshotError, SnapshotStore};

/// On-disk wrapper around the snapshot payload
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    name: String,
    revision: u64,
    published_at: DateTime<Utc>,
    /// Hex SHA-256 of the exact payload text
    checksum: String,
    payload: Box<RawValue>,
}

/// Snapshot store keeping `<directory>/<name>.json`
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a half-written artifact.
pub struct FileSnapshotStore {
    directory: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the artifact published under `name`
    pub fn path_for(&self, name: &str) -> Result<PathBuf, SnapshotError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(SnapshotError::Unavailable(format!("invalid snapshot name '{name}'")));
        }
        Ok(self.directory.join(format!("{name}.json")))
    }

    async fn read_envelope(&self, name: &str) -> Result<Option<Envelope>, SnapshotError> {
        let path = self.path_for(name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No snapshot artifact found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|e| {
            SnapshotError::Corrupt { name: name.to_string(), reason: e.to_string() }
        })?;

        let actual = checksum(envelope.payload.get());
        if actual != envelope.checksum {
            return Err(SnapshotError::Corrupt {
                name: name.to_string(),
                reason: format!("checksum mismatch (expected {}, got {actual})", envelope.checksum),
            });
        }
        Ok(Some(envelope))
    }
}

fn checksum(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn fetch(&self, name: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let Some(envelope) = self.read_envelope(name).await? else {
            return Ok(None);
        };

        let snapshot: Snapshot = serde_json::from_str(envelope.payload.get()).map_err(|e| {
            SnapshotError::Corrupt { name: name.to_string(), reason: e.to_string() }
        })?;
        snapshot.check_version()?;

        debug!(
            snapshot = name,
            revision = snapshot.revision,
            published_at = %envelope.published_at,
            "Fetched snapshot"
        );
        Ok(Some(snapshot))
    }

    async fn publish(&self, name: &str, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let path = self.path_for(name)?;
        let payload = String::from_utf8(snapshot.to_bytes()?).map_err(|e| {
            SnapshotError::Corrupt { name: name.to_string(), reason: e.to_string() }
        })?;

        let envelope = Envelope {
            name: name.to_string(),
            revision: snapshot.revision,
            published_at: Utc::now(),
            checksum: checksum(&payload),
            payload: RawValue::from_string(payload)?,
        };
        let bytes = serde_json::to_vec(&envelope)?;

        tokio::fs::create_dir_all(&self.directory).await?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &path).await?;

        info!(
            snapshot = name,
            revision = snapshot.revision,
            bytes = bytes.len(),
            path = %path.display(),
            "Published snapshot"
        );
        Ok(())
    }

    async fn current_revision(&self, name: &str) -> Result<Option<u64>, SnapshotError> {
        Ok(self.read_envelope(name).await?.map(|envelope| envelope.revision))
    }
}
