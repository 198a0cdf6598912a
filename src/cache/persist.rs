//! Optional on-disk snapshots of the record cache.
//!
//! Snapshots are keyed by a fingerprint (caller-supplied or derived from
//! the session credential) so distinct sessions never share state. Loaded
//! entries are trusted as of their stored version until the first refresh;
//! the stale-write rule still applies on load, so a snapshot can never
//! clobber fresher in-memory state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{Error, Result};
use crate::record::{RecordKey, Table};

use super::store::RecordCache;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    table: String,
    id: String,
    value: Option<Value>,
    version: i64,
}

/// Fingerprint derived from a session credential, used as the snapshot file
/// name so the credential itself never lands on disk.
pub fn credential_fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Reads and writes cache snapshot files for one fingerprint.
pub struct CacheSnapshotStore {
    path: PathBuf,
}

impl CacheSnapshotStore {
    pub fn new(dir: impl AsRef<Path>, fingerprint: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{fingerprint}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every cached `{table, id, value, version}` tuple to disk.
    pub fn save(&self, cache: &RecordCache) -> Result<()> {
        let entries: Vec<PersistedRecord> = cache
            .export()
            .into_iter()
            .map(|(key, value, version)| PersistedRecord {
                table: key.table.as_str().to_string(),
                id: key.id,
                value,
                version,
            })
            .collect();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| Error::persistence(format!("cannot create snapshot dir: {err}")))?;
        }
        let payload = serde_json::to_vec(&entries)
            .map_err(|err| Error::persistence(format!("cannot encode snapshot: {err}")))?;
        fs::write(&self.path, payload).map_err(|err| {
            Error::persistence(format!("cannot write `{}`: {err}", self.path.display()))
        })?;

        info!(
            path = %self.path.display(),
            records = entries.len(),
            "cache snapshot written"
        );
        Ok(())
    }

    /// Merge a snapshot file into the cache. Missing files are not an error;
    /// a fresh session simply starts cold.
    pub fn load(&self, cache: &RecordCache) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let payload = fs::read(&self.path).map_err(|err| {
            Error::persistence(format!("cannot read `{}`: {err}", self.path.display()))
        })?;
        let entries: Vec<PersistedRecord> = serde_json::from_slice(&payload)
            .map_err(|err| Error::persistence(format!("corrupt snapshot: {err}")))?;

        let loaded = entries.len();
        for entry in entries {
            let key = RecordKey::new(Table::new(entry.table), entry.id);
            cache.store(&key, entry.value, entry.version);
        }

        info!(path = %self.path.display(), records = loaded, "cache snapshot loaded");
        Ok(loaded)
    }
}
