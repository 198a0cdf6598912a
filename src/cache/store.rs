//! The record cache proper.
//!
//! Maps `(table, id)` to versioned record values. Version numbers are
//! monotonically non-decreasing per key as observed by this client: any merge
//! carrying a version not newer than the cached one is discarded as a stale
//! write, regardless of whether it arrived from a local commit or a monitor
//! poll. That comparison is the sole safety net between the two execution
//! contexts and therefore lives inside the per-key critical section.

use std::sync::RwLock;
use std::time::Instant;

use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::gateway::RecordGateway;
use crate::record::{Operation, RecordKey, RecordMap, Table};

use super::lock::{rw_read, rw_write};
use super::ops;

const SOURCE: &str = "cache::store";

const METRIC_HIT: &str = "quaderno_cache_hit_total";
const METRIC_MISS: &str = "quaderno_cache_miss_total";
const METRIC_STALE_DROP: &str = "quaderno_cache_stale_drop_total";

struct CachedRecord {
    value: Option<Value>,
    version: i64,
    dirty: bool,
    last_access: Instant,
}

/// Point-in-time view of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSnapshot {
    pub value: Option<Value>,
    pub version: i64,
    pub dirty: bool,
}

/// One merged update, reported so change observers can fire.
#[derive(Debug, Clone)]
pub struct RecordChange {
    pub key: RecordKey,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Result of a single versioned store.
#[derive(Debug, PartialEq)]
pub enum StoreOutcome {
    Applied { previous: Option<Value> },
    Stale { cached_version: i64 },
}

/// In-memory record cache with least-recently-accessed eviction.
pub struct RecordCache {
    records: RwLock<LruCache<RecordKey, CachedRecord>>,
}

impl RecordCache {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            records: RwLock::new(LruCache::new(config.max_records_non_zero())),
        }
    }

    /// Current view of a cached entry, promoting its recency. `None` means
    /// the record was never fetched (or has been evicted).
    pub fn snapshot(&self, key: &RecordKey) -> Option<CachedSnapshot> {
        let mut records = rw_write(&self.records, SOURCE, "snapshot");
        let record = records.get_mut(key)?;
        record.last_access = Instant::now();
        Some(CachedSnapshot {
            value: record.value.clone(),
            version: record.version,
            dirty: record.dirty,
        })
    }

    /// Cached version of a key without promoting it.
    pub fn version_of(&self, key: &RecordKey) -> Option<i64> {
        rw_read(&self.records, SOURCE, "version_of")
            .peek(key)
            .map(|record| record.version)
    }

    /// Merge one versioned value under the stale-write rule.
    pub fn store(&self, key: &RecordKey, value: Option<Value>, version: i64) -> StoreOutcome {
        let mut records = rw_write(&self.records, SOURCE, "store");
        if let Some(existing) = records.peek(key)
            && existing.version >= version
        {
            counter!(METRIC_STALE_DROP).increment(1);
            debug!(
                key = %key,
                cached_version = existing.version,
                incoming_version = version,
                "discarding stale write"
            );
            return StoreOutcome::Stale {
                cached_version: existing.version,
            };
        }
        let previous = records.put(
            key.clone(),
            CachedRecord {
                value,
                version,
                dirty: false,
                last_access: Instant::now(),
            },
        );
        StoreOutcome::Applied {
            previous: previous.and_then(|record| record.value),
        }
    }

    /// Record a confirmed absence. The cached version is retained so a later
    /// stale fetch cannot resurrect the value; returns the previous value if
    /// one was displaced.
    pub fn store_absent(&self, key: &RecordKey) -> Option<Value> {
        let mut records = rw_write(&self.records, SOURCE, "store_absent");
        match records.get_mut(key) {
            Some(record) => {
                record.dirty = false;
                record.last_access = Instant::now();
                record.value.take()
            }
            None => {
                records.put(
                    key.clone(),
                    CachedRecord {
                        value: None,
                        version: 0,
                        dirty: false,
                        last_access: Instant::now(),
                    },
                );
                None
            }
        }
    }

    /// Merge an externally-supplied batch of records, applying the
    /// stale-write rule per key. Safe to call with partial or overlapping
    /// data; returns the changes that were actually applied.
    pub fn store_record_map(&self, map: &RecordMap) -> Vec<RecordChange> {
        let mut changes = Vec::new();
        for (key, record) in map.records() {
            match record {
                Some(record) => {
                    if let StoreOutcome::Applied { previous } =
                        self.store(&key, record.value.clone(), record.version)
                    {
                        changes.push(RecordChange {
                            key,
                            old: previous,
                            new: record.value.clone(),
                        });
                    }
                }
                None => {
                    if let Some(previous) = self.store_absent(&key) {
                        changes.push(RecordChange {
                            key,
                            old: Some(previous),
                            new: None,
                        });
                    }
                }
            }
        }
        changes
    }

    /// Mark one entry for mandatory refresh on next read. The last-known
    /// value is preserved for optimistic reads until the refresh completes.
    pub fn invalidate(&self, key: &RecordKey) {
        let mut records = rw_write(&self.records, SOURCE, "invalidate");
        if let Some(record) = records.get_mut(key) {
            record.dirty = true;
        }
    }

    /// Mark every entry of a table for mandatory refresh.
    pub fn invalidate_table(&self, table: &Table) {
        let mut records = rw_write(&self.records, SOURCE, "invalidate_table");
        for (key, record) in records.iter_mut() {
            if key.table == *table {
                record.dirty = true;
            }
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        rw_write(&self.records, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.records, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a committed batch to cached values without a round trip.
    ///
    /// The batch is validated up front: an unknown command rejects the whole
    /// batch before anything is touched. Records not present in the cache
    /// (or cached as absent) have nothing to reconcile and are skipped.
    /// Versions are left unchanged; the next poll observes the authority's
    /// new version and the stale-write rule settles any race.
    pub fn run_local_operations(&self, operations: &[Operation]) -> Result<()> {
        ops::ensure_supported(operations)?;
        for op in operations {
            let key = op.key();
            let mut records = rw_write(&self.records, SOURCE, "run_local_operations");
            let Some(record) = records.get_mut(&key) else {
                debug!(key = %key, "skipping local operation for uncached record");
                continue;
            };
            let Some(value) = record.value.as_mut() else {
                continue;
            };
            ops::apply(value, op)?;
            record.last_access = Instant::now();
        }
        Ok(())
    }

    /// Return the cached value, fetching through the gateway on a miss, a
    /// dirty entry, or `force_refresh`. The gateway may return related
    /// records incidentally; all of them are stored, not just the requested
    /// one.
    pub async fn get(
        &self,
        gateway: &dyn RecordGateway,
        key: &RecordKey,
        force_refresh: bool,
        limit: usize,
    ) -> Result<Option<Value>> {
        if !force_refresh
            && let Some(snapshot) = self.snapshot(key)
            && !snapshot.dirty
        {
            counter!(METRIC_HIT).increment(1);
            return Ok(snapshot.value);
        }
        counter!(METRIC_MISS).increment(1);

        let map = gateway
            .get_record_values(std::slice::from_ref(key), limit)
            .await?;
        self.store_record_map(&map);
        if map.get(&key.table, &key.id).is_none() {
            // the authority did not mention the record at all
            self.store_absent(key);
        }
        Ok(self.snapshot(key).and_then(|snapshot| snapshot.value))
    }

    /// Refresh a batch of keys in one gateway call.
    ///
    /// Keys spanning multiple tables are coalesced into a single
    /// heterogeneous `get_record_values` request, bounding the request
    /// amplification a tree of nested records would otherwise cause.
    pub async fn refresh(
        &self,
        gateway: &dyn RecordGateway,
        keys: &[RecordKey],
        limit: usize,
    ) -> Result<Vec<RecordChange>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let map = gateway.get_record_values(keys, limit).await?;
        let mut changes = self.store_record_map(&map);
        for key in keys {
            // a requested key the response omits entirely is as gone as an
            // explicit null entry; observers hear about it the same way
            if map.get(&key.table, &key.id).is_none()
                && let Some(previous) = self.store_absent(key)
            {
                changes.push(RecordChange {
                    key: key.clone(),
                    old: Some(previous),
                    new: None,
                });
            }
        }
        Ok(changes)
    }

    /// All entries, most recently accessed first. Used by snapshot
    /// persistence.
    pub(crate) fn export(&self) -> Vec<(RecordKey, Option<Value>, i64)> {
        rw_read(&self.records, SOURCE, "export")
            .iter()
            .map(|(key, record)| (key.clone(), record.value.clone(), record.version))
            .collect()
    }
}
