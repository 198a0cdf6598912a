//! Record cache: versioned in-memory store with stale-write protection.
//!
//! The cache is the only resource shared between the foreground session and
//! the background change monitor. Every mutating path funnels through the
//! per-key read-version/compare/write sequence under one lock, so concurrent
//! updates to the same key never interleave into a torn write.

pub(crate) mod lock;
mod ops;
mod persist;
mod store;

pub use persist::{CacheSnapshotStore, credential_fingerprint};
pub use store::{CachedSnapshot, RecordCache, RecordChange, StoreOutcome};
