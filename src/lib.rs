//! Client-side consistency layer for a remote document graph.
//!
//! The remote authority owns the truth: versioned records living in tables,
//! mutated through atomic operation batches. This crate keeps one session's
//! view of those records coherent. Fetched records land in a versioned
//! [`cache::RecordCache`] where a stale-write rule keeps merges monotone;
//! local mutations buffer in the [`transaction::TransactionManager`] and
//! commit as atomic batches; a background [`monitor::ChangeMonitor`] polls
//! watched records and reconciles externally-originated changes back into
//! the cache. [`client::Client`] wires the pieces to a
//! [`gateway::RecordGateway`].

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod monitor;
pub mod record;
pub mod registry;
pub mod transaction;

pub use cache::{CachedSnapshot, RecordCache, RecordChange, StoreOutcome};
pub use client::{Client, SessionIdentity};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use gateway::{
    CollectionQuery, CollectionQueryResult, HttpGateway, RecordGateway, SearchRequest,
    SearchResponse,
};
pub use monitor::ChangeMonitor;
pub use record::{OpCommand, Operation, RecordKey, RecordMap, Table, VersionedRecord};
pub use registry::{BlockKind, RecordKind, classify};
pub use transaction::{ParentLink, TransactionManager};
