//! Session façade wiring the cache, transaction manager, and monitor to one
//! gateway.

use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::cache::lock::{rw_read, rw_write};
use crate::cache::{CacheSnapshotStore, RecordCache, credential_fingerprint};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::gateway::{
    CollectionQuery, CollectionQueryResult, HttpGateway, RecordGateway, SearchRequest,
    SearchResponse,
};
use crate::monitor::ChangeMonitor;
use crate::record::{RecordKey, RecordMap, Table};
use crate::transaction::{ParentLink, TransactionManager};

const SOURCE: &str = "client";

/// Who this session is, discovered from a bootstrap record map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionIdentity {
    pub user_id: Option<String>,
    pub space_id: Option<String>,
}

/// One client session against one remote authority.
pub struct Client {
    config: ClientConfig,
    gateway: Arc<dyn RecordGateway>,
    cache: Arc<RecordCache>,
    transactions: TransactionManager,
    monitor: ChangeMonitor,
    snapshots: Option<CacheSnapshotStore>,
    identity: RwLock<SessionIdentity>,
}

impl Client {
    /// Build a session over a caller-supplied gateway. On-disk snapshots
    /// require an explicit `cache_fingerprint` on this path, since there is
    /// no credential to derive one from.
    pub fn new(config: ClientConfig, gateway: Arc<dyn RecordGateway>) -> Result<Self> {
        let fingerprint = config.cache_fingerprint.clone();
        Self::build(config, gateway, fingerprint)
    }

    /// Build a session over the HTTP gateway. The snapshot fingerprint
    /// defaults to a digest of the credential, so the credential itself
    /// never names a file on disk.
    pub fn with_http_gateway(config: ClientConfig, token: &str) -> Result<Self> {
        let gateway = Arc::new(HttpGateway::new(&config, token)?);
        let fingerprint = config
            .cache_fingerprint
            .clone()
            .or_else(|| Some(credential_fingerprint(token)));
        Self::build(config, gateway, fingerprint)
    }

    fn build(
        config: ClientConfig,
        gateway: Arc<dyn RecordGateway>,
        fingerprint: Option<String>,
    ) -> Result<Self> {
        let snapshots = match (&config.persist_dir, fingerprint) {
            (Some(dir), Some(fingerprint)) => Some(CacheSnapshotStore::new(dir, &fingerprint)),
            (Some(_), None) => {
                return Err(Error::configuration(
                    "persist_dir is set but no cache_fingerprint is available",
                ));
            }
            (None, _) => None,
        };

        let cache = Arc::new(RecordCache::new(&config));
        let transactions = TransactionManager::new(Arc::clone(&gateway), Arc::clone(&cache));
        let monitor = ChangeMonitor::new(
            Arc::clone(&gateway),
            Arc::clone(&cache),
            config.poll_interval(),
            config.fetch_limit,
        );

        Ok(Self {
            config,
            gateway,
            cache,
            transactions,
            monitor,
            snapshots,
            identity: RwLock::new(SessionIdentity::default()),
        })
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn monitor(&self) -> &ChangeMonitor {
        &self.monitor
    }

    pub fn identity(&self) -> SessionIdentity {
        rw_read(&self.identity, SOURCE, "identity").clone()
    }

    /// Ingest the record map a bootstrap call returned: store every record,
    /// then derive the session's user and space ids from it.
    ///
    /// Some sessions (guests) receive a record map with no `space` entries
    /// at all; the space linkage then lives on `space_view` records instead,
    /// so the fallback reads `space_id` from those and fetches the spaces
    /// explicitly.
    pub async fn ingest_bootstrap(&self, map: &RecordMap) -> Result<SessionIdentity> {
        self.cache.store_record_map(map);

        let user_id = map.first_id(&Table::user()).map(str::to_string);
        let space_id = match map.first_id(&Table::space()) {
            Some(id) => Some(id.to_string()),
            None => self.resolve_space_via_alternate(map).await?,
        };

        if let Some(user_id) = &user_id {
            self.transactions.set_acting_user(user_id.clone());
        }
        let identity = SessionIdentity { user_id, space_id };
        info!(
            user = identity.user_id.as_deref().unwrap_or("<none>"),
            space = identity.space_id.as_deref().unwrap_or("<none>"),
            "session bootstrapped"
        );
        *rw_write(&self.identity, SOURCE, "ingest_bootstrap") = identity.clone();
        Ok(identity)
    }

    /// Guest-session fallback: pull space ids off `space_view` records and
    /// fetch the first referenced space.
    async fn resolve_space_via_alternate(&self, map: &RecordMap) -> Result<Option<String>> {
        let space_view = Table::space_view();
        let Some(table) = map.0.get(&space_view) else {
            return Ok(None);
        };

        let mut space_ids: Vec<String> = Vec::new();
        for record in table.values().flatten() {
            if let Some(id) = record
                .value
                .as_ref()
                .and_then(|value| value.get("space_id"))
                .and_then(serde_json::Value::as_str)
                && !space_ids.iter().any(|seen| seen == id)
            {
                space_ids.push(id.to_string());
            }
        }
        if space_ids.is_empty() {
            return Ok(None);
        }
        debug!(
            spaces = space_ids.len(),
            "resolving spaces via space_view linkage"
        );

        let keys: Vec<RecordKey> = space_ids
            .iter()
            .map(|id| RecordKey::new(Table::space(), id.clone()))
            .collect();
        self.cache
            .refresh(self.gateway.as_ref(), &keys, self.config.fetch_limit)
            .await?;
        Ok(space_ids.into_iter().next())
    }

    /// Cached value of a record, fetching on miss or staleness.
    pub async fn get_record(
        &self,
        table: impl Into<Table>,
        id: impl Into<String>,
    ) -> Result<Option<serde_json::Value>> {
        let key = RecordKey::new(table, id);
        self.cache
            .get(self.gateway.as_ref(), &key, false, self.config.fetch_limit)
            .await
    }

    /// Like [`get_record`](Self::get_record) but always round-trips.
    pub async fn refresh_record(
        &self,
        table: impl Into<Table>,
        id: impl Into<String>,
    ) -> Result<Option<serde_json::Value>> {
        let key = RecordKey::new(table, id);
        self.cache
            .get(self.gateway.as_ref(), &key, true, self.config.fetch_limit)
            .await
    }

    /// Fetch a record that must exist; a confirmed absence is `NotFound`.
    pub async fn require_record(
        &self,
        table: impl Into<Table>,
        id: impl Into<String>,
    ) -> Result<serde_json::Value> {
        let key = RecordKey::new(table, id);
        self.cache
            .get(self.gateway.as_ref(), &key, false, self.config.fetch_limit)
            .await?
            .ok_or_else(|| Error::not_found(key.table.as_str(), key.id.clone()))
    }

    /// Refresh a batch of records in one gateway call.
    pub async fn refresh_records(&self, keys: &[RecordKey]) -> Result<()> {
        self.cache
            .refresh(self.gateway.as_ref(), keys, self.config.fetch_limit)
            .await?;
        Ok(())
    }

    /// Create a record under `parent`; see
    /// [`TransactionManager::create_record`].
    pub async fn create_record(
        &self,
        table: impl Into<Table>,
        parent: &ParentLink,
        fields: serde_json::Value,
    ) -> Result<String> {
        self.transactions
            .create_record(table.into(), parent, fields)
            .await
    }

    /// Full-text search. The record-map fragment riding along with the hits
    /// is merged into the cache before the results are returned, so hit ids
    /// resolve locally.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let response = self.gateway.search(request).await?;
        self.cache.store_record_map(&response.record_map);
        Ok(response)
    }

    /// Run a collection query; like search, the returned record-map fragment
    /// is merged into the cache first.
    pub async fn query_collection(&self, query: &CollectionQuery) -> Result<CollectionQueryResult> {
        let result = self.gateway.query_collection(query).await?;
        self.cache.store_record_map(&result.record_map);
        Ok(result)
    }

    /// Load the on-disk snapshot, if persistence is configured. Returns how
    /// many records were merged.
    pub fn load_snapshot(&self) -> Result<usize> {
        match &self.snapshots {
            Some(store) => store.load(&self.cache),
            None => Ok(0),
        }
    }

    /// Write the cache to disk, if persistence is configured.
    pub fn save_snapshot(&self) -> Result<()> {
        match &self.snapshots {
            Some(store) => store.save(&self.cache),
            None => Ok(()),
        }
    }
}
