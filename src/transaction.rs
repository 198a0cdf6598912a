//! Transaction manager: buffers mutations and commits them atomically.
//!
//! A transaction is a buffering boundary, not a lock: operations submitted
//! inside an open scope accumulate on this manager instance and are sent as
//! one commit when the outermost scope closes cleanly. The open-transaction
//! state lives here, never on ambient/global state, so independent client
//! sessions cannot interfere with one another.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use metrics::histogram;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::RecordCache;
use crate::cache::lock::{mutex_lock, rw_read, rw_write};
use crate::error::{Error, Result};
use crate::gateway::RecordGateway;
use crate::record::{Operation, Table, last_edited_stamp, now_ms};

const SOURCE: &str = "transaction";

const METRIC_COMMIT_MS: &str = "quaderno_commit_ms";

/// Parent linkage for a freshly created record.
#[derive(Debug, Clone)]
pub struct ParentLink {
    pub table: Table,
    pub id: String,
    /// Field on the parent holding its ordered child-id list. When set, the
    /// new record's id is appended there in the same commit that creates it.
    pub child_list_key: Option<String>,
}

impl ParentLink {
    pub fn new(table: impl Into<Table>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
            child_list_key: None,
        }
    }

    pub fn with_child_list_key(mut self, key: impl Into<String>) -> Self {
        self.child_list_key = Some(key.into());
        self
    }
}

/// Accumulates operations and commits them as atomic batches.
pub struct TransactionManager {
    gateway: Arc<dyn RecordGateway>,
    cache: Arc<RecordCache>,
    /// `Some` while a transaction scope is open.
    pending: Mutex<Option<Vec<Operation>>>,
    acting_user: RwLock<Option<String>>,
}

/// Clears the open-transaction state when a scope unwinds without reaching
/// the commit path, discarding whatever was buffered.
struct PendingScopeGuard<'a> {
    pending: &'a Mutex<Option<Vec<Operation>>>,
    armed: bool,
}

impl Drop for PendingScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let discarded = mutex_lock(self.pending, SOURCE, "scope_guard.drop").take();
        if let Some(operations) = discarded
            && !operations.is_empty()
        {
            warn!(
                discarded = operations.len(),
                "discarding buffered operations from failed transaction scope"
            );
        }
    }
}

impl TransactionManager {
    pub fn new(gateway: Arc<dyn RecordGateway>, cache: Arc<RecordCache>) -> Self {
        Self {
            gateway,
            cache,
            pending: Mutex::new(None),
            acting_user: RwLock::new(None),
        }
    }

    /// Record the user on whose behalf mutations are stamped.
    pub fn set_acting_user(&self, user_id: impl Into<String>) {
        *rw_write(&self.acting_user, SOURCE, "set_acting_user") = Some(user_id.into());
    }

    pub fn acting_user(&self) -> Option<String> {
        rw_read(&self.acting_user, SOURCE, "acting_user").clone()
    }

    pub fn in_transaction(&self) -> bool {
        mutex_lock(&self.pending, SOURCE, "in_transaction").is_some()
    }

    /// Submit a batch of operations.
    ///
    /// Inside an open transaction scope the batch is buffered and this call
    /// returns immediately; otherwise the call is itself the whole
    /// transaction and commits synchronously. With `update_last_edited`,
    /// exactly one last-edited stamp is appended per distinct block id the
    /// batch touches.
    pub async fn submit(&self, operations: Vec<Operation>, update_last_edited: bool) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }
        let operations = if update_last_edited {
            self.with_last_edited_stamps(operations)
        } else {
            operations
        };

        {
            let mut pending = mutex_lock(&self.pending, SOURCE, "submit");
            if let Some(buffer) = pending.as_mut() {
                debug!(
                    buffered = operations.len(),
                    total = buffer.len() + operations.len(),
                    "buffered operations into open transaction"
                );
                buffer.extend(operations);
                return Ok(());
            }
        }

        self.commit(operations).await
    }

    /// Run `scope` inside an atomic transaction.
    ///
    /// Opening while a scope is already open flattens into the outer one:
    /// the nested call neither commits nor clears anything. When the
    /// outermost scope closes with `Ok`, buffered operations are sent as one
    /// commit and then applied to the cache; when it closes with `Err` (or
    /// unwinds), they are discarded and nothing is sent. The open flag is
    /// cleared on every exit path.
    pub async fn transact<T, Fut>(&self, scope: impl FnOnce() -> Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let outermost = {
            let mut pending = mutex_lock(&self.pending, SOURCE, "transact.open");
            if pending.is_none() {
                *pending = Some(Vec::new());
                true
            } else {
                false
            }
        };

        if !outermost {
            // nested scope: defer entirely to the outer one
            return scope().await;
        }

        let mut guard = PendingScopeGuard {
            pending: &self.pending,
            armed: true,
        };

        match scope().await {
            Ok(value) => {
                let operations = mutex_lock(&self.pending, SOURCE, "transact.close")
                    .take()
                    .unwrap_or_default();
                guard.armed = false;
                self.commit(operations).await?;
                Ok(value)
            }
            // the guard discards the buffer and clears the flag
            Err(err) => Err(err),
        }
    }

    /// Create a record with a fresh globally-unique id.
    ///
    /// Builds the base field set, merges `fields` over it, and, within one
    /// atomic scope, creates the record and, when the parent names a
    /// child-list key, appends the id to the parent's child list. Both land
    /// in the same commit or not at all.
    pub async fn create_record(
        &self,
        table: Table,
        parent: &ParentLink,
        fields: Value,
    ) -> Result<String> {
        let Some(user_id) = self.acting_user() else {
            return Err(Error::configuration(
                "create_record requires an acting user; ingest a bootstrap record map or call set_acting_user first",
            ));
        };

        let record_id = Uuid::new_v4().to_string();
        let mut args = Map::new();
        args.insert("id".to_string(), json!(record_id));
        args.insert("version".to_string(), json!(1));
        args.insert("alive".to_string(), json!(true));
        args.insert("created_by_id".to_string(), json!(user_id));
        args.insert("created_by_table".to_string(), json!("notion_user"));
        args.insert("created_time".to_string(), json!(now_ms()));
        args.insert("parent_id".to_string(), json!(parent.id));
        args.insert("parent_table".to_string(), json!(parent.table.as_str()));
        if let Value::Object(extra) = fields {
            for (field, value) in extra {
                args.insert(field, value);
            }
        }
        let args = Value::Object(args);

        self.transact(|| async {
            self.submit(
                vec![Operation::set(table.clone(), record_id.clone(), Vec::new(), args.clone())],
                true,
            )
            .await?;

            if let Some(child_list_key) = &parent.child_list_key {
                self.submit(
                    vec![Operation::list_after(
                        parent.table.clone(),
                        parent.id.clone(),
                        vec![child_list_key.clone()],
                        &record_id,
                        None,
                    )],
                    true,
                )
                .await?;
            }
            Ok(())
        })
        .await?;

        Ok(record_id)
    }

    async fn commit(&self, operations: Vec<Operation>) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }
        let started_at = Instant::now();

        self.gateway.submit_transaction(&operations).await?;
        self.cache.run_local_operations(&operations)?;

        histogram!(METRIC_COMMIT_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        debug!(operations = operations.len(), "transaction committed");
        Ok(())
    }

    fn with_last_edited_stamps(&self, mut operations: Vec<Operation>) -> Vec<Operation> {
        let Some(user_id) = self.acting_user() else {
            debug!("skipping last-edited stamps: no acting user recorded");
            return operations;
        };

        let block = Table::block();
        let mut seen = HashSet::new();
        let touched: Vec<String> = operations
            .iter()
            .filter(|op| op.table == block)
            .map(|op| op.id.clone())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        operations.extend(touched.iter().map(|id| last_edited_stamp(&user_id, id)));
        operations
    }
}
