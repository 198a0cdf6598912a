//! Change monitor: background polling for watched records.
//!
//! The monitor re-fetches every watched record on a fixed cadence and merges
//! the responses into the cache. Merging goes through the same stale-write
//! rule as local commits, so a poll racing a commit can never regress a
//! record; observers only fire for merges the cache actually applied.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::cache::lock::{mutex_lock, rw_read, rw_write};
use crate::cache::{RecordCache, RecordChange};
use crate::error::{Error, Result};
use crate::gateway::RecordGateway;
use crate::record::RecordKey;

const SOURCE: &str = "monitor";

const METRIC_POLL: &str = "quaderno_monitor_poll_total";
const METRIC_CHANGE: &str = "quaderno_monitor_change_total";

pub type ChangeObserver = Box<dyn Fn(&RecordChange) + Send + Sync>;
pub type ErrorObserver = Box<dyn Fn(&Error) + Send + Sync>;

/// State shared between the owning client and the background poll task.
struct MonitorShared {
    gateway: Arc<dyn RecordGateway>,
    cache: Arc<RecordCache>,
    fetch_limit: usize,
    watched: RwLock<BTreeSet<RecordKey>>,
    change_observers: RwLock<Vec<ChangeObserver>>,
    error_observers: RwLock<Vec<ErrorObserver>>,
    running: AtomicBool,
}

impl MonitorShared {
    fn notify_changes(&self, changes: &[RecordChange]) {
        if changes.is_empty() {
            return;
        }
        counter!(METRIC_CHANGE).increment(changes.len() as u64);
        let observers = rw_read(&self.change_observers, SOURCE, "notify_changes");
        for change in changes {
            for observer in observers.iter() {
                observer(change);
            }
        }
    }

    fn notify_error(&self, err: &Error) {
        for observer in rw_read(&self.error_observers, SOURCE, "notify_error").iter() {
            observer(err);
        }
    }

    async fn poll_once(&self) -> Result<Vec<RecordChange>> {
        let keys: Vec<RecordKey> = rw_read(&self.watched, SOURCE, "poll_once")
            .iter()
            .cloned()
            .collect();
        counter!(METRIC_POLL).increment(1);
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let changes = self
            .cache
            .refresh(self.gateway.as_ref(), &keys, self.fetch_limit)
            .await?;
        debug!(
            watched = keys.len(),
            changed = changes.len(),
            "poll completed"
        );
        self.notify_changes(&changes);
        Ok(changes)
    }
}

struct Poller {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Polls watched records in the background and fires change observers.
pub struct ChangeMonitor {
    shared: Arc<MonitorShared>,
    poll_interval: Duration,
    poller: Mutex<Option<Poller>>,
}

impl ChangeMonitor {
    pub fn new(
        gateway: Arc<dyn RecordGateway>,
        cache: Arc<RecordCache>,
        poll_interval: Duration,
        fetch_limit: usize,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                gateway,
                cache,
                fetch_limit,
                watched: RwLock::new(BTreeSet::new()),
                change_observers: RwLock::new(Vec::new()),
                error_observers: RwLock::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
            poll_interval,
            poller: Mutex::new(None),
        }
    }

    /// Add a record to the watch set. Idempotent.
    pub fn watch(&self, key: RecordKey) {
        rw_write(&self.shared.watched, SOURCE, "watch").insert(key);
    }

    pub fn watch_all(&self, keys: impl IntoIterator<Item = RecordKey>) {
        let mut watched = rw_write(&self.shared.watched, SOURCE, "watch_all");
        watched.extend(keys);
    }

    /// Remove a record from the watch set. Unknown keys are ignored.
    pub fn unwatch(&self, key: &RecordKey) {
        rw_write(&self.shared.watched, SOURCE, "unwatch").remove(key);
    }

    pub fn watched(&self) -> Vec<RecordKey> {
        rw_read(&self.shared.watched, SOURCE, "watched")
            .iter()
            .cloned()
            .collect()
    }

    /// Register an observer fired once per applied change, from the poll
    /// task's context. Observers must not block.
    pub fn on_change(&self, observer: impl Fn(&RecordChange) + Send + Sync + 'static) {
        rw_write(&self.shared.change_observers, SOURCE, "on_change").push(Box::new(observer));
    }

    /// Register an observer fired when the poll loop stops on a fault.
    pub fn on_error(&self, observer: impl Fn(&Error) + Send + Sync + 'static) {
        rw_write(&self.shared.error_observers, SOURCE, "on_error").push(Box::new(observer));
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Fetch every watched record once, in one batched gateway call, and
    /// fire change observers for the merges the cache applied.
    pub async fn poll_once(&self) -> Result<Vec<RecordChange>> {
        self.shared.poll_once().await
    }

    /// Spawn the background poll loop. Starting an already-running monitor
    /// is a no-op; after a fault stopped the loop, `start` spawns a fresh
    /// one.
    pub fn start(&self) {
        let mut poller = mutex_lock(&self.poller, SOURCE, "start");
        if poller.is_some() {
            if self.shared.running.load(Ordering::SeqCst) {
                return;
            }
            // the loop exited on a fault; the task is done polling, so the
            // stale handle can be dropped and replaced
            *poller = None;
        }
        self.shared.running.store(true, Ordering::SeqCst);

        let (shutdown, mut stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick fires immediately; wait a full interval instead
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        match shared.poll_once().await {
                            Ok(_) => {}
                            Err(err) if err.is_transient() => {
                                warn!(error = %err, "poll failed; will retry next tick");
                            }
                            Err(err) => {
                                error!(error = %err, "poll loop stopping on fault");
                                let fault = Error::monitor_fault(err.to_string());
                                shared.notify_error(&fault);
                                break;
                            }
                        }
                    }
                }
            }
            shared.running.store(false, Ordering::SeqCst);
        });

        *poller = Some(Poller { shutdown, handle });
    }

    /// Stop the background poll loop and wait for it to finish. Any poll in
    /// flight completes (and its observers fire) before this returns; no
    /// poll starts afterwards.
    pub async fn stop(&self) {
        let poller = mutex_lock(&self.poller, SOURCE, "stop").take();
        let Some(poller) = poller else {
            return;
        };
        let _ = poller.shutdown.send(true);
        if let Err(err) = poller.handle.await {
            warn!(error = %err, "poll task ended abnormally");
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        // without a stop() the task would poll an orphaned watch set forever
        if let Some(poller) = mutex_lock(&self.poller, SOURCE, "drop").take() {
            poller.handle.abort();
        }
    }
}
