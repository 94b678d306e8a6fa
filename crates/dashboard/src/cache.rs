//! Polling cache of remote queries.
//!
//! Each observed key owns one polling task that fetches, stores the outcome
//! and sleeps `poll_interval` measured from fetch completion. Because a key
//! never has more than one task, and the task fetches sequentially, there is
//! never more than one request in flight per key.
//!
//! Invalidation wakes an idle task early; while a fetch is in flight it is
//! coalesced into that fetch. When the last observer of a key goes away the
//! task is aborted and the entry's generation is bumped so a result that
//! still arrives is discarded. The last value is kept until
//! [`SyncCache::collect_garbage`] drops entries unobserved for `gc_time`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jobdash_core::{HealthStatus, JobList, JobStatus};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::query::{CacheEvent, QueryData, QueryKey, QuerySnapshot};
use crate::transport::{ClientError, JobGateway};

const EVENT_CAPACITY: usize = 64;

/// Timing knobs of the cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub poll_interval: Duration,
    pub gc_time: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            gc_time: Duration::from_secs(300),
        }
    }
}

impl From<&ClientConfig> for CacheConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            gc_time: config.gc_time,
        }
    }
}

/// What an invalidation request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// The key was never observed or is not observed now.
    Ignored,
    /// A fetch was already in flight; its completion satisfies the request.
    Coalesced,
    /// An immediate fetch was requested.
    Refetching,
}

struct QueryEntry {
    value: Option<QueryData>,
    fetched_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    resolved: bool,
    interval: Duration,
    dirty: bool,
    in_flight: bool,
    observers: usize,
    generation: u64,
    unobserved_since: Option<Instant>,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl QueryEntry {
    fn new(interval: Duration) -> Self {
        Self {
            value: None,
            fetched_at: None,
            last_error: None,
            resolved: false,
            interval,
            dirty: false,
            in_flight: false,
            observers: 0,
            generation: 0,
            unobserved_since: None,
            wake: Arc::new(Notify::new()),
            task: None,
        }
    }

    fn snapshot(&self) -> QuerySnapshot<QueryData> {
        QuerySnapshot {
            value: self.value.clone(),
            is_stale: self.value.is_some() && self.last_error.is_some(),
            is_loading: !self.resolved,
            is_fetching: self.in_flight,
            last_error: self.last_error.clone(),
            fetched_at: self.fetched_at,
        }
    }
}

struct CacheInner {
    gateway: Arc<dyn JobGateway>,
    config: CacheConfig,
    entries: Mutex<HashMap<QueryKey, QueryEntry>>,
    events: broadcast::Sender<CacheEvent>,
    generations: AtomicU64,
}

impl CacheInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, QueryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn emit(&self, event: CacheEvent) {
        // No receivers is fine: nobody is rendering.
        let _ = self.events.send(event);
    }

    /// Mark a fetch as in flight. Returns `false` when the polling task that
    /// asks is no longer the current one for `key`.
    fn begin_fetch(&self, key: QueryKey, generation: u64) -> bool {
        {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&key) else {
                return false;
            };
            if entry.generation != generation || entry.observers == 0 {
                return false;
            }
            entry.in_flight = true;
            entry.dirty = false;
        }

        tracing::debug!(%key, "fetch started");
        self.emit(CacheEvent::FetchStarted(key));
        true
    }

    /// Apply a fetch outcome and return when the next scheduled fetch is due.
    fn complete_fetch(
        &self,
        key: QueryKey,
        generation: u64,
        outcome: Result<QueryData, ClientError>,
    ) -> Option<Instant> {
        let (event, next_due) = {
            let mut entries = self.entries();
            let entry = entries.get_mut(&key)?;
            if entry.generation != generation {
                tracing::debug!(%key, "discarding result for a query that is no longer observed");
                return None;
            }

            entry.in_flight = false;
            entry.resolved = true;

            let event = match outcome {
                Ok(data) => {
                    entry.value = Some(data);
                    entry.fetched_at = Some(Utc::now());
                    entry.last_error = None;
                    CacheEvent::Updated(key)
                }
                Err(err) => {
                    tracing::warn!(
                        %key,
                        error = %err,
                        stale = entry.value.is_some(),
                        "fetch failed; keeping last good value"
                    );
                    entry.last_error = Some(err.to_string());
                    CacheEvent::FetchFailed(key)
                }
            };
            (event, Instant::now() + entry.interval)
        };

        self.emit(event);
        Some(next_due)
    }

    fn take_refetch_request(&self, key: QueryKey, generation: u64) -> bool {
        self.entries()
            .get(&key)
            .is_some_and(|entry| entry.generation == generation && entry.dirty)
    }
}

/// Keyed store of the latest known value of each observed query.
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct SyncCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for SyncCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.inner.entries().keys().map(|k| k.to_string()).collect();
        f.debug_struct("SyncCache")
            .field("config", &self.inner.config)
            .field("keys", &keys)
            .finish()
    }
}

impl SyncCache {
    pub fn new(gateway: Arc<dyn JobGateway>, config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                gateway,
                config,
                entries: Mutex::new(HashMap::new()),
                events,
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Change notifications for every key.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Start observing `key`.
    ///
    /// The first observer starts the key's polling task, which fetches
    /// immediately. Polling lasts until every returned [`Subscription`] is
    /// dropped. Must be called from within a tokio runtime.
    pub fn observe(&self, key: QueryKey) -> Subscription {
        self.collect_garbage();

        let mut entries = self.inner.entries();
        let entry = entries
            .entry(key)
            .or_insert_with(|| QueryEntry::new(self.inner.config.poll_interval));

        entry.observers += 1;
        if entry.observers == 1 {
            entry.generation = self.inner.next_generation();
            entry.unobserved_since = None;
            entry.dirty = false;
            entry.in_flight = false;
            entry.wake = Arc::new(Notify::new());
            entry.task = Some(tokio::spawn(poll_loop(
                Arc::downgrade(&self.inner),
                key,
                entry.generation,
                entry.wake.clone(),
            )));
            tracing::debug!(%key, "query observed; polling started");
        }

        Subscription {
            cache: self.clone(),
            key,
        }
    }

    fn release(&self, key: QueryKey) {
        let mut entries = self.inner.entries();
        let Some(entry) = entries.get_mut(&key) else {
            return;
        };

        entry.observers = entry.observers.saturating_sub(1);
        if entry.observers > 0 {
            return;
        }

        if let Some(task) = entry.task.take() {
            task.abort();
        }
        entry.generation = self.inner.next_generation();
        entry.in_flight = false;
        entry.dirty = false;
        entry.unobserved_since = Some(Instant::now());
        tracing::debug!(%key, "query no longer observed; polling stopped");
    }

    /// Ask for `key` to be refreshed before its next scheduled tick.
    pub fn invalidate(&self, key: QueryKey) -> Invalidation {
        let mut entries = self.inner.entries();
        match entries.get_mut(&key) {
            Some(entry) => invalidate_entry(key, entry),
            None => {
                tracing::debug!(%key, "invalidation ignored: key never observed");
                Invalidation::Ignored
            }
        }
    }

    /// Invalidate every known key matching `predicate`.
    pub fn invalidate_where(
        &self,
        predicate: impl Fn(&QueryKey) -> bool,
    ) -> Vec<(QueryKey, Invalidation)> {
        let mut entries = self.inner.entries();
        entries
            .iter_mut()
            .filter(|(key, _)| predicate(key))
            .map(|(key, entry)| (*key, invalidate_entry(*key, entry)))
            .collect()
    }

    pub fn snapshot(&self, key: QueryKey) -> QuerySnapshot<QueryData> {
        self.inner
            .entries()
            .get(&key)
            .map(QueryEntry::snapshot)
            .unwrap_or_else(QuerySnapshot::loading)
    }

    pub fn health(&self) -> QuerySnapshot<HealthStatus> {
        self.snapshot(QueryKey::Health)
            .map(|data| data.as_health().cloned())
    }

    pub fn jobs(&self, filter: Option<JobStatus>) -> QuerySnapshot<JobList> {
        self.snapshot(QueryKey::Jobs(filter))
            .map(|data| data.as_jobs().cloned())
    }

    /// Keys with at least one observer.
    pub fn observed_keys(&self) -> Vec<QueryKey> {
        self.inner
            .entries()
            .iter()
            .filter(|(_, entry)| entry.observers > 0)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Whether the cache holds an entry (observed or retained) for `key`.
    pub fn contains(&self, key: QueryKey) -> bool {
        self.inner.entries().contains_key(&key)
    }

    /// Drop entries that have been unobserved for at least `gc_time`.
    /// Returns how many were removed.
    pub fn collect_garbage(&self) -> usize {
        let gc_time = self.inner.config.gc_time;
        let now = Instant::now();

        let mut entries = self.inner.entries();
        let before = entries.len();
        entries.retain(|key, entry| {
            let expired = entry.observers == 0
                && entry
                    .unobserved_since
                    .is_some_and(|since| now.duration_since(since) >= gc_time);
            if expired {
                tracing::debug!(%key, "evicting unobserved query");
            }
            !expired
        });
        before - entries.len()
    }
}

fn invalidate_entry(key: QueryKey, entry: &mut QueryEntry) -> Invalidation {
    if entry.observers == 0 {
        tracing::debug!(%key, "invalidation ignored: key not observed");
        return Invalidation::Ignored;
    }
    if entry.in_flight {
        tracing::debug!(%key, "invalidation coalesced into in-flight fetch");
        return Invalidation::Coalesced;
    }

    entry.dirty = true;
    entry.wake.notify_one();
    tracing::debug!(%key, "invalidation triggered refetch");
    Invalidation::Refetching
}

/// Keeps a key observed. Dropping the last subscription of a key stops its
/// polling.
#[derive(Debug)]
pub struct Subscription {
    cache: SyncCache,
    key: QueryKey,
}

impl Subscription {
    pub fn key(&self) -> QueryKey {
        self.key
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cache.release(self.key);
    }
}

async fn poll_loop(inner: Weak<CacheInner>, key: QueryKey, generation: u64, wake: Arc<Notify>) {
    loop {
        let gateway = match inner.upgrade() {
            Some(cache) if cache.begin_fetch(key, generation) => cache.gateway.clone(),
            _ => return,
        };

        let outcome = key.fetch(gateway.as_ref()).await;

        let Some(next_due) = inner
            .upgrade()
            .and_then(|cache| cache.complete_fetch(key, generation, outcome))
        else {
            return;
        };

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_due) => break,
                _ = wake.notified() => {
                    match inner.upgrade() {
                        Some(cache) if cache.take_refetch_request(key, generation) => break,
                        Some(_) => continue,
                        None => return,
                    }
                }
            }
        }
    }
}
