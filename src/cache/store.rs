//! Read-through cache store with request coalescing and LRU eviction

use crate::cache::{
    clock::{Clock, SystemClock},
    config::CacheConfig,
    entry::CacheEntry,
    invalidation::{InvalidationEvent, InvalidationReason},
    types::CacheStats,
};
use crate::descriptor::{CacheKey, QueryDescriptor};
use crate::error::{Result, WarehouseError};
use crate::gateway::{ConnectionStatus, HealthCheckResult, ResultSet, SourceGateway};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<ResultSet>>>>;

/// A fetch registered for a key
///
/// The flights of one key form a chain: each waits for the one before it
/// before calling the gateway, so a key never has two gateway calls
/// running at once.
struct Flight {
    /// Distinguishes this fetch from the others for the same key
    id: u64,
    descriptor: QueryDescriptor,
    fetch: SharedFetch,
    /// Set once the gateway call begins
    started: bool,
    /// Cleared by invalidation; a detached result is not stored
    attached: bool,
}

/// Read-through cache in front of a [`SourceGateway`]
///
/// This implementation provides:
/// - Freshness decided per call from the caller's ttl
/// - At most one gateway call per descriptor at a time; concurrent callers share it
/// - Fetches that survive callers giving up on them
/// - LRU eviction once `max_entries` is reached
/// - Failed fetches that leave the previous entry in place
///
/// Cloning is cheap and every clone shares the same entries.
#[derive(Clone)]
pub struct ReadThroughCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: CacheConfig,
    gateway: Arc<dyn SourceGateway>,
    clock: Arc<dyn Clock>,
    store: Mutex<CacheStore>,
}

/// Internal cache storage
struct CacheStore {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// LRU tracking: least recently used at the front
    lru_queue: VecDeque<CacheKey>,

    /// Fetches in progress per key, oldest first
    inflight: HashMap<CacheKey, Vec<Flight>>,

    stats: CacheStats,

    /// Total size of cached data in bytes
    current_size_bytes: usize,

    next_flight_id: u64,

    metrics: bool,
}

impl CacheStore {
    fn new(metrics: bool) -> Self {
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            inflight: HashMap::new(),
            stats: CacheStats::default(),
            current_size_bytes: 0,
            next_flight_id: 0,
            metrics,
        }
    }

    fn metric(&mut self, update: impl FnOnce(&mut CacheStats)) {
        if self.metrics {
            update(&mut self.stats);
        }
    }

    /// Move `key` to the most recently used end
    fn touch(&mut self, key: &CacheKey) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.clone());
    }

    fn flight_mut(&mut self, key: &CacheKey, id: u64) -> Option<&mut Flight> {
        self.inflight.get_mut(key)?.iter_mut().find(|f| f.id == id)
    }

    /// Unregister flight `id`, returning it if it was still registered
    fn take_flight(&mut self, key: &CacheKey, id: u64) -> Option<Flight> {
        let chain = self.inflight.get_mut(key)?;
        let index = chain.iter().position(|f| f.id == id)?;
        let flight = chain.remove(index);
        if chain.is_empty() {
            self.inflight.remove(key);
        }
        Some(flight)
    }

    /// Detach every attached flight matching `matches`; returns how many
    fn detach_flights(&mut self, mut matches: impl FnMut(&Flight) -> bool) -> usize {
        let mut detached = 0;
        for flight in self.inflight.values_mut().flatten() {
            if flight.attached && matches(&*flight) {
                flight.attached = false;
                detached += 1;
            }
        }
        let count = detached as u64;
        self.metric(|s| s.detached_fetches += count);
        detached
    }

    fn remove_entry(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        self.current_size_bytes = self.current_size_bytes.saturating_sub(entry.metadata.size_bytes);
        Some(entry)
    }

    /// Store `entry`, replacing any previous one, then evict down to `max_entries`
    fn insert_entry(&mut self, key: CacheKey, entry: CacheEntry, max_entries: usize) {
        let size = entry.metadata.size_bytes;
        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            self.current_size_bytes = self.current_size_bytes.saturating_sub(previous.metadata.size_bytes);
        }
        self.current_size_bytes += size;
        self.touch(&key);

        while self.entries.len() > max_entries {
            let Some(oldest) = self.lru_queue.pop_front() else {
                break;
            };
            debug!(key = %oldest, "Evicting least recently used entry");
            self.remove_entry(&oldest);
            self.metric(|s| s.evictions_lru += 1);
        }
    }
}

impl ReadThroughCache {
    /// Create a cache over `gateway` using the system clock
    ///
    /// # Errors
    /// `ConfigError` if `config` does not validate.
    pub fn new(gateway: Arc<dyn SourceGateway>, config: CacheConfig) -> Result<Self> {
        Self::with_clock(gateway, config, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit time source
    pub fn with_clock(
        gateway: Arc<dyn SourceGateway>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        info!("Initializing read-through cache over {} with config: {:?}", gateway.name(), config);

        let store = CacheStore::new(config.enable_metrics);
        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                gateway,
                clock,
                store: Mutex::new(store),
            }),
        })
    }

    /// Return rows for `query`, fetching them if the entry is missing or older than `ttl`
    ///
    /// Callers join the newest attached fetch for the key when there is one.
    /// A zero `ttl` never uses a stored entry and only joins a fetch that has
    /// not reached the gateway yet; otherwise it queues a new fetch behind the
    /// running one. Its result is stored with the default ttl.
    ///
    /// # Errors
    /// `FetchError` wrapping the gateway error; any previous entry is kept.
    pub async fn get(&self, query: &QueryDescriptor, ttl: Duration) -> Result<Arc<ResultSet>> {
        let fetch = {
            let mut store = self.inner.store.lock().await;
            let key = query.cache_key();
            let now = self.inner.clock.now();

            if let Some(entry) = store.entries.get_mut(key) {
                if entry.is_fresh(now, ttl) {
                    entry.mark_accessed();
                    let rows = Arc::clone(&entry.rows);
                    store.touch(key);
                    store.metric(|s| s.hits += 1);
                    debug!(key = %key, "Cache hit");
                    return Ok(rows);
                }
            }

            store.metric(|s| s.misses += 1);
            let joinable = store
                .inflight
                .get(key)
                .and_then(|chain| chain.last())
                .filter(|f| f.attached && !(ttl.is_zero() && f.started))
                .map(|f| (f.id, f.fetch.clone()));
            match joinable {
                Some((flight, fetch)) => {
                    store.metric(|s| s.coalesced += 1);
                    debug!(key = %key, flight, "Joining in-flight fetch");
                    fetch
                }
                None => {
                    let store_ttl = if ttl.is_zero() {
                        self.inner.config.default_ttl
                    } else {
                        ttl
                    };
                    self.start_fetch(&mut store, query, store_ttl)
                }
            }
        };

        fetch.await
    }

    /// [`get`](Self::get) with the configured default ttl
    pub async fn get_default(&self, query: &QueryDescriptor) -> Result<Arc<ResultSet>> {
        self.get(query, self.inner.config.default_ttl).await
    }

    /// Spawn the fetch task and append it to the chain of its key
    ///
    /// The task waits for the previous flight of the key, detached or not,
    /// before calling the gateway.
    fn start_fetch(&self, store: &mut CacheStore, query: &QueryDescriptor, store_ttl: Duration) -> SharedFetch {
        store.next_flight_id += 1;
        let id = store.next_flight_id;
        let key = query.cache_key().clone();
        let previous = store
            .inflight
            .get(&key)
            .and_then(|chain| chain.last())
            .map(|f| f.fetch.clone());

        let inner = Arc::clone(&self.inner);
        let task_query = query.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let summary = task_query.summary();
            let fetch = Arc::clone(&inner).fetch_and_store(id, previous, task_query, store_ttl);
            match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    inner.abandon_flight(&task_key, id).await;
                    Err(WarehouseError::fetch(
                        summary,
                        WarehouseError::Other("fetch task panicked".to_string()),
                    ))
                }
            }
        });

        let inner = Arc::clone(&self.inner);
        let summary = query.summary();
        let waiter_key = key.clone();
        let fetch = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    inner.abandon_flight(&waiter_key, id).await;
                    Err(WarehouseError::fetch(
                        summary,
                        WarehouseError::Other(format!("fetch task ended abnormally: {}", e)),
                    ))
                }
            }
        }
        .boxed()
        .shared();

        let queued_behind = store.inflight.get(&key).map_or(0, Vec::len);
        store.inflight.entry(key).or_default().push(Flight {
            id,
            descriptor: query.clone(),
            fetch: fetch.clone(),
            started: false,
            attached: true,
        });
        store.metric(|s| s.fetches += 1);
        debug!(key = %query.cache_key(), flight = id, queued_behind, "Cache miss, fetching");
        fetch
    }

    /// Remove the entry for `query`
    ///
    /// A fetch in flight for it is detached: its waiters still receive the
    /// result, but it is not stored. The next fetch for the key still waits
    /// for it to finish. Returns whether an entry was removed.
    pub async fn invalidate(&self, query: &QueryDescriptor) -> bool {
        let mut store = self.inner.store.lock().await;
        let key = query.cache_key();

        let detached = store.detach_flights(|flight| flight.descriptor.cache_key() == key);
        let removed = store.remove_entry(key).is_some();
        if removed {
            store.metric(|s| s.invalidations += 1);
        }
        debug!(key = %key, removed, detached, "Invalidated descriptor");
        removed
    }

    /// Clear every entry and detach every in-flight fetch
    pub async fn invalidate_all(&self) -> usize {
        self.clear(InvalidationReason::Cleared).await.len()
    }

    async fn clear(&self, reason: InvalidationReason) -> InvalidationEvent {
        let mut store = self.inner.store.lock().await;

        let keys: Vec<CacheKey> = store.entries.keys().cloned().collect();
        let detached = store.detach_flights(|_| true);
        store.entries.clear();
        store.lru_queue.clear();
        store.current_size_bytes = 0;
        let count = keys.len() as u64;
        store.metric(|s| s.invalidations += count);

        info!("Cleared {} entries from cache ({}, {} fetches detached)", count, reason, detached);
        InvalidationEvent::new(reason, self.inner.clock.wall(), keys).with_detached(detached)
    }

    /// Remove every entry whose query reads `table`
    ///
    /// The hook for change notifications; nothing calls it implicitly.
    pub async fn invalidate_table(&self, table: &str) -> usize {
        let mut store = self.inner.store.lock().await;

        let keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.has_table(table))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            store.remove_entry(key);
        }
        let detached = store.detach_flights(|flight| flight.descriptor.references_table(table));

        let removed = keys.len();
        store.metric(|s| s.invalidations += removed as u64);
        info!(
            "Invalidated {} entries reading {} ({} fetches detached)",
            removed, table, detached
        );
        removed
    }

    /// Reset the gateway connection and clear the cache
    ///
    /// Used after credential rotation: nothing fetched over the old
    /// connection survives.
    pub async fn reconnect(&self) -> usize {
        info!("Reconnecting {}", self.inner.gateway.name());
        self.inner.gateway.reset().await;
        self.clear(InvalidationReason::Reconnected).await.len()
    }

    /// The last stored entry for `query`, fresh or not
    ///
    /// Does not count as a hit and does not change LRU order. Lets callers
    /// fall back to stale rows after a `FetchError` when they choose to.
    pub async fn get_cached_if_present(&self, query: &QueryDescriptor) -> Option<CacheEntry> {
        let store = self.inner.store.lock().await;
        store.entries.get(query.cache_key()).cloned()
    }

    /// Drop entries that outlived their ttl by more than `max_stale`
    pub async fn purge_expired(&self) -> Option<InvalidationEvent> {
        let mut store = self.inner.store.lock().await;
        let now = self.inner.clock.now();
        let grace = self.inner.config.max_stale;

        let expired: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, grace))
            .map(|(key, _)| key.clone())
            .collect();
        if expired.is_empty() {
            return None;
        }

        for key in &expired {
            store.remove_entry(key);
        }
        let count = expired.len() as u64;
        store.metric(|s| s.purges += count);
        debug!("Purged {} expired entries", count);

        Some(InvalidationEvent::new(
            InvalidationReason::Expired,
            self.inner.clock.wall(),
            expired,
        ))
    }

    /// Start the periodic purge if `cleanup_interval` is configured
    ///
    /// The task stops by itself once every clone of the cache is dropped.
    pub fn spawn_auto_cleanup(&self) -> Option<JoinHandle<()>> {
        let interval = self.inner.config.cleanup_interval?;
        let weak = Arc::downgrade(&self.inner);

        info!("Starting automatic cache cleanup task (interval: {:?})", interval);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("Cache dropped, stopping cleanup task");
                    break;
                };
                let cache = ReadThroughCache { inner };
                if let Some(event) = cache.purge_expired().await {
                    debug!("Auto cleanup: {} entries purged", event.len());
                }
            }
        }))
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.inner.store.lock().await;
        let mut stats = store.stats.clone();
        stats.entries = store.entries.len();
        stats.size_bytes = store.current_size_bytes;
        stats
    }

    /// Get number of entries in cache
    pub async fn len(&self) -> usize {
        self.inner.store.lock().await.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.store.lock().await.entries.is_empty()
    }

    /// Whether an entry (fresh or stale) is stored for `query`
    pub async fn contains(&self, query: &QueryDescriptor) -> bool {
        self.inner.store.lock().await.entries.contains_key(query.cache_key())
    }

    /// Number of fetches not yet finished, detached ones included
    pub async fn pending_fetches(&self) -> usize {
        self.inner.store.lock().await.inflight.values().map(Vec::len).sum()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.gateway.connection_status()
    }

    /// Probe the gateway behind the cache
    pub async fn health_check(&self) -> HealthCheckResult {
        self.inner.gateway.health_check().await
    }
}

impl CacheInner {
    /// Unregister a flight whose task died without finishing
    async fn abandon_flight(&self, key: &CacheKey, id: u64) {
        let mut store = self.store.lock().await;
        if store.take_flight(key, id).is_some() {
            store.metric(|s| s.fetch_failures += 1);
            warn!(key = %key, flight = id, "Fetch task ended abnormally, flight dropped");
        }
    }

    /// Body of the spawned fetch task
    ///
    /// Waits for `previous` first. Stores the result only if the flight was
    /// not detached while it ran.
    async fn fetch_and_store(
        self: Arc<Self>,
        id: u64,
        previous: Option<SharedFetch>,
        query: QueryDescriptor,
        store_ttl: Duration,
    ) -> Result<Arc<ResultSet>> {
        let key = query.cache_key().clone();
        if let Some(previous) = previous {
            // Its outcome belongs to its own waiters
            let _ = previous.await;
        }
        if let Some(flight) = self.store.lock().await.flight_mut(&key, id) {
            flight.started = true;
        }

        let started = self.clock.now();
        let started_wall = self.clock.wall();
        let summary = query.summary();
        let timeout = self.config.fetch_timeout;

        let gateway = &self.gateway;
        let query_ref = &query;
        let summary_ref = &summary;
        let outcome = self
            .config
            .retry
            .run(&summary, |attempt| async move {
                debug!(attempt, query = %summary_ref, "Fetching from {}", gateway.name());
                match tokio::time::timeout(timeout, gateway.execute(query_ref)).await {
                    Ok(result) => result,
                    Err(_) => Err(WarehouseError::timeout(timeout, format!("fetching {}", summary_ref))),
                }
            })
            .await;

        let mut store = self.store.lock().await;
        let current = store.take_flight(&key, id).is_some_and(|f| f.attached);

        match outcome {
            Ok(rows) => {
                let rows = Arc::new(rows);
                if current {
                    let version = store.entries.get(&key).map_or(1, |e| e.metadata.version + 1);
                    let mut entry = CacheEntry::new(query, Arc::clone(&rows), started, started_wall, store_ttl);
                    entry.metadata.version = version;
                    store.insert_entry(key, entry, self.config.max_entries);
                    debug!(rows = rows.len(), version, "Stored fetched result");
                } else {
                    debug!(flight = id, "Fetch was detached by invalidation, result not stored");
                }
                Ok(rows)
            }
            Err(e) => {
                store.metric(|s| s.fetch_failures += 1);
                warn!(query = %summary, "Fetch failed, previous entry kept: {}", e);
                Err(WarehouseError::fetch(summary, e))
            }
        }
    }
}
