//! Staleness-aware cache of backend responses.
//!
//! Entries are keyed by a [`CacheKey`] derived from the logical resource, so
//! every call site asking for "analysis #7" lands on the same entry. A `get`
//! on a missing or expired entry starts exactly one fetch; concurrent `get`s
//! for that key wait on the same fetch. Fetches run as detached tasks, so a
//! caller that goes away mid-fetch still leaves the result in the cache.
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use tokio::time::Instant;

use crate::api::GatewayError;

/// Default time-to-live for a fetched value (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
/// Default number of entries kept before least-recently-used eviction.
pub const DEFAULT_CAPACITY: usize = 256;

// ============================================================================
// Keys
// ============================================================================

/// Deterministic identity of a cached resource.
///
/// Keys are colon-separated: `analyses:list`, `analyses:7`, `user:me`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// The default listing of a collection.
    pub fn list(collection: &str) -> Self {
        Self(format!("{collection}:list"))
    }

    /// A non-default page of a collection listing.
    pub fn list_page(collection: &str, skip: u32, limit: u32) -> Self {
        Self(format!("{collection}:list:skip={skip}:limit={limit}"))
    }

    /// A single record by numeric id.
    pub fn item(collection: &str, id: i64) -> Self {
        Self(format!("{collection}:{id}"))
    }

    /// A named singleton such as the current user.
    pub fn named(collection: &str, name: &str) -> Self {
        Self(format!("{collection}:{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `prefix` matches this key if equal to it or a colon-separated ancestor.
    ///
    /// `analyses` matches `analyses:list` and `analyses:7`, but not `analysesx`.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        match self.0.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with(':'),
            None => false,
        }
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Fresh,
    Stale,
    Loading,
    /// The last fetch failed; any earlier value is still present.
    Error,
}

/// What a reader sees for one key.
#[derive(Debug, Clone)]
pub struct CachedResource<V> {
    pub value: Option<V>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub state: CacheState,
    /// Failure of the most recent fetch, when `state` is `Error`.
    pub error: Option<GatewayError>,
}

// ============================================================================
// Entries
// ============================================================================

type PendingFetch<V> = Shared<BoxFuture<'static, Result<V, GatewayError>>>;

struct InFlight<V> {
    seq: u64,
    pending: PendingFetch<V>,
}

struct Entry<V> {
    value: Option<V>,
    fetched_at: Option<Instant>,
    fetched_wall: Option<DateTime<Utc>>,
    invalidated: bool,
    error: Option<GatewayError>,
    /// Sequence number of the newest write; older fetch results are dropped.
    last_write_seq: u64,
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self {
            value: None,
            fetched_at: None,
            fetched_wall: None,
            invalidated: false,
            error: None,
            last_write_seq: 0,
        }
    }
}

impl<V: Clone> Entry<V> {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.error.is_none()
            && !self.invalidated
            && self.value.is_some()
            && self
                .fetched_at
                .is_some_and(|at| now.saturating_duration_since(at) < ttl)
    }

    fn snapshot(&self, loading: bool, now: Instant, ttl: Duration) -> CachedResource<V> {
        let state = if loading {
            CacheState::Loading
        } else if self.error.is_some() {
            CacheState::Error
        } else if self.is_fresh(now, ttl) {
            CacheState::Fresh
        } else {
            CacheState::Stale
        };

        CachedResource {
            value: self.value.clone(),
            fetched_at: self.fetched_wall,
            state,
            error: self.error.clone(),
        }
    }
}

struct Inner<V> {
    entries: LruCache<CacheKey, Entry<V>>,
    /// Fetches in flight, kept apart from `entries` so eviction never
    /// forgets one. Invalidation removes (detaches) them.
    in_flight: HashMap<CacheKey, InFlight<V>>,
    next_seq: u64,
    /// Bumped by `clear`; results of fetches started earlier are discarded.
    epoch: u64,
}

impl<V> Inner<V> {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

// ============================================================================
// ResultCache
// ============================================================================

/// Shared, cloneable cache handle.
pub struct ResultCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
    ttl: Duration,
}

impl<V> Clone for ResultCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            ttl: self.ttl,
        }
    }
}

impl<V: Clone + Send + Sync + 'static> ResultCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
                next_seq: 0,
                epoch: 0,
            })),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read `key`, fetching through `fetch` if the entry is missing, expired,
    /// invalidated or failed.
    ///
    /// `fetch` is only called when this `get` starts the fetch; callers that
    /// join an in-flight fetch never invoke it.
    pub async fn get<F, Fut>(&self, key: &CacheKey, fetch: F) -> CachedResource<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, GatewayError>> + Send + 'static,
    {
        let pending = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let now = Instant::now();

            if let Some(in_flight) = inner.in_flight.get(key) {
                tracing::trace!(key = %key, "Joining in-flight fetch");
                in_flight.pending.clone()
            } else {
                if let Some(entry) = inner.entries.get(key) {
                    if entry.is_fresh(now, self.ttl) {
                        tracing::trace!(key = %key, "Cache hit");
                        return entry.snapshot(false, now, self.ttl);
                    }
                }

                tracing::debug!(key = %key, "Cache miss, fetching");
                let seq = inner.bump_seq();
                let pending = self.spawn_fetch(key.clone(), seq, inner.epoch, fetch());
                inner.in_flight.insert(
                    key.clone(),
                    InFlight {
                        seq,
                        pending: pending.clone(),
                    },
                );
                // Keep an entry so readers see `Loading`.
                inner.entries.get_or_insert_mut(key.clone(), Entry::default);
                pending
            }
        };

        let result = pending.await;

        let now = Instant::now();
        let inner = self.lock();
        let loading = inner.in_flight.contains_key(key);
        match inner.entries.peek(key) {
            Some(entry) => entry.snapshot(loading, now, self.ttl),
            // Evicted or cleared while we waited.
            None => match result {
                Ok(value) => CachedResource {
                    value: Some(value),
                    fetched_at: Some(Utc::now()),
                    state: CacheState::Stale,
                    error: None,
                },
                Err(error) => CachedResource {
                    value: None,
                    fetched_at: None,
                    state: CacheState::Error,
                    error: Some(error),
                },
            },
        }
    }

    fn spawn_fetch<Fut>(&self, key: CacheKey, seq: u64, epoch: u64, fetch: Fut) -> PendingFetch<V>
    where
        Fut: Future<Output = Result<V, GatewayError>> + Send + 'static,
    {
        let cache = self.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = fetch.await;
            cache.complete(&task_key, seq, epoch, result.clone());
            result
        });

        let cache = self.clone();
        async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    let err = GatewayError::Unknown(format!("fetch task failed: {join_err}"));
                    cache.abandon(&key, seq, &err);
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    fn complete(&self, key: &CacheKey, seq: u64, epoch: u64, result: Result<V, GatewayError>) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.epoch != epoch {
            tracing::debug!(key = %key, "Discarding fetch result from before cache clear");
            return;
        }

        // A fetch detached by invalidation stores its value as stale.
        let attached = inner.in_flight.get(key).is_some_and(|f| f.seq == seq);
        if attached {
            inner.in_flight.remove(key);
        }

        let entry = inner.entries.get_or_insert_mut(key.clone(), Entry::default);
        if seq < entry.last_write_seq {
            tracing::debug!(key = %key, "Discarding superseded fetch result");
            return;
        }
        entry.last_write_seq = seq;

        match result {
            Ok(value) => {
                entry.value = Some(value);
                entry.fetched_at = Some(Instant::now());
                entry.fetched_wall = Some(Utc::now());
                entry.error = None;
                entry.invalidated = !attached;
            }
            Err(error) => {
                tracing::debug!(key = %key, error = %error, "Fetch failed, keeping previous value");
                entry.error = Some(error);
            }
        }
    }

    /// A fetch task died without completing; unblock its key.
    fn abandon(&self, key: &CacheKey, seq: u64, error: &GatewayError) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.in_flight.get(key).is_some_and(|f| f.seq == seq) {
            inner.in_flight.remove(key);
            if let Some(entry) = inner.entries.peek_mut(key) {
                entry.error = Some(error.clone());
            }
        }
    }

    /// Current view of `key` without fetching.
    pub fn peek(&self, key: &CacheKey) -> Option<CachedResource<V>> {
        let inner = self.lock();
        let loading = inner.in_flight.contains_key(key);
        inner
            .entries
            .peek(key)
            .map(|entry| entry.snapshot(loading, Instant::now(), self.ttl))
    }

    /// Store a value obtained elsewhere (e.g. the record returned by a create).
    ///
    /// Results of fetches already in flight for this key are discarded.
    pub fn put(&self, key: &CacheKey, value: V) {
        let mut inner = self.lock();
        let seq = inner.bump_seq();
        let entry = inner.entries.get_or_insert_mut(key.clone(), Entry::default);
        entry.value = Some(value);
        entry.fetched_at = Some(Instant::now());
        entry.fetched_wall = Some(Utc::now());
        entry.error = None;
        entry.invalidated = false;
        entry.last_write_seq = seq;
    }

    /// Mark every key equal to or under `prefix` stale.
    ///
    /// In-flight fetches for those keys are detached: their callers still get
    /// a result, but the next `get` starts a new fetch. Returns the number of
    /// entries affected.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut count = 0;
        for (key, entry) in inner.entries.iter_mut() {
            if key.matches_prefix(prefix) {
                entry.invalidated = true;
                count += 1;
            }
        }
        inner.in_flight.retain(|key, _| !key.matches_prefix(prefix));
        tracing::debug!(prefix = prefix, entries = count, "Invalidated cache entries");
        count
    }

    /// Drop everything, including results of fetches still in flight.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.in_flight.clear();
        inner.epoch += 1;
        tracing::debug!("Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
