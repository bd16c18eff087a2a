//! Response cache: TTL memoization of reads with in-flight de-duplication.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::key::CacheKey;
use super::traits::{CacheResult, KeyState};
use crate::error::{ApiError, ApiResult};

/// Default time-to-live for cached reads.
pub const DEFAULT_TTL_SECS: i64 = 300;

/// A memoized read. Immutable once stored; a new fetch replaces the slot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: CacheKey,
  pub value: Value,
  pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
  fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

type SharedFetch = Shared<BoxFuture<'static, ApiResult<Value>>>;

struct InFlight {
  id: u64,
  fetch: SharedFetch,
}

#[derive(Default)]
struct Inner {
  entries: HashMap<CacheKey, CacheEntry>,
  in_flight: HashMap<CacheKey, InFlight>,
  next_fetch_id: u64,
}

/// Process-wide read cache, constructed explicitly and shared by handle.
#[derive(Clone)]
pub struct ResponseCache {
  inner: Arc<Mutex<Inner>>,
  clock: Arc<dyn Clock>,
  default_ttl: Duration,
}

impl ResponseCache {
  pub fn new() -> Self {
    Self::with_clock(Arc::new(SystemClock))
  }

  pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner::default())),
      clock,
      default_ttl: Duration::seconds(DEFAULT_TTL_SECS),
    }
  }

  /// Set the TTL applied when a store does not override it.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Return the stored value if `now < expires_at`; expired entries are purged.
  pub fn lookup(&self, key: &CacheKey) -> Option<Value> {
    let now = self.clock.now();
    let mut inner = self.lock();
    lookup_locked(&mut inner, key, now).map(|entry| entry.value)
  }

  pub fn store(&self, key: &CacheKey, value: Value, ttl: Option<Duration>) {
    let expires_at = self.clock.now() + ttl.unwrap_or(self.default_ttl);
    let mut inner = self.lock();
    store_locked(&mut inner, key, value, expires_at);
  }

  /// Drop a single key. Also detaches any in-flight fetch so its result is
  /// not written back.
  pub fn invalidate(&self, key: &CacheKey) -> bool {
    let mut inner = self.lock();
    let removed = inner.entries.remove(key).is_some();
    inner.in_flight.remove(key);
    debug!(key = %key, removed, "Invalidated cache key");
    removed
  }

  /// Drop every key under `prefix` (segment-aware). Returns how many entries went.
  pub fn invalidate_prefix(&self, prefix: &str) -> usize {
    let mut inner = self.lock();
    let before = inner.entries.len();
    inner.entries.retain(|key, _| !key.matches_prefix(prefix));
    inner.in_flight.retain(|key, _| !key.matches_prefix(prefix));
    let removed = before - inner.entries.len();
    debug!(prefix, removed, "Invalidated cache prefix");
    removed
  }

  /// Eagerly remove expired entries. Returns how many were purged.
  pub fn purge_expired(&self) -> usize {
    let now = self.clock.now();
    let mut inner = self.lock();
    let before = inner.entries.len();
    inner.entries.retain(|_, entry| !entry.is_expired(now));
    before - inner.entries.len()
  }

  /// Forget everything, including in-flight bookkeeping.
  pub fn reset(&self) {
    *self.lock() = Inner::default();
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Stale means an expired entry is still held; a dropped key is Unfetched.
  pub fn state(&self, key: &CacheKey) -> KeyState {
    let now = self.clock.now();
    let inner = self.lock();
    if inner.in_flight.contains_key(key) {
      return KeyState::Fetching;
    }
    match inner.entries.get(key) {
      Some(entry) if !entry.is_expired(now) => KeyState::Fresh,
      Some(_) => KeyState::Stale,
      None => KeyState::Unfetched,
    }
  }

  /// Cache-first read with at most one concurrent fetch per key.
  ///
  /// 1. Fresh entry: return it.
  /// 2. Fetch already running for the key: await that one.
  /// 3. Otherwise spawn the fetch, store its value with `ttl` on success.
  ///
  /// The fetch runs on its own task, so a caller dropping this future does
  /// not cancel it; the result still lands in the cache for other readers.
  pub async fn get_or_fetch<F, Fut>(
    &self,
    key: &CacheKey,
    ttl: Option<Duration>,
    fetcher: F,
  ) -> ApiResult<CacheResult<Value>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<Value>> + Send + 'static,
  {
    self.get_or_fetch_with(key, ttl, fetcher, |_| {}).await
  }

  /// Like [`get_or_fetch`](Self::get_or_fetch), with a hook that sees the
  /// fetched value when it is stored.
  ///
  /// `on_stored` runs under the cache lock and only if the fetch was not
  /// detached by an invalidation or reset in the meantime. It must not block.
  /// It is dropped unused on a cache hit, a joined fetch or a failure.
  pub async fn get_or_fetch_with<F, Fut, S>(
    &self,
    key: &CacheKey,
    ttl: Option<Duration>,
    fetcher: F,
    on_stored: S,
  ) -> ApiResult<CacheResult<Value>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<Value>> + Send + 'static,
    S: FnOnce(&Value) + Send + 'static,
  {
    let now = self.clock.now();
    let (fetch, joined) = {
      let mut inner = self.lock();

      if let Some(entry) = lookup_locked(&mut inner, key, now) {
        trace!(key = %key, "Cache hit");
        return Ok(CacheResult::from_cache(entry.value, entry.expires_at));
      }

      if let Some(in_flight) = inner.in_flight.get(key) {
        debug!(key = %key, "Joining in-flight fetch");
        (in_flight.fetch.clone(), true)
      } else {
        debug!(key = %key, "Cache miss, fetching");
        inner.next_fetch_id += 1;
        let id = inner.next_fetch_id;
        let handle = self.spawn_fetch(key.clone(), id, ttl, fetcher(), on_stored);
        let fetch = join_task(handle);
        inner.in_flight.insert(
          key.clone(),
          InFlight {
            id,
            fetch: fetch.clone(),
          },
        );
        (fetch, false)
      }
    };

    let value = fetch.await?;
    Ok(if joined {
      CacheResult::joined(value)
    } else {
      CacheResult::from_network(value)
    })
  }

  fn spawn_fetch<Fut, S>(
    &self,
    key: CacheKey,
    id: u64,
    ttl: Option<Duration>,
    fut: Fut,
    on_stored: S,
  ) -> JoinHandle<ApiResult<Value>>
  where
    Fut: Future<Output = ApiResult<Value>> + Send + 'static,
    S: FnOnce(&Value) + Send + 'static,
  {
    let cache = self.clone();
    tokio::spawn(async move {
      // A panic anywhere in the fetch must still release the slot below
      let result = match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
          warn!(key = %key, "Fetch panicked");
          Err(ApiError::Network("fetch panicked".to_string()))
        }
      };
      let expires_at = cache.clock.now() + ttl.unwrap_or(cache.default_ttl);

      let mut inner = cache.lock();
      // Invalidated or reset while running: leave the slot alone
      let current = inner.in_flight.get(&key).is_some_and(|f| f.id == id);
      if current {
        inner.in_flight.remove(&key);
        if let Ok(value) = &result {
          on_stored(value);
          store_locked(&mut inner, &key, value.clone(), expires_at);
        }
      } else {
        debug!(key = %key, "Discarding result of detached fetch");
      }
      result
    })
  }

  /// Periodically purge expired entries until the handle is aborted.
  pub fn spawn_sweeper(&self, every: std::time::Duration) -> JoinHandle<()> {
    let cache = self.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      interval.tick().await;
      loop {
        interval.tick().await;
        let purged = cache.purge_expired();
        if purged > 0 {
          debug!(purged, "Swept expired cache entries");
        }
      }
    })
  }
}

impl Default for ResponseCache {
  fn default() -> Self {
    Self::new()
  }
}

fn lookup_locked(inner: &mut Inner, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
  match inner.entries.get(key) {
    Some(entry) if !entry.is_expired(now) => Some(entry.clone()),
    Some(_) => {
      inner.entries.remove(key);
      None
    }
    None => None,
  }
}

fn store_locked(inner: &mut Inner, key: &CacheKey, value: Value, expires_at: DateTime<Utc>) {
  inner.entries.insert(
    key.clone(),
    CacheEntry {
      key: key.clone(),
      value,
      expires_at,
    },
  );
}

fn join_task(handle: JoinHandle<ApiResult<Value>>) -> SharedFetch {
  async move {
    handle
      .await
      .unwrap_or_else(|e| Err(ApiError::Network(format!("fetch task failed: {}", e))))
  }
  .boxed()
  .shared()
}
