use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};
use serde::Serialize;

use super::sweeper::{self, SweeperHandle};
use super::{CacheError, CacheName, Clock, ProducerError, StoreConfig, SystemClock};
use crate::utils::futures::CallOnDrop;

type ComputationChannel<V> = Shared<oneshot::Receiver<Result<V, CacheError>>>;

/// A value in the entry table.
struct CacheItem<V> {
    /// When this item stops being served.
    deadline: Instant,
    /// The actual data.
    value: V,
}

/// A running computation that concurrent callers attach to.
struct Computation<V> {
    /// Distinguishes this computation from later ones for the same key.
    episode: u64,
    channel: ComputationChannel<V>,
}

struct Tables<V> {
    entries: HashMap<String, CacheItem<V>>,
    computations: HashMap<String, Computation<V>>,
    next_episode: u64,
}

impl<V: Clone> Tables<V> {
    /// Returns the unexpired value for `key`, dropping the entry if it has expired.
    fn lookup(&mut self, key: &str, now: Instant) -> Option<V> {
        match self.entries.get(key) {
            Some(item) if item.deadline > now => Some(item.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn remove_computation(&mut self, key: &str, episode: u64) {
        if self
            .computations
            .get(key)
            .is_some_and(|computation| computation.episode == episode)
        {
            self.computations.remove(key);
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
}

struct Inner<V> {
    name: CacheName,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    tables: Mutex<Tables<V>>,
    counters: Counters,
}

impl<V: Clone> Inner<V> {
    fn deadline(&self, ttl: Duration) -> Result<Instant, CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl(ttl));
        }
        self.clock
            .now()
            .checked_add(ttl)
            .ok_or(CacheError::InvalidTtl(ttl))
    }

    /// Stores the result of a successful computation and retires the computation.
    ///
    /// Both happen under the same lock, so a caller either attaches to the computation or finds
    /// its value in the entry table.
    fn complete(&self, key: &str, episode: u64, value: V, ttl: Duration) {
        let deadline = self.deadline(ttl);
        let mut tables = self.tables.lock();
        match deadline {
            Ok(deadline) => {
                tables
                    .entries
                    .insert(key.to_owned(), CacheItem { deadline, value });
            }
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn Error,
                    "Not caching {} value for {:?}",
                    self.name,
                    key
                );
            }
        }
        tables.remove_computation(key, episode);
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let before = tables.entries.len();
        tables.entries.retain(|_, item| item.deadline > now);
        before - tables.entries.len()
    }
}

/// Statistics of a single [`CoalescingStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub name: CacheName,
    /// Lookups served from the entry table.
    pub hits: u64,
    /// Lookups which did not find an unexpired entry.
    pub misses: u64,
    /// Misses which attached to an already running computation.
    pub coalesced: u64,
    /// Computations started.
    pub computations: u64,
    /// Computations whose producer failed.
    pub failures: u64,
    /// Unexpired entries.
    pub entries: usize,
    /// Currently running computations.
    pub in_flight: usize,
}

/// An in-memory TTL cache which deduplicates concurrent computations of the same key.
///
/// Clones of a store share the same tables.
pub struct CoalescingStore<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CoalescingStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for CoalescingStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (entries, computations) = self
            .inner
            .tables
            .try_lock()
            .map(|tables| (tables.entries.len(), tables.computations.len()))
            .unwrap_or_default();
        f.debug_struct("CoalescingStore")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("entries", &entries)
            .field("running computations", &computations)
            .finish()
    }
}

impl<V> CoalescingStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a store using the system clock.
    pub fn new(name: CacheName, config: StoreConfig) -> Result<Self, CacheError> {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Creates a store which checks expiration against the given clock.
    pub fn with_clock(
        name: CacheName,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        if config.default_ttl.is_zero() {
            return Err(CacheError::InvalidTtl(config.default_ttl));
        }

        let inner = Inner {
            name,
            config,
            clock,
            tables: Mutex::new(Tables {
                entries: HashMap::new(),
                computations: HashMap::new(),
                next_episode: 0,
            }),
            counters: Counters::default(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn name(&self) -> CacheName {
        self.inner.name
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Returns the value for `key` unless it is missing or expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.inner.clock.now();
        let value = self.inner.tables.lock().lookup(key, now);
        self.record_lookup(value.is_some());
        value
    }

    /// Stores `value` under `key`, replacing any previous entry and its expiration.
    ///
    /// Without a `ttl`, the configured default TTL is used.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        let deadline = self
            .inner
            .deadline(ttl.unwrap_or(self.inner.config.default_ttl))?;
        self.inner
            .tables
            .lock()
            .entries
            .insert(key.to_owned(), CacheItem { deadline, value });
        Ok(())
    }

    /// Returns `true` if an unexpired entry for `key` exists.
    pub fn has(&self, key: &str) -> bool {
        let now = self.inner.clock.now();
        self.inner.tables.lock().lookup(key, now).is_some()
    }

    /// Removes the entry for `key`, returning whether there was one.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.tables.lock().entries.remove(key).is_some()
    }

    /// Removes all entries.
    ///
    /// Running computations are not affected and will store their results once they finish.
    pub fn flush(&self) {
        let mut tables = self.inner.tables.lock();
        tracing::debug!(
            "Flushing {} entries from {} cache",
            tables.entries.len(),
            self.inner.name
        );
        tables.entries.clear();
    }

    /// Removes all expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.inner.clock.now();
        let (entries, in_flight) = {
            let tables = self.inner.tables.lock();
            let entries = tables
                .entries
                .values()
                .filter(|item| item.deadline > now)
                .count();
            (entries, tables.computations.len())
        };

        let counters = &self.inner.counters;
        CacheStats {
            name: self.inner.name,
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            computations: counters.computations.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            entries,
            in_flight,
        }
    }

    /// Starts purging expired entries periodically on the current tokio runtime.
    ///
    /// Returns `None` if the sweeper is disabled in the config. The sweeper stops when the
    /// returned handle or the store is dropped.
    pub fn spawn_sweeper(&self) -> Option<SweeperHandle> {
        let period = self.inner.config.effective_sweep_interval()?;
        let inner = Arc::downgrade(&self.inner);
        Some(sweeper::spawn_sweeper(self.inner.name, period, move || {
            let store = CoalescingStore {
                inner: inner.upgrade()?,
            };
            let evicted = store.purge_expired();
            crate::metrics::report_cache_size(&store.stats());
            Some(evicted)
        }))
    }

    /// Returns the value for `key`, computing it with `producer` if it is not cached.
    ///
    /// The computation is deduplicated between concurrent callers: while a computation for `key`
    /// is running, further callers wait for its outcome instead of invoking their `producer`.
    /// A successful result is stored with the given `ttl` (or the default TTL), counted from the
    /// moment the computation finishes. A failure is handed to all waiting callers as
    /// [`CacheError::Producer`] and is not stored.
    ///
    /// The computation runs as its own task on the current tokio runtime, so it continues even if
    /// every caller stops waiting for it.
    ///
    /// # Errors
    ///
    /// Fails with [`CacheError::InvalidTtl`] before doing anything if `ttl` can not be used.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        ttl: Option<Duration>,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        self.inner.deadline(ttl)?;

        let name = self.inner.name;
        let (channel, leader) = {
            let mut tables = self.inner.tables.lock();
            let now = self.inner.clock.now();
            if let Some(value) = tables.lookup(key, now) {
                self.record_lookup(true);
                return Ok(value);
            }
            self.record_lookup(false);

            if let Some(computation) = tables.computations.get(key) {
                // A concurrent cache lookup was deduplicated.
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                metric!(counter("caches.channel.hit") += 1, "cache" => name.as_ref());
                (computation.channel.clone(), None)
            } else {
                let episode = tables.next_episode;
                tables.next_episode += 1;

                let (sender, receiver) = oneshot::channel();
                let channel = receiver.shared();
                let computation = Computation {
                    episode,
                    channel: channel.clone(),
                };
                let evicted = tables.computations.insert(key.to_owned(), computation);
                debug_assert!(evicted.is_none());
                (channel, Some((episode, sender)))
            }
        };

        match leader {
            Some((episode, sender)) => {
                self.spawn_computation(key.to_owned(), episode, sender, producer, ttl)
            }
            None => drop(producer),
        }

        channel
            .await
            .unwrap_or_else(|_cancelled| Err(CacheError::Interrupted))
    }

    /// Invokes `producer` and spawns a task which drives it to completion.
    ///
    /// The task stores a successful result, retires the computation, and finally sends the
    /// outcome to everybody attached to the channel.
    fn spawn_computation<F, Fut, E>(
        &self,
        key: String,
        episode: u64,
        sender: oneshot::Sender<Result<V, CacheError>>,
        producer: F,
        ttl: Duration,
    ) where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        let name = self.inner.name;

        // Created before anything else, so the computation is retired even if the producer
        // panics or the task never runs.
        let remove_computation_token = {
            let inner = Arc::clone(&self.inner);
            let key = key.clone();
            CallOnDrop::new(move || inner.tables.lock().remove_computation(&key, episode))
        };

        self.inner
            .counters
            .computations
            .fetch_add(1, Ordering::Relaxed);
        metric!(counter("caches.computation") += 1, "cache" => name.as_ref());
        tracing::trace!("Spawning deduplicated {} computation for {:?}", name, key);

        let future = producer();
        let inner = Arc::clone(&self.inner);
        let task = async move {
            let result = match future.await {
                Ok(value) => {
                    inner.complete(&key, episode, value.clone(), ttl);
                    Ok(value)
                }
                Err(err) => {
                    let err = ProducerError::new(err);
                    inner.counters.failures.fetch_add(1, Ordering::Relaxed);
                    metric!(counter("caches.computation.failed") += 1, "cache" => name.as_ref());
                    tracing::debug!(
                        error = &err as &dyn Error,
                        "{} computation for {:?} failed",
                        name,
                        key
                    );
                    Err(CacheError::Producer(err))
                }
            };
            // Drop the token first to evict from the map. This ensures that callers either
            // get a channel that will receive data, or they create a new channel.
            drop(remove_computation_token);
            sender.send(result).ok();
        }
        .bind_hub(Hub::new_from_top(Hub::current()));

        tokio::spawn(task);
    }

    fn record_lookup(&self, hit: bool) {
        let name = self.inner.name;
        metric!(counter("caches.access") += 1, "cache" => name.as_ref());
        if hit {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            metric!(counter("caches.memory.hit") += 1, "cache" => name.as_ref());
        } else {
            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}
