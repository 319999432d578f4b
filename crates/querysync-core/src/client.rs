//! Query client: the composition root owning the cache.
//!
//! One `QueryClient` is created per application session and passed to
//! whatever issues reads and writes. Clone is cheap - clones share the same
//! store, in-flight registry and rules.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::entry::{CacheEntry, CachedValue};
use crate::error::{Error, Result, ValidationError};
use crate::key::FingerprintKey;
use crate::lock::{mutex_lock, rw_read, rw_write};
use crate::pattern::KeyPattern;
use crate::pending::{InFlight, PendingRegistry, RegisteredFetcher, SharedFetch};
use crate::router::{InvalidationRouter, InvalidationRule};
use crate::store::CacheStore;

/// State guarded by the client mutex. Never held across an await.
#[derive(Default)]
pub(crate) struct Core {
    pub store: CacheStore,
    pub pending: PendingRegistry,
}

struct Inner {
    config: ClientConfig,
    core: Mutex<Core>,
    router: RwLock<InvalidationRouter>,
}

/// Outcome of applying a mutation's invalidation rule
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationReport {
    /// A rule was registered for the mutation
    pub rule_found: bool,
    pub invalidated: usize,
    pub evicted: usize,
    /// Background refetches started for observed entries
    pub refetched: usize,
}

#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl QueryClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                core: Mutex::new(Core::default()),
                router: RwLock::new(InvalidationRouter::new()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn lock_core(&self, op: &'static str) -> MutexGuard<'_, Core> {
        mutex_lock(&self.inner.core, op)
    }

    // ===== Rules =====

    pub fn register_rule(&self, rule: InvalidationRule) -> std::result::Result<(), ValidationError> {
        rw_write(&self.inner.router, "register_rule").register(rule)
    }

    /// Register `patterns` as the keys `mutation` invalidates
    pub fn register_invalidation_rule<I>(
        &self,
        mutation: impl Into<String>,
        patterns: I,
    ) -> std::result::Result<(), ValidationError>
    where
        I: IntoIterator<Item = KeyPattern>,
    {
        let rule = patterns
            .into_iter()
            .fold(InvalidationRule::new(mutation), InvalidationRule::invalidates);
        self.register_rule(rule)
    }

    pub fn rule(&self, mutation: &str) -> Option<InvalidationRule> {
        rw_read(&self.inner.router, "rule").rule(mutation).cloned()
    }

    // ===== Direct cache access =====

    pub fn get(&self, key: &FingerprintKey) -> Option<CacheEntry> {
        self.lock_core("get").store.get(key)
    }

    pub fn keys(&self) -> Vec<FingerprintKey> {
        self.lock_core("keys").store.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_core("len").store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock_core("in_flight_count").pending.len()
    }

    /// Invalidate everything matching `pattern`. Returns the number of matched keys.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let mut core = self.lock_core("invalidate");
        let matched = core.store.invalidate(pattern);
        if self.inner.config.refetch_on_invalidate {
            self.refetch_observed_locked(&mut core, &matched);
        }
        debug!(pattern = %pattern, matched = matched.len(), "Invalidated by pattern");
        matched.len()
    }

    pub fn evict(&self, key: &FingerprintKey) -> Option<CacheEntry> {
        self.lock_core("evict").store.evict(key)
    }

    /// Drop every entry. Fetches still in flight repopulate their keys on completion.
    pub fn clear(&self) {
        let mut core = self.lock_core("clear");
        core.store.clear();
        core.pending.clear();
        info!("Cache cleared");
    }

    // ===== Executor internals =====

    /// Apply the rule registered for `mutation`. Runs before the mutation's
    /// caller observes its completion.
    pub(crate) fn apply_invalidation(
        &self,
        mutation: &str,
        payload: Option<&Value>,
    ) -> InvalidationReport {
        let router = rw_read(&self.inner.router, "apply_invalidation");
        let mut core = self.lock_core("apply_invalidation");

        let resolution = match router.resolve(mutation, payload, core.store.keys()) {
            Some(resolution) => resolution,
            None => {
                debug!(mutation, "No invalidation rule registered");
                return InvalidationReport::default();
            }
        };

        for key in &resolution.evict {
            core.store.evict(key);
        }
        let mut report = InvalidationReport {
            rule_found: true,
            invalidated: resolution.invalidate.len(),
            evicted: resolution.evict.len(),
            refetched: 0,
        };
        for key in &resolution.invalidate {
            core.store.invalidate_key(key);
        }
        if self.inner.config.refetch_on_invalidate {
            report.refetched = self.refetch_observed_locked(&mut core, &resolution.invalidate);
        }

        info!(
            mutation,
            invalidated = report.invalidated,
            evicted = report.evicted,
            refetched = report.refetched,
            "Applied invalidation rule"
        );
        report
    }

    /// Start background fetches for invalidated keys someone is still watching
    fn refetch_observed_locked<'a, I>(&self, core: &mut Core, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a FingerprintKey>,
    {
        let mut started = 0;
        for key in keys {
            if core.store.observer_count(key) == 0 || core.pending.contains(key) {
                continue;
            }
            if let Some(fetcher) = core.store.fetcher(key).filter(|f| f.auto) {
                debug!(key = %key, "Refetching observed query after invalidation");
                self.start_background_fetch_locked(core, key, fetcher);
                started += 1;
            }
        }
        started
    }

    /// Issue a fetch for `key` and make it the key's current in-flight fetch.
    ///
    /// The fetch runs on its own task, so it completes into the cache even if
    /// every waiter goes away. The fetch function is only called on that task,
    /// never under the core lock, so it may read the client. Must be called
    /// within a Tokio runtime.
    pub(crate) fn start_fetch_locked(
        &self,
        core: &mut Core,
        key: &FingerprintKey,
        fetcher: RegisteredFetcher,
    ) -> SharedFetch {
        let fetch_id = core.pending.next_fetch_id();
        let generation = core.store.begin_fetch(key);
        let type_name = fetcher.type_name;
        let fetch = fetcher.fetch;

        let client = self.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let run = async move { fetch().await };
            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(Error::Aborted(format!("fetch for {} panicked", task_key))),
            };
            client.complete_fetch(&task_key, fetch_id, generation, &result);
            result
        });

        let shared = async move {
            task.await
                .unwrap_or_else(|e| Err(Error::Aborted(e.to_string())))
        }
        .boxed()
        .shared();

        debug!(key = %key, fetch_id, "Fetch started");
        core.pending.insert(
            key.clone(),
            InFlight {
                fetch_id,
                type_name,
                shared: shared.clone(),
            },
        );
        shared
    }

    /// Start a fetch nobody waits on; its outcome lands on the entry
    pub(crate) fn start_background_fetch_locked(
        &self,
        core: &mut Core,
        key: &FingerprintKey,
        fetcher: RegisteredFetcher,
    ) {
        let _ = self.start_fetch_locked(core, key, fetcher);
    }

    /// Start a fetch regardless of freshness or an existing in-flight fetch
    pub(crate) fn force_fetch(
        &self,
        key: &FingerprintKey,
        fetcher: RegisteredFetcher,
    ) -> SharedFetch {
        let mut core = self.lock_core("force_fetch");
        self.start_fetch_locked(&mut core, key, fetcher)
    }

    fn complete_fetch(
        &self,
        key: &FingerprintKey,
        fetch_id: u64,
        generation: u64,
        result: &Result<CachedValue>,
    ) {
        let mut core = self.lock_core("complete_fetch");
        let still_fetching = core.pending.complete(key, fetch_id);
        // Invalidated or evicted after this fetch was issued
        let outdated = core.store.generation(key) != Some(generation);

        match result {
            Ok(value) => {
                core.store.put(key, value.clone());
                if outdated {
                    core.store.mark_stale(key);
                }
                debug!(key = %key, fetch_id, outdated, "Fetch completed");
            }
            Err(error) => {
                core.store.mark_error(key, error.clone());
                debug!(key = %key, fetch_id, error = %error, "Fetch failed");
            }
        }
        core.store.end_fetch(key);

        if outdated && !still_fetching && self.inner.config.refetch_on_invalidate {
            self.refetch_observed_locked(&mut core, std::iter::once(key));
        }
    }
}
