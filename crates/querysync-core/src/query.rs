//! Query executor.
//!
//! `QueryClient::query` serves reads from the cache and fetches only when it
//! has to:
//!
//! - **Fresh**: returned as is, the fetch function is not called
//! - **Stale** (or Errored with a previous value): the cached value is returned
//!   immediately and a background refetch is started
//! - **No value**: the caller waits for a fetch; concurrent callers for the
//!   same key share one in-flight fetch
//!
//! Manual and disabled queries never start a fetch on their own; they only
//! fetch through [`QueryHandle::refetch`].

use std::any::{type_name, Any};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::debug;

use crate::client::QueryClient;
use crate::config::QueryConfig;
use crate::entry::{CacheEntry, CacheState, CachedValue};
use crate::error::{CoalescingError, Error, Result};
use crate::key::FingerprintKey;
use crate::pending::{FetchFuture, Fetcher, RegisteredFetcher, SharedFetch};

impl QueryClient {
    /// Read `key` through the cache.
    ///
    /// Returns once a value or error is available, except for Stale entries
    /// which are returned immediately while they refetch. The returned handle
    /// subscribes to the entry until dropped.
    ///
    /// Errs only when `key` already holds a value of another type.
    pub async fn query<T, F, Fut, E>(
        &self,
        key: FingerprintKey,
        fetch: F,
        config: QueryConfig,
    ) -> std::result::Result<QueryHandle<T>, CoalescingError>
    where
        T: Any + Send + Sync,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<Error> + Send + 'static,
    {
        let erased: Fetcher = Arc::new(move || -> FetchFuture {
            let fut = fetch();
            async move {
                fut.await
                    .map(CachedValue::new)
                    .map_err(Into::<Error>::into)
            }
            .boxed()
        });
        let fetcher = RegisteredFetcher {
            fetch: erased,
            type_name: type_name::<T>(),
            auto: config.auto_fetch(),
        };

        let (receiver, wait) = {
            let mut core = self.lock_core("query");
            let receiver = core.store.subscribe(&key);
            let entry = core.store.get(&key).unwrap_or_else(CacheEntry::idle);

            if let Some(value) = &entry.value {
                value.downcast_for::<T>(&key)?;
            }
            if let Some(in_flight) = core.pending.get(&key) {
                if in_flight.type_name != type_name::<T>() {
                    return Err(CoalescingError::TypeMismatch {
                        key,
                        expected: type_name::<T>(),
                        found: in_flight.type_name,
                    });
                }
            }
            core.store.set_fetcher(&key, fetcher.clone());

            let wait: Option<SharedFetch> = match entry.state {
                CacheState::Fresh => {
                    debug!(key = %key, "Cache hit");
                    None
                }
                CacheState::Stale | CacheState::Errored if entry.has_value() => {
                    if config.auto_fetch() && !core.pending.contains(&key) {
                        debug!(key = %key, state = %entry.state, "Serving cached value, refetching in background");
                        self.start_background_fetch_locked(&mut core, &key, fetcher.clone());
                    }
                    None
                }
                _ if !config.auto_fetch() => {
                    debug!(key = %key, "Query not auto-fetching, leaving entry as is");
                    None
                }
                _ => match core.pending.get(&key) {
                    Some(in_flight) => {
                        debug!(key = %key, fetch_id = in_flight.fetch_id, "Joining in-flight fetch");
                        Some(in_flight.shared.clone())
                    }
                    None => {
                        debug!(key = %key, "Cache miss");
                        Some(self.start_fetch_locked(&mut core, &key, fetcher.clone()))
                    }
                },
            };
            (receiver, wait)
        };

        if let Some(shared) = wait {
            // The outcome is recorded on the entry; every waiter reads it from there
            let _ = shared.await;
        }

        Ok(QueryHandle {
            client: self.clone(),
            key,
            receiver,
            fetcher,
            _marker: PhantomData,
        })
    }
}

/// Reader's view of one cached query.
///
/// Holding a handle keeps the entry observed: after an invalidation it is
/// refetched in the background. Dropping it unsubscribes; a fetch already
/// running still completes into the cache.
pub struct QueryHandle<T> {
    client: QueryClient,
    key: FingerprintKey,
    receiver: watch::Receiver<CacheEntry>,
    fetcher: RegisteredFetcher,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> QueryHandle<T> {
    pub fn key(&self) -> &FingerprintKey {
        &self.key
    }

    /// Current snapshot of the entry (Idle if it was evicted)
    pub fn entry(&self) -> CacheEntry {
        self.client.get(&self.key).unwrap_or_else(CacheEntry::idle)
    }

    pub fn value(&self) -> Option<Arc<T>> {
        self.entry().value.and_then(|v| v.downcast::<T>())
    }

    pub fn state(&self) -> CacheState {
        self.entry().state
    }

    pub fn error(&self) -> Option<Error> {
        self.entry().error
    }

    pub fn is_fetching(&self) -> bool {
        self.entry().is_fetching
    }

    /// Fetch again now, whatever the entry's state.
    ///
    /// The fetch starts before this returns; awaiting the future yields this
    /// fetch's own result. The cache keeps whichever response completes last.
    pub fn refetch(&self) -> BoxFuture<'static, Result<Arc<T>>> {
        debug!(key = %self.key, "Manual refetch");
        let shared = self.client.force_fetch(&self.key, self.fetcher.clone());
        let key = self.key.clone();
        async move {
            let value = shared.await?;
            value.downcast_for::<T>(&key).map_err(Error::from)
        }
        .boxed()
    }

    /// Wait for the next change to the entry. False once the entry is gone.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }

    /// Wait until no fetch is running for the entry and return its snapshot
    pub async fn settled(&mut self) -> CacheEntry {
        loop {
            let entry = self.entry();
            if !entry.is_fetching && entry.state != CacheState::Loading {
                return entry;
            }
            if self.receiver.changed().await.is_err() {
                return self.entry();
            }
        }
    }
}
