//! In-flight fetch bookkeeping.
//!
//! At most one fetch per key is tracked as the current one. A forced refetch
//! replaces the record; the superseded fetch keeps running and still writes
//! its result, so whichever response completes last is what the cache holds.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};

use crate::entry::CachedValue;
use crate::error::Result;
use crate::key::FingerprintKey;

pub(crate) type FetchFuture = BoxFuture<'static, Result<CachedValue>>;

/// Type-erased fetch function registered by a query
pub(crate) type Fetcher = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// One result future shared by every waiter of a fetch
pub(crate) type SharedFetch = Shared<FetchFuture>;

/// Fetch function plus the query settings it was registered with
#[derive(Clone)]
pub(crate) struct RegisteredFetcher {
    pub fetch: Fetcher,
    pub type_name: &'static str,
    /// Enabled and not manual: may be started without an explicit refetch
    pub auto: bool,
}

pub(crate) struct InFlight {
    pub fetch_id: u64,
    pub type_name: &'static str,
    pub shared: SharedFetch,
}

#[derive(Default)]
pub(crate) struct PendingRegistry {
    in_flight: HashMap<FingerprintKey, InFlight>,
    next_id: u64,
}

impl PendingRegistry {
    pub fn next_fetch_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn get(&self, key: &FingerprintKey) -> Option<&InFlight> {
        self.in_flight.get(key)
    }

    pub fn contains(&self, key: &FingerprintKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Make `in_flight` the current fetch for `key`, replacing any older one
    pub fn insert(&mut self, key: FingerprintKey, in_flight: InFlight) {
        self.in_flight.insert(key, in_flight);
    }

    /// Record completion of `fetch_id`.
    ///
    /// Returns whether another fetch for the key is still in flight.
    pub fn complete(&mut self, key: &FingerprintKey, fetch_id: u64) -> bool {
        match self.in_flight.get(key) {
            Some(current) if current.fetch_id == fetch_id => {
                self.in_flight.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    fn in_flight(fetch_id: u64) -> InFlight {
        let fut: FetchFuture = async { Ok(CachedValue::new(1u8)) }.boxed();
        InFlight {
            fetch_id,
            type_name: "u8",
            shared: fut.shared(),
        }
    }

    #[test]
    fn test_fetch_ids_are_unique() {
        let mut registry = PendingRegistry::default();
        let a = registry.next_fetch_id();
        let b = registry.next_fetch_id();
        assert!(b > a);
    }

    #[test]
    fn test_complete_current_fetch_clears_record() {
        let key = FingerprintKey::new("merchant-list");
        let mut registry = PendingRegistry::default();
        registry.insert(key.clone(), in_flight(1));
        assert!(!registry.complete(&key, 1));
        assert!(!registry.contains(&key));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_superseded_fetch_leaves_newer_record() {
        let key = FingerprintKey::new("merchant-list");
        let mut registry = PendingRegistry::default();
        registry.insert(key.clone(), in_flight(1));
        registry.insert(key.clone(), in_flight(2));

        // The older fetch finishing must not drop the newer one
        assert!(registry.complete(&key, 1));
        assert_eq!(registry.get(&key).map(|f| f.fetch_id), Some(2));

        assert!(!registry.complete(&key, 2));
        assert!(!registry.contains(&key));
    }

    #[tokio::test]
    async fn test_shared_fetch_yields_same_value() {
        let record = in_flight(1);
        let a = record.shared.clone().await.expect("fetch should succeed");
        let b = record.shared.clone().await.expect("fetch should succeed");
        assert!(a.same_value(&b));
    }
}
