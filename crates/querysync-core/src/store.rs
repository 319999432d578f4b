//! Cache store: one entry per fingerprint key.
//!
//! The store is a plain single-owner structure; `QueryClient` wraps it in a
//! mutex so background fetch tasks can complete into it. Every transition
//! republishes the entry's snapshot on its watch channel, which is how
//! subscribers learn about changes.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::watch;
use tracing::debug;

use crate::entry::{CacheEntry, CacheState, CachedValue};
use crate::error::Error;
use crate::key::FingerprintKey;
use crate::pattern::KeyPattern;
use crate::pending::RegisteredFetcher;

struct Slot {
    value: Option<CachedValue>,
    state: CacheState,
    updated_at: Option<chrono::DateTime<Utc>>,
    error: Option<Error>,
    /// Fetches issued for this key that have not completed yet
    running: usize,
    /// Changes on creation and on every invalidation of this key
    generation: u64,
    fetcher: Option<RegisteredFetcher>,
    notify: watch::Sender<CacheEntry>,
}

impl Slot {
    fn new(generation: u64) -> Self {
        let (notify, _) = watch::channel(CacheEntry::idle());
        Self {
            value: None,
            state: CacheState::Idle,
            updated_at: None,
            error: None,
            running: 0,
            generation,
            fetcher: None,
            notify,
        }
    }

    fn snapshot(&self) -> CacheEntry {
        CacheEntry {
            value: self.value.clone(),
            state: self.state,
            updated_at: self.updated_at,
            error: self.error.clone(),
            is_fetching: self.running > 0,
        }
    }

    fn publish(&self) {
        self.notify.send_replace(self.snapshot());
    }
}

#[derive(Default)]
pub struct CacheStore {
    entries: HashMap<FingerprintKey, Slot>,
    next_generation: u64,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn slot_mut(&mut self, key: &FingerprintKey) -> &mut Slot {
        let next_generation = &mut self.next_generation;
        self.entries.entry(key.clone()).or_insert_with(|| {
            *next_generation += 1;
            debug!(key = %key, "Creating cache entry");
            Slot::new(*next_generation)
        })
    }

    /// Pure lookup
    pub fn get(&self, key: &FingerprintKey) -> Option<CacheEntry> {
        self.entries.get(key).map(Slot::snapshot)
    }

    pub fn contains(&self, key: &FingerprintKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a value as Fresh, replacing any previous value and error
    pub fn put(&mut self, key: &FingerprintKey, value: CachedValue) {
        let slot = self.slot_mut(key);
        slot.value = Some(value);
        slot.state = CacheState::Fresh;
        slot.updated_at = Some(Utc::now());
        slot.error = None;
        slot.publish();
    }

    /// Mark the entry Errored, keeping the last good value alongside the error
    pub fn mark_error(&mut self, key: &FingerprintKey, error: Error) {
        let slot = self.slot_mut(key);
        slot.state = CacheState::Errored;
        slot.error = Some(error);
        slot.publish();
    }

    /// Mark every stored key matching `pattern` as invalidated.
    ///
    /// Fresh entries become Stale; values are kept. Returns the matched keys.
    pub fn invalidate(&mut self, pattern: &KeyPattern) -> Vec<FingerprintKey> {
        let matched: Vec<FingerprintKey> = self
            .entries
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        for key in &matched {
            self.invalidate_key(key);
        }
        matched
    }

    /// Invalidate a single key. Returns true if it went Fresh -> Stale.
    pub fn invalidate_key(&mut self, key: &FingerprintKey) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        let generation = self.bump_generation();
        let slot = self.slot_mut(key);
        slot.generation = generation;
        if slot.state == CacheState::Fresh {
            slot.state = CacheState::Stale;
            slot.publish();
            true
        } else {
            false
        }
    }

    /// Remove the entry entirely
    pub fn evict(&mut self, key: &FingerprintKey) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        let last = slot.snapshot();
        // Live subscribers see an empty entry, then a closed channel
        slot.notify.send_replace(CacheEntry::idle());
        debug!(key = %key, "Evicted cache entry");
        Some(last)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FingerprintKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        for (_, slot) in self.entries.drain() {
            slot.notify.send_replace(CacheEntry::idle());
        }
    }

    // ===== Executor hooks =====

    /// Subscribe to an entry, creating it as Idle if needed
    pub(crate) fn subscribe(&mut self, key: &FingerprintKey) -> watch::Receiver<CacheEntry> {
        self.slot_mut(key).notify.subscribe()
    }

    /// Number of live subscribers of an entry
    pub fn observer_count(&self, key: &FingerprintKey) -> usize {
        self.entries
            .get(key)
            .map(|slot| slot.notify.receiver_count())
            .unwrap_or(0)
    }

    pub(crate) fn generation(&self, key: &FingerprintKey) -> Option<u64> {
        self.entries.get(key).map(|slot| slot.generation)
    }

    pub(crate) fn set_fetcher(&mut self, key: &FingerprintKey, fetcher: RegisteredFetcher) {
        self.slot_mut(key).fetcher = Some(fetcher);
    }

    pub(crate) fn fetcher(&self, key: &FingerprintKey) -> Option<RegisteredFetcher> {
        self.entries.get(key).and_then(|slot| slot.fetcher.clone())
    }

    /// Flag a fetch as started. Entries without a value move to Loading.
    ///
    /// Returns the generation the fetch was issued against.
    pub(crate) fn begin_fetch(&mut self, key: &FingerprintKey) -> u64 {
        let slot = self.slot_mut(key);
        slot.running += 1;
        if slot.value.is_none() {
            slot.state = CacheState::Loading;
        }
        slot.publish();
        slot.generation
    }

    /// Flag a fetch as completed. Entries recreated mid-flight start at zero.
    pub(crate) fn end_fetch(&mut self, key: &FingerprintKey) {
        if let Some(slot) = self.entries.get_mut(key) {
            if slot.running > 0 {
                slot.running -= 1;
                slot.publish();
            }
        }
    }

    /// Force an entry holding a value to Stale without touching its generation
    pub(crate) fn mark_stale(&mut self, key: &FingerprintKey) {
        if let Some(slot) = self.entries.get_mut(key) {
            if slot.value.is_some() && slot.state != CacheState::Stale {
                slot.state = CacheState::Stale;
                slot.publish();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    fn detail(id: &str) -> FingerprintKey {
        FingerprintKey::new("merchant-detail").param(id)
    }

    #[test]
    fn test_put_then_get_is_fresh() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        let value = CachedValue::new("Acme".to_string());
        store.put(&key, value.clone());

        let entry = store.get(&key).expect("entry should exist");
        assert_eq!(entry.state, CacheState::Fresh);
        assert!(entry.value.as_ref().is_some_and(|v| v.same_value(&value)));
        assert!(entry.updated_at.is_some());
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_get_missing_is_none() {
        let store = CacheStore::new();
        assert!(store.get(&detail("m1")).is_none());
    }

    #[test]
    fn test_put_clears_error() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        store.mark_error(&key, TransportError::Network("reset".into()).into());
        store.put(&key, CachedValue::new(1u32));
        let entry = store.get(&key).expect("entry should exist");
        assert_eq!(entry.state, CacheState::Fresh);
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_mark_error_keeps_last_good_value() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        let value = CachedValue::new("Acme".to_string());
        store.put(&key, value.clone());
        let before = store.get(&key).expect("entry should exist");

        let error: Error = TransportError::status(503, "unavailable").into();
        store.mark_error(&key, error.clone());

        let entry = store.get(&key).expect("entry should exist");
        assert_eq!(entry.state, CacheState::Errored);
        assert_eq!(entry.error, Some(error));
        assert!(entry.value.as_ref().is_some_and(|v| v.same_value(&value)));
        assert_eq!(entry.updated_at, before.updated_at);
    }

    #[test]
    fn test_invalidate_marks_matching_stale_only() {
        let mut store = CacheStore::new();
        store.put(&detail("m1"), CachedValue::new(1u32));
        store.put(&detail("m2"), CachedValue::new(2u32));
        let list = FingerprintKey::new("merchant-list");
        store.put(&list, CachedValue::new(vec![1u32, 2]));

        let matched = store.invalidate(&KeyPattern::new("merchant-detail").literal("m1"));
        assert_eq!(matched, vec![detail("m1")]);

        assert_eq!(store.get(&detail("m1")).map(|e| e.state), Some(CacheState::Stale));
        assert_eq!(store.get(&detail("m2")).map(|e| e.state), Some(CacheState::Fresh));
        assert_eq!(store.get(&list).map(|e| e.state), Some(CacheState::Fresh));
        // Stale entries still serve their value
        assert!(store.get(&detail("m1")).is_some_and(|e| e.has_value()));
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let mut store = CacheStore::new();
        store.put(&detail("m1"), CachedValue::new(1u32));
        store.put(&detail("m2"), CachedValue::new(2u32));
        let pattern = KeyPattern::parse("merchant-detail", ["*"]);

        store.invalidate(&pattern);
        let once: Vec<_> = [detail("m1"), detail("m2")]
            .iter()
            .map(|k| store.get(k))
            .collect();
        store.invalidate(&pattern);
        let twice: Vec<_> = [detail("m1"), detail("m2")]
            .iter()
            .map(|k| store.get(k))
            .collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_invalidate_leaves_errored_state() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        store.mark_error(&key, TransportError::Other("nope".into()).into());
        assert!(!store.invalidate_key(&key));
        assert_eq!(store.get(&key).map(|e| e.state), Some(CacheState::Errored));
    }

    #[test]
    fn test_invalidate_changes_generation() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        store.put(&key, CachedValue::new(1u32));
        let before = store.generation(&key);
        store.invalidate_key(&key);
        assert_ne!(store.generation(&key), before);
    }

    #[test]
    fn test_evict_removes_entry() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        store.put(&key, CachedValue::new(1u32));
        let evicted = store.evict(&key).expect("entry should be evicted");
        assert_eq!(evicted.state, CacheState::Fresh);
        assert!(store.get(&key).is_none());
        assert!(store.evict(&key).is_none());
    }

    #[test]
    fn test_recreated_entry_gets_new_generation() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        store.put(&key, CachedValue::new(1u32));
        let first = store.generation(&key);
        store.evict(&key);
        store.put(&key, CachedValue::new(2u32));
        assert_ne!(store.generation(&key), first);
    }

    #[test]
    fn test_begin_fetch_without_value_is_loading() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        store.begin_fetch(&key);
        let entry = store.get(&key).expect("entry should exist");
        assert_eq!(entry.state, CacheState::Loading);
        assert!(entry.is_fetching);
    }

    #[test]
    fn test_begin_fetch_with_value_keeps_state() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        store.put(&key, CachedValue::new(1u32));
        store.invalidate_key(&key);
        store.begin_fetch(&key);
        let entry = store.get(&key).expect("entry should exist");
        assert_eq!(entry.state, CacheState::Stale);
        assert!(entry.is_fetching);
    }

    #[test]
    fn test_fetching_until_every_fetch_ends() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        store.begin_fetch(&key);
        store.begin_fetch(&key);
        store.put(&key, CachedValue::new(1u32));
        store.end_fetch(&key);
        assert!(store.get(&key).is_some_and(|e| e.is_fetching));
        store.end_fetch(&key);
        store.end_fetch(&key);
        assert!(store.get(&key).is_some_and(|e| !e.is_fetching));
    }

    #[test]
    fn test_subscribers_see_latest_snapshot() {
        let mut store = CacheStore::new();
        let key = detail("m1");
        let mut rx = store.subscribe(&key);
        assert_eq!(store.observer_count(&key), 1);

        store.put(&key, CachedValue::new(1u32));
        store.invalidate_key(&key);
        assert!(rx.has_changed().unwrap_or(false));
        assert_eq!(rx.borrow_and_update().state, CacheState::Stale);

        drop(rx);
        assert_eq!(store.observer_count(&key), 0);
    }

    #[test]
    fn test_clear_empties_store() {
        let mut store = CacheStore::new();
        store.put(&detail("m1"), CachedValue::new(1u32));
        store.put(&detail("m2"), CachedValue::new(2u32));
        assert_eq!(store.len(), 2);
        store.clear();
        assert!(store.is_empty());
    }
}
