use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoalescingError, Error};
use crate::key::FingerprintKey;

/// Lifecycle of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum CacheState {
    /// Known key, never fetched (disabled or manual query)
    Idle,
    /// First fetch in flight, no value yet
    Loading,
    Fresh,
    /// Invalidated; value still served while a refetch happens
    Stale,
    /// Last fetch failed; the previous value, if any, is kept
    Errored,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Idle => "idle",
            CacheState::Loading => "loading",
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
            CacheState::Errored => "errored",
        }
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-erased cached value. Clone is cheap - the payload sits behind an Arc.
#[derive(Clone)]
pub struct CachedValue {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl CachedValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            inner: value,
            type_name: type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }

    /// Downcast, reporting a key collision when the types disagree
    pub fn downcast_for<T: Any + Send + Sync>(
        &self,
        key: &FingerprintKey,
    ) -> Result<Arc<T>, CoalescingError> {
        self.downcast::<T>()
            .ok_or_else(|| CoalescingError::TypeMismatch {
                key: key.clone(),
                expected: type_name::<T>(),
                found: self.type_name,
            })
    }

    /// Whether both handles point at the same stored value
    pub fn same_value(&self, other: &CachedValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CachedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedValue")
            .field("type", &self.type_name)
            .finish()
    }
}

/// Snapshot of one entry as seen by readers and subscribers
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Option<CachedValue>,
    pub state: CacheState,
    pub updated_at: Option<DateTime<Utc>>,
    pub error: Option<Error>,
    /// A fetch for this key is in flight (first load or background refetch)
    pub is_fetching: bool,
}

impl CacheEntry {
    pub fn idle() -> Self {
        Self {
            value: None,
            state: CacheState::Idle,
            updated_at: None,
            error: None,
            is_fetching: false,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.state == CacheState::Fresh
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn value_as<T: Any + Send + Sync>(
        &self,
        key: &FingerprintKey,
    ) -> Result<Option<Arc<T>>, CoalescingError> {
        self.value
            .as_ref()
            .map(|v| v.downcast_for::<T>(key))
            .transpose()
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.updated_at.map(|at| (Utc::now() - at).num_minutes())
    }

    /// Human-readable age of the value, "never" if nothing was stored yet
    pub fn age_display(&self) -> String {
        let minutes = match self.age_minutes() {
            Some(m) => m,
            None => return "never".to_string(),
        };
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

impl PartialEq for CacheEntry {
    /// Values compare by identity, everything else by value
    fn eq(&self, other: &Self) -> bool {
        let same_value = match (&self.value, &other.value) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        };
        same_value
            && self.state == other.state
            && self.updated_at == other.updated_at
            && self.error == other.error
            && self.is_fetching == other.is_fetching
    }
}
