//! Client-side query cache with coalesced reads and rule-based invalidation.
//!
//! Reads go through [`QueryClient::query`], which serves cached values and
//! shares one in-flight fetch between concurrent callers of the same key.
//! Writes go through a [`Mutation`]; once the write succeeds, the
//! [`InvalidationRule`] registered under the mutation's name marks the
//! affected entries Stale (or evicts them), and observed entries refetch.
//!
//! ```no_run
//! use querysync_core::{FingerprintKey, KeyPattern, QueryClient, QueryConfig, TransportError};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = QueryClient::default();
//! client.register_invalidation_rule(
//!     "updateMerchant",
//!     [KeyPattern::new("merchant-detail").from_payload("/id")],
//! )?;
//!
//! let key = FingerprintKey::new("merchant-detail").param("m1");
//! let merchant = client
//!     .query(key, || async { Ok::<_, TransportError>("Acme".to_string()) }, QueryConfig::default())
//!     .await?;
//! println!("{:?} ({})", merchant.value(), merchant.state());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod key;
mod lock;
pub mod mutation;
pub mod notify;
pub mod pattern;
mod pending;
pub mod query;
pub mod router;
pub mod store;
pub mod transport;

pub use client::{InvalidationReport, QueryClient};
pub use config::{ClientConfig, QueryConfig};
pub use entry::{CacheEntry, CacheState, CachedValue};
pub use error::{CoalescingError, Error, Result, TransportError, ValidationError};
pub use key::FingerprintKey;
pub use mutation::{Mutation, MutationState};
pub use notify::{NotificationKind, NotificationSink, TracingNotifier};
pub use pattern::{KeyPattern, Segment, WILDCARD};
pub use query::QueryHandle;
pub use router::{InvalidationRouter, InvalidationRule, Resolution, RuleAction, RuleTarget};
pub use store::CacheStore;
pub use transport::Transport;
