//! Mutation executor.
//!
//! A mutation performs one write against the external source and, only after
//! the write is confirmed, applies the invalidation rule registered under its
//! name. Failed or rejected mutations leave the cache untouched.
//!
//! Mutation state is private to the caller holding the [`Mutation`]; it is
//! never stored in the shared cache.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{InvalidationReport, QueryClient};
use crate::error::{Error, Result, ValidationError};
use crate::notify::{NotificationKind, NotificationSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum MutationState {
    #[default]
    Idle,
    Pending,
    Succeeded,
    Failed,
}

impl MutationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationState::Idle => "idle",
            MutationState::Pending => "pending",
            MutationState::Succeeded => "succeeded",
            MutationState::Failed => "failed",
        }
    }
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type PerformFn<P, R> = Arc<dyn Fn(P) -> BoxFuture<'static, Result<R>> + Send + Sync>;
type Validator<P> = Arc<dyn Fn(&P) -> std::result::Result<(), ValidationError> + Send + Sync>;

/// A named write operation bound to a client.
pub struct Mutation<P, R> {
    client: QueryClient,
    name: String,
    perform: PerformFn<P, R>,
    validator: Option<Validator<P>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    success_message: Option<String>,
    state: MutationState,
    result: Option<Result<Arc<R>>>,
    last_report: Option<InvalidationReport>,
}

impl<P, R> Mutation<P, R>
where
    P: Serialize + Send + 'static,
    R: Send + Sync + 'static,
{
    fn new(client: QueryClient, name: String, perform: PerformFn<P, R>) -> Self {
        Self {
            client,
            name,
            perform,
            validator: None,
            notifier: None,
            success_message: None,
            state: MutationState::Idle,
            result: None,
            last_report: None,
        }
    }

    /// Reject payloads before anything is dispatched
    pub fn validate_with<V>(mut self, validator: V) -> Self
    where
        V: Fn(&P) -> std::result::Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Report outcomes to `sink`. Failures use the error's display text.
    pub fn notify_with(
        mut self,
        sink: Arc<dyn NotificationSink>,
        success_message: impl Into<String>,
    ) -> Self {
        self.notifier = Some(sink);
        self.success_message = Some(success_message.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    /// Outcome of the last trigger, if any
    pub fn result(&self) -> Option<&Result<Arc<R>>> {
        self.result.as_ref()
    }

    /// What the last successful trigger invalidated
    pub fn last_report(&self) -> Option<InvalidationReport> {
        self.last_report
    }

    /// Run the write with `payload`.
    ///
    /// On success the mutation's invalidation rule has been applied by the
    /// time this returns, so a read issued right after never sees the
    /// pre-mutation Fresh value.
    pub async fn trigger(&mut self, payload: P) -> Result<Arc<R>> {
        if let Some(validator) = &self.validator {
            if let Err(e) = validator(&payload) {
                debug!(mutation = %self.name, error = %e, "Mutation rejected before dispatch");
                return self.finish(Err(e.into()));
            }
        }

        let payload_json = match serde_json::to_value(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    mutation = %self.name,
                    error = %e,
                    "Payload not serializable, payload-bound patterns will match broadly"
                );
                None
            }
        };

        self.state = MutationState::Pending;
        self.last_report = None;
        debug!(mutation = %self.name, "Mutation dispatched");

        let outcome = (self.perform)(payload).await;

        match outcome {
            Ok(value) => {
                let report = self
                    .client
                    .apply_invalidation(&self.name, payload_json.as_ref());
                self.last_report = Some(report);
                info!(
                    mutation = %self.name,
                    invalidated = report.invalidated,
                    evicted = report.evicted,
                    "Mutation succeeded"
                );
                self.finish(Ok(Arc::new(value)))
            }
            Err(e) => {
                info!(mutation = %self.name, error = %e, "Mutation failed");
                self.finish(Err(e))
            }
        }
    }

    /// Back to Idle, forgetting the last result
    pub fn reset(&mut self) {
        self.state = MutationState::Idle;
        self.result = None;
        self.last_report = None;
    }

    fn finish(&mut self, result: Result<Arc<R>>) -> Result<Arc<R>> {
        self.state = match &result {
            Ok(_) => MutationState::Succeeded,
            Err(_) => MutationState::Failed,
        };
        if let Some(sink) = &self.notifier {
            match &result {
                Ok(_) => {
                    let message = self.success_message.as_deref().unwrap_or(&self.name);
                    sink.notify(NotificationKind::Success, message);
                }
                Err(e) => sink.notify(NotificationKind::Error, &e.to_string()),
            }
        }
        self.result = Some(result.clone());
        result
    }
}

impl QueryClient {
    /// Bind a write operation to this client under `name`.
    ///
    /// `name` selects the invalidation rule applied after each successful
    /// trigger. A mutation without a registered rule invalidates nothing.
    pub fn mutation<P, R, F, Fut, E>(&self, name: impl Into<String>, perform: F) -> Mutation<P, R>
    where
        P: Serialize + Send + 'static,
        R: Send + Sync + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Into<Error> + Send + 'static,
    {
        let perform: PerformFn<P, R> = Arc::new(move |payload: P| -> BoxFuture<'static, Result<R>> {
            let fut = perform(payload);
            async move { fut.await.map_err(Into::<Error>::into) }.boxed()
        });
        Mutation::new(self.clone(), name.into(), perform)
    }

    /// Run `perform(payload)` once as mutation `name`.
    ///
    /// The returned mutation holds the outcome and can be triggered again.
    pub async fn mutate<P, R, F, Fut, E>(
        &self,
        name: impl Into<String>,
        payload: P,
        perform: F,
    ) -> Mutation<P, R>
    where
        P: Serialize + Send + 'static,
        R: Send + Sync + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Into<Error> + Send + 'static,
    {
        let mut mutation = self.mutation(name, perform);
        // The outcome stays on the mutation
        let _ = mutation.trigger(payload).await;
        mutation
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::{json, Value};

    use super::*;
    use crate::entry::{CacheState, CachedValue};
    use crate::error::TransportError;
    use crate::key::FingerprintKey;
    use crate::pattern::KeyPattern;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<(NotificationKind, String)>>,
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, kind: NotificationKind, message: &str) {
            self.seen
                .lock()
                .expect("sink lock")
                .push((kind, message.to_string()));
        }
    }

    fn seeded_client() -> (QueryClient, FingerprintKey) {
        let client = QueryClient::default();
        client
            .register_invalidation_rule(
                "updateMerchant",
                [KeyPattern::new("merchant-detail").from_payload("/id")],
            )
            .expect("rule should register");
        let key = FingerprintKey::new("merchant-detail").param("m1");
        client
            .lock_core("test")
            .store
            .put(&key, CachedValue::new(json!({"name": "Acme"})));
        (client, key)
    }

    #[tokio::test]
    async fn test_success_invalidates_before_returning() {
        let (client, key) = seeded_client();
        let mut update = client.mutation("updateMerchant", |payload: Value| async move {
            Ok::<_, TransportError>(payload)
        });

        let result = update
            .trigger(json!({"id": "m1", "name": "Acme2"}))
            .await
            .expect("mutation should succeed");

        assert_eq!(result["name"], "Acme2");
        assert_eq!(update.state(), MutationState::Succeeded);
        assert_eq!(client.get(&key).map(|e| e.state), Some(CacheState::Stale));
        assert_eq!(update.last_report().map(|r| r.invalidated), Some(1));
    }

    #[tokio::test]
    async fn test_failure_invalidates_nothing() {
        let (client, key) = seeded_client();
        let before = client.get(&key);

        let mut update = client.mutation("updateMerchant", |_payload: Value| async move {
            Err::<Value, _>(TransportError::status(503, "unavailable"))
        });
        let err = update
            .trigger(json!({"id": "m1"}))
            .await
            .expect_err("mutation should fail");

        assert_eq!(err, Error::Transport(TransportError::status(503, "unavailable")));
        assert_eq!(update.state(), MutationState::Failed);
        assert_eq!(client.get(&key), before);
        assert!(update.last_report().is_none());
    }

    #[tokio::test]
    async fn test_validator_rejects_before_dispatch() {
        let (client, key) = seeded_client();
        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = dispatched.clone();

        let mut update = client
            .mutation("updateMerchant", move |payload: Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, TransportError>(payload) }
            })
            .validate_with(|payload: &Value| {
                if payload["name"].as_str().is_some_and(|n| !n.is_empty()) {
                    Ok(())
                } else {
                    Err(ValidationError::Rejected("name is required".into()))
                }
            });

        let err = update
            .trigger(json!({"id": "m1", "name": ""}))
            .await
            .expect_err("validation should fail");

        assert!(matches!(err, Error::Validation(ValidationError::Rejected(_))));
        assert_eq!(dispatched.load(Ordering::SeqCst), 0);
        assert_eq!(update.state(), MutationState::Failed);
        assert_eq!(client.get(&key).map(|e| e.state), Some(CacheState::Fresh));
    }

    #[tokio::test]
    async fn test_notifications() {
        let (client, _key) = seeded_client();
        let sink = Arc::new(RecordingSink::default());
        let fail = Arc::new(AtomicUsize::new(0));
        let attempts = fail.clone();

        let mut update = client
            .mutation("updateMerchant", move |payload: Value| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(payload)
                    } else {
                        Err(TransportError::Network("connection reset".into()))
                    }
                }
            })
            .notify_with(sink.clone(), "Merchant updated");

        update.trigger(json!({"id": "m1"})).await.expect("first should succeed");
        update.trigger(json!({"id": "m1"})).await.expect_err("second should fail");

        let seen = sink.seen.lock().expect("sink lock").clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (NotificationKind::Success, "Merchant updated".to_string()));
        assert_eq!(seen[1].0, NotificationKind::Error);
        assert!(seen[1].1.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_mutate_returns_settled_mutation() {
        let (client, key) = seeded_client();
        let mut mutation = client
            .mutate("updateMerchant", json!({"id": "m1"}), |payload: Value| async move {
                Ok::<_, TransportError>(payload)
            })
            .await;

        assert_eq!(mutation.state(), MutationState::Succeeded);
        assert!(matches!(mutation.result(), Some(Ok(_))));
        assert_eq!(client.get(&key).map(|e| e.state), Some(CacheState::Stale));

        mutation.reset();
        assert_eq!(mutation.state(), MutationState::Idle);
        assert!(mutation.result().is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(MutationState::default().to_string(), "idle");
        assert_eq!(MutationState::Succeeded.to_string(), "succeeded");
    }
}
