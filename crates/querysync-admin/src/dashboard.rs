//! Merchant dashboard: the admin screens' reads and writes.
//!
//! Declares the cached queries, the mutations and the invalidation rules that
//! tie them together. Writers never name the screens they affect; the rules
//! registered in [`MerchantDashboard::register_rules`] do.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use querysync_core::{
    CoalescingError, FingerprintKey, InvalidationRule, KeyPattern, Mutation, NotificationSink,
    QueryClient, QueryConfig, QueryHandle, TracingNotifier, Transport, TransportError,
    ValidationError,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::api::ApiRequest;
use crate::models::{Merchant, MerchantRef, MerchantUpdate, NewMerchant, Order, RefundRequest};

pub const MERCHANT_LIST: &str = "merchant-list";
pub const MERCHANT_DETAIL: &str = "merchant-detail";
pub const CUSTOMER_ORDERS: &str = "customer-orders";

pub const CREATE_MERCHANT: &str = "createMerchant";
pub const UPDATE_MERCHANT: &str = "updateMerchant";
pub const DELETE_MERCHANT: &str = "deleteMerchant";
pub const REFUND_ORDER: &str = "refundOrder";

/// Status filter value meaning "no filter"
const ALL: &str = "all";

pub fn merchant_list_key(status: Option<&str>) -> FingerprintKey {
    FingerprintKey::new(MERCHANT_LIST).param(status.unwrap_or(ALL))
}

pub fn merchant_detail_key(id: &str) -> FingerprintKey {
    FingerprintKey::new(MERCHANT_DETAIL).param(id)
}

pub fn customer_orders_key(customer_id: &str, status: Option<&str>) -> FingerprintKey {
    FingerprintKey::new(CUSTOMER_ORDERS)
        .param(customer_id)
        .param(status.unwrap_or(ALL))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, TransportError> {
    serde_json::from_value(value).map_err(|e| TransportError::Decode(e.to_string()))
}

fn require_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        Err(ValidationError::Rejected("merchant name must not be empty".into()))
    } else {
        Ok(())
    }
}

pub struct MerchantDashboard<T> {
    client: QueryClient,
    transport: Arc<T>,
    notifier: Arc<dyn NotificationSink>,
}

impl<T> MerchantDashboard<T>
where
    T: Transport<Request = ApiRequest, Response = Value>,
{
    /// Bind the dashboard to `client`, registering its invalidation rules
    pub fn new(client: QueryClient, transport: T) -> Result<Self, ValidationError> {
        Self::register_rules(&client)?;
        Ok(Self {
            client,
            transport: Arc::new(transport),
            notifier: Arc::new(TracingNotifier),
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn register_rules(client: &QueryClient) -> Result<(), ValidationError> {
        client.register_rule(
            InvalidationRule::new(CREATE_MERCHANT).invalidates(KeyPattern::new(MERCHANT_LIST)),
        )?;
        client.register_rule(
            InvalidationRule::new(UPDATE_MERCHANT)
                .invalidates(KeyPattern::new(MERCHANT_DETAIL).from_payload("/id"))
                .invalidates(KeyPattern::new(MERCHANT_LIST)),
        )?;
        client.register_rule(
            InvalidationRule::new(DELETE_MERCHANT)
                .evicts(KeyPattern::new(MERCHANT_DETAIL).from_payload("/id"))
                .invalidates(KeyPattern::new(MERCHANT_LIST)),
        )?;
        client.register_rule(
            InvalidationRule::new(REFUND_ORDER)
                .invalidates(KeyPattern::new(CUSTOMER_ORDERS).from_payload("/customer_id")),
        )?;
        Ok(())
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    /// Fetch function issuing `request` and decoding the response as `R`
    fn fetcher<R>(
        &self,
        request: ApiRequest,
    ) -> impl Fn() -> BoxFuture<'static, Result<R, TransportError>> + Send + Sync + 'static
    where
        R: DeserializeOwned + Send + 'static,
    {
        let transport = self.transport.clone();
        move || {
            let transport = transport.clone();
            let request = request.clone();
            async move { decode(transport.perform(request).await?) }.boxed()
        }
    }

    // ===== Queries =====

    pub async fn merchants(
        &self,
        status: Option<&str>,
    ) -> Result<QueryHandle<Vec<Merchant>>, CoalescingError> {
        let mut request = ApiRequest::get("/merchants");
        if let Some(status) = status {
            request = request.query("status", status);
        }
        self.client
            .query(merchant_list_key(status), self.fetcher(request), QueryConfig::default())
            .await
    }

    pub async fn merchant(&self, id: &str) -> Result<QueryHandle<Merchant>, CoalescingError> {
        let request = ApiRequest::get(format!("/merchants/{}", id));
        self.client
            .query(merchant_detail_key(id), self.fetcher(request), QueryConfig::default())
            .await
    }

    pub async fn customer_orders(
        &self,
        customer_id: &str,
        status: Option<&str>,
    ) -> Result<QueryHandle<Vec<Order>>, CoalescingError> {
        let mut request = ApiRequest::get("/orders").query("customer_id", customer_id);
        if let Some(status) = status {
            request = request.query("status", status);
        }
        self.client
            .query(
                customer_orders_key(customer_id, status),
                self.fetcher(request),
                QueryConfig::default(),
            )
            .await
    }

    // ===== Mutations =====

    pub fn create_merchant(&self) -> Mutation<NewMerchant, Merchant> {
        let transport = self.transport.clone();
        self.client
            .mutation(CREATE_MERCHANT, move |new: NewMerchant| {
                let transport = transport.clone();
                async move {
                    let request = ApiRequest::post("/merchants", json!({ "name": new.name }));
                    decode::<Merchant>(transport.perform(request).await?)
                }
            })
            .validate_with(|new: &NewMerchant| require_name(&new.name))
            .notify_with(self.notifier.clone(), "Merchant created")
    }

    pub fn update_merchant(&self) -> Mutation<MerchantUpdate, Merchant> {
        let transport = self.transport.clone();
        self.client
            .mutation(UPDATE_MERCHANT, move |update: MerchantUpdate| {
                let transport = transport.clone();
                async move {
                    let request = ApiRequest::put(
                        format!("/merchants/{}", update.id),
                        json!({ "name": update.name }),
                    );
                    decode::<Merchant>(transport.perform(request).await?)
                }
            })
            .validate_with(|update: &MerchantUpdate| require_name(&update.name))
            .notify_with(self.notifier.clone(), "Merchant updated")
    }

    pub fn delete_merchant(&self) -> Mutation<MerchantRef, ()> {
        let transport = self.transport.clone();
        self.client
            .mutation(DELETE_MERCHANT, move |merchant: MerchantRef| {
                let transport = transport.clone();
                async move {
                    let request = ApiRequest::delete(format!("/merchants/{}", merchant.id));
                    transport.perform(request).await.map(|_| ())
                }
            })
            .notify_with(self.notifier.clone(), "Merchant deleted")
    }

    pub fn refund_order(&self) -> Mutation<RefundRequest, Order> {
        let transport = self.transport.clone();
        self.client
            .mutation(REFUND_ORDER, move |refund: RefundRequest| {
                let transport = transport.clone();
                async move {
                    let request = ApiRequest::post(
                        format!("/orders/{}/refund", refund.order_id),
                        json!({ "customer_id": refund.customer_id }),
                    );
                    decode::<Order>(transport.perform(request).await?)
                }
            })
            .notify_with(self.notifier.clone(), "Order refunded")
    }
}
