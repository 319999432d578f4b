//! Seam to the external data source.
//!
//! The cache never sees HTTP verbs, headers or serialization; adapters
//! implement [`Transport`] and build fetch/perform closures on top of it.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::TransportError;

pub trait Transport: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    fn perform(&self, request: Self::Request)
        -> BoxFuture<'_, Result<Self::Response, TransportError>>;
}

impl<T: Transport> Transport for Arc<T> {
    type Request = T::Request;
    type Response = T::Response;

    fn perform(
        &self,
        request: Self::Request,
    ) -> BoxFuture<'_, Result<Self::Response, TransportError>> {
        (**self).perform(request)
    }
}
