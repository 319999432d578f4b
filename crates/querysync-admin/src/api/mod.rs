//! REST API access for the merchant admin service.
//!
//! `HttpTransport` implements the cache's `Transport` seam over reqwest.
//! Requests carry a bearer token obtained outside this crate.

pub mod client;
pub mod error;

pub use client::{ApiRequest, HttpTransport};
pub use error::ApiError;
