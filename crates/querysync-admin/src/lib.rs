//! Merchant admin glue over `querysync-core`.
//!
//! Provides the HTTP transport, configuration, data models and the
//! [`MerchantDashboard`] declaring the admin screens' queries, mutations and
//! invalidation rules.

pub mod api;
pub mod command;
pub mod config;
pub mod dashboard;
pub mod models;

pub use api::{ApiError, ApiRequest, HttpTransport};
pub use command::{Command, UsageError, USAGE};
pub use config::Config;
pub use dashboard::MerchantDashboard;
