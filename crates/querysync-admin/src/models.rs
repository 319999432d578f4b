//! Data models for the merchant admin API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merchant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_cents: i64,
    #[serde(default)]
    pub refunded: bool,
}

// ===== Mutation payloads =====
// Field names are what invalidation rules point into (`/id`, `/customer_id`).

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMerchant {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantUpdate {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub customer_id: String,
    pub order_id: String,
}
