use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

// Pending payments

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
pub enum PendingStatus {
    Pending,
    Completed,
    Failed,
}

/// Transient correlation state created at initiation and retired by the
/// callback's reconciliation. Keyed by the gateway-issued MerchantRequestID;
/// exactly one live record exists per correlation id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct PendingPaymentEntity {
    pub merchant_request_id: String,
    pub user_id: String,
    pub cart_id: String,
    pub session_id: String,
    pub amount: u64,
    pub phone_number: String,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
}

impl PendingPaymentEntity {
    pub fn with_status(&self, status: PendingStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

// Carts

/// Externally-owned cart, consumed (deleted) exactly once by a successful
/// reconciliation. Line items and metadata are copied verbatim into the order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct CartEntity {
    pub user_id: String,
    pub cart_id: String,
    pub products: Vec<Value>,
    #[serde(default)]
    pub metadata: Value,
}

impl CartEntity {
    /// Document key within the carts collection.
    pub fn key(user_id: &str, cart_id: &str) -> String {
        format!("{user_id}:{cart_id}")
    }
}

// Orders

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
pub enum OrderStatus {
    Paid,
    Completed,
}

/// Permanent record of a fulfilled payment. Writing this document is the
/// single commit point of reconciliation; it is never mutated afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct OrderEntity {
    pub transaction_id: String,
    pub user_id: String,
    pub cart_id: String,
    pub session_id: String,
    pub amount: u64,
    pub phone_number: String,
    pub products: Vec<Value>,
    pub status: OrderStatus,
    pub payment_mode: String,
    pub created_at: DateTime<Utc>,
}
