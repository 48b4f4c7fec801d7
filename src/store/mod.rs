//! Document-store abstraction backing the pending-payment, cart and order
//! collections. Each document operation is independently atomic; nothing here
//! provides cross-document transactions, so callers sequence their writes to
//! keep partial failures recoverable.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

/// Collection holding transient correlation records, keyed by MerchantRequestID.
pub const PENDING_PAYMENTS: &str = "pending_payments";
/// Collection holding carts, keyed by `{user_id}:{cart_id}`.
pub const CARTS: &str = "carts";
/// Append-only collection of orders, keyed by transaction id.
pub const ORDERS: &str = "orders";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Low-level interface a document-store backend must provide. Every method is
/// atomic with respect to the single document it touches.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_bytes(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put_bytes(&self, collection: &str, id: &str, value: Vec<u8>)
    -> Result<(), StoreError>;

    /// Returns true if a document was present and removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Atomically replaces the document only if its current bytes equal
    /// `expected`. Returns false when the document is absent or has changed.
    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, StoreError>;
}

/// Typed facade over a document-store backend. Serializes entities to JSON and
/// is cheap to clone into request handlers and the reconciliation worker.
#[derive(Clone)]
pub struct Documents {
    backend: Arc<dyn DocumentStore>,
}

impl Documents {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn fetch<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.backend.get_bytes(collection, id).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn store<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        data: &T,
    ) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(data).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.backend.put_bytes(collection, id, bytes).await
    }

    pub async fn remove(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.backend.delete(collection, id).await
    }

    /// Conditional write: replaces the document only if it still deserializes
    /// from exactly the bytes `current` serializes to. This is the closest the
    /// store gets to a transaction and is what guards against duplicate
    /// callback delivery.
    pub async fn replace_if<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        current: &T,
        next: &T,
    ) -> Result<bool, StoreError> {
        let expected =
            serde_json::to_vec(current).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let value =
            serde_json::to_vec(next).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.backend.replace_if(collection, id, &expected, value).await
    }
}
