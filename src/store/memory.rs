//! In-memory document-store backend. Used by tests and as the default local
//! backend; a deployed instance would point at a hosted document store behind
//! the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{DocumentStore, StoreError};

pub struct MemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_bytes(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn put_bytes(
        &self,
        collection: &str,
        id: &str,
        value: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some())
    }

    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, StoreError> {
        // Holding the write lock across compare and swap makes this atomic.
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs.get(id) {
            Some(current) if current.as_slice() == expected => {
                docs.insert(id.to_string(), value);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
