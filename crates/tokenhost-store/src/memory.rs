//! In-process token store.
//!
//! Nothing survives a restart. Used by tests and by hosts that keep
//! credentials only for the lifetime of the process.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::store::TokenStore;

/// A [`TokenStore`] backed by a `HashMap` behind an async `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        tracing::debug!(key = key, "stored value in memory store");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.entries.write().await.remove(key).is_some() {
            tracing::debug!(key = key, "deleted value from memory store");
        }
        Ok(())
    }
}
