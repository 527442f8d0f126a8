//! The key-value contract the auth engine persists through.

use async_trait::async_trait;

use crate::error::Result;

/// Durable key-value storage for JSON values.
///
/// Writes are whole-value replacements: `set` never merges into an existing
/// value. Deleting a key that does not exist succeeds, which keeps logout
/// idempotent.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read the value stored under `key`, or `None` if nothing is stored.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Remove the value stored under `key`.
    async fn delete(&self, key: &str) -> Result<()>;
}
