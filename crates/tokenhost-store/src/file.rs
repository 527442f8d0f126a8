//! JSON-file token store.
//!
//! All keys live in a single JSON object on disk. Every mutation rewrites
//! the whole file through a sibling temp file followed by a rename, so a
//! crash mid-write leaves either the old or the new contents, never a mix.
//!
//! The temp file is created with mode 0600 on Unix, so the tokens are never
//! readable by other users, not even between write and rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::store::TokenStore;

type Entries = BTreeMap<String, serde_json::Value>;

/// A [`TokenStore`] persisted as one JSON object in a file.
pub struct JsonFileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileTokenStore {
    /// Create a store backed by `path`.
    ///
    /// The parent directory must exist. The file itself is created on the
    /// first [`set`](TokenStore::set).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Default file location: `<data_dir>/tokens.json`.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("tokens.json")
    }

    /// The file this store reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<Entries> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Entries::new());
        }

        let value: serde_json::Value = serde_json::from_slice(&bytes)?;
        match value {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(StoreError::Corrupted {
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    async fn write_entries(&self, entries: &Entries) -> Result<()> {
        let data = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");

        // A leftover temp file would keep whatever mode it was created with.
        match tokio::fs::remove_file(&tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(e)),
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonFileTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileTokenStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl TokenStore for JsonFileTokenStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        Ok(entries.remove(key))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.insert(key.to_string(), value);
        self.write_entries(&entries).await?;

        tracing::debug!(key = key, path = %self.path.display(), "stored value in file store");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.write_entries(&entries).await?;

        tracing::debug!(key = key, path = %self.path.display(), "deleted value from file store");
        Ok(())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, JsonFileTokenStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileTokenStore::new(JsonFileTokenStore::default_path(dir.path()));
        (dir, store)
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let (_dir, store) = temp_store();
        assert!(store.get("anything").await.unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn set_creates_file() {
        let (_dir, store) = temp_store();
        store.set("oauth_tokens", json!({"access_token": "a"})).await.unwrap();
        assert!(store.path().exists());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("oauth_tokens"));
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let (dir, store) = temp_store();
        store.set("a", json!(1)).await.unwrap();
        store.set("b", json!({"nested": true})).await.unwrap();
        drop(store);

        let reopened = JsonFileTokenStore::new(JsonFileTokenStore::default_path(dir.path()));
        assert_eq!(reopened.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(
            reopened.get("b").await.unwrap(),
            Some(json!({"nested": true}))
        );
    }

    #[tokio::test]
    async fn delete_keeps_other_keys() {
        let (_dir, store) = temp_store();
        store.set("a", json!(1)).await.unwrap();
        store.set("b", json!(2)).await.unwrap();
        store.delete("a").await.unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.get("b").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn delete_missing_key_is_ok() {
        let (_dir, store) = temp_store();
        store.delete("never-set").await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn non_object_file_is_corrupted() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "[1, 2, 3]").unwrap();

        let result = store.get("a").await;
        assert!(matches!(result, Err(StoreError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn blank_file_reads_as_empty() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "  \n").unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = temp_store();
        store.set("a", json!(1)).await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_temp_file_does_not_widen_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = temp_store();
        let tmp = store.path().with_extension("json.tmp");
        std::fs::write(&tmp, "stale").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        store.set("a", json!(1)).await.unwrap();

        assert!(!tmp.exists());
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));
    }
}
