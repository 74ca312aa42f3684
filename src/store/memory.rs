//! In-memory store
//!
//! Non-durable [`Store`] implementation over `DashMap`. Per-record
//! atomicity comes from the map's sharded locking: `update` holds the
//! record's entry for the whole read-modify-write.
//!
//! Semantically identical to the persistent variant under single-process
//! use, which makes it the default for tests and for deployments that
//! accept losing unsettled state on restart.

use crate::store::{Store, UpdateFn};
use crate::types::PluginError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Non-durable `DashMap`-backed store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PluginError> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), PluginError> {
        self.records.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PluginError> {
        self.records.remove(key);
        Ok(())
    }

    async fn update(&self, key: &str, f: UpdateFn<'_>) -> Result<Vec<u8>, PluginError> {
        // The entry guard pins the record's shard, so the closure runs
        // with no competing writer on this key.
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let next = f(Some(occupied.get().as_slice()))?;
                occupied.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                let next = f(None)?;
                vacant.insert(next.clone());
                Ok(next)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_record() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();
        store.put("k", b"v1".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v1".to_vec()));

        store.put("k", b"v2".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = MemoryStore::new();
        store.put("k", b"v".to_vec()).await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_creates_record() {
        let store = MemoryStore::new();
        let written = store
            .update("counter", &mut |current| {
                assert!(current.is_none());
                Ok(b"1".to_vec())
            })
            .await
            .unwrap();
        assert_eq!(written, b"1".to_vec());
        assert_eq!(store.get("counter").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_update_error_leaves_record_unchanged() {
        let store = MemoryStore::new();
        store.put("k", b"v".to_vec()).await.unwrap();

        let result = store
            .update("k", &mut |_| Err(PluginError::store("refused")))
            .await;
        assert!(result.is_err());
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_concurrent_updates_serialize_per_record() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = vec![];
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .update("counter", &mut |current| {
                        let value: u64 = current
                            .map(|bytes| String::from_utf8_lossy(bytes).parse().unwrap())
                            .unwrap_or(0);
                        Ok((value + 1).to_string().into_bytes())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let final_value = store.get("counter").await.unwrap().unwrap();
        assert_eq!(String::from_utf8(final_value).unwrap(), "16");
    }
}
