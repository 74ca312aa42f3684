//! Persistent store
//!
//! Durable [`Store`] implementation over an embedded sled tree. The
//! atomic read-modify-write of `update` is built on sled's
//! `compare_and_swap`: the closure result is only committed if the record
//! is still at the value the closure read, otherwise the operation
//! retries against the fresh value.

use crate::store::{Store, UpdateFn};
use crate::types::PluginError;
use async_trait::async_trait;
use std::path::Path;

/// Durable sled-backed store
#[derive(Debug, Clone)]
pub struct SledStore {
    tree: sled::Db,
}

impl SledStore {
    /// Open (or create) a store at the given directory
    ///
    /// # Errors
    ///
    /// Returns a `Store` error if sled cannot open the directory, for
    /// example when it is already locked by another process.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let tree = sled::open(path)?;
        Ok(SledStore { tree })
    }
}

#[async_trait]
impl Store for SledStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PluginError> {
        Ok(self.tree.get(key)?.map(|value| value.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), PluginError> {
        self.tree.insert(key, value)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PluginError> {
        self.tree.remove(key)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn update(&self, key: &str, f: UpdateFn<'_>) -> Result<Vec<u8>, PluginError> {
        loop {
            let current = self.tree.get(key)?;
            let next = f(current.as_deref())?;
            let swap = self
                .tree
                .compare_and_swap(key, current, Some(next.clone()))?;
            if swap.is_ok() {
                self.tree.flush_async().await?;
                return Ok(next);
            }
            // Lost the race against another writer on this record; re-read
            // and apply the closure to the new value.
        }
    }
}
