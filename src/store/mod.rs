//! Key-value store abstraction
//!
//! This module defines the minimal atomic named-record interface the
//! transfer log and the trackers persist through, with two interchangeable
//! implementations:
//! - `memory`: non-durable, `DashMap`-backed
//! - `sled_store`: durable, backed by an embedded sled tree
//!
//! Both variants provide the same atomicity guarantee: `update` applies a
//! read-modify-write to a single named record with no interleaving writer
//! on that record.

use crate::types::PluginError;
use async_trait::async_trait;

pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Closure applied atomically to a record by [`Store::update`]
///
/// Receives the current value (`None` if the record does not exist) and
/// returns the replacement value. May run more than once if the backing
/// store retries on contention.
pub type UpdateFn<'a> =
    &'a mut (dyn FnMut(Option<&[u8]>) -> Result<Vec<u8>, PluginError> + Send);

/// Atomic named-record key-value store
///
/// Records are addressed by caller-chosen string keys (base64url by
/// convention); values are opaque byte strings. Key collisions between
/// unrelated components are the caller's responsibility.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a record, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PluginError>;

    /// Write a record unconditionally
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), PluginError>;

    /// Delete a record; deleting an absent record is a no-op
    async fn remove(&self, key: &str) -> Result<(), PluginError>;

    /// Atomically read-modify-write a single record
    ///
    /// Returns the value that was written. No other writer observes or
    /// mutates the record between the read and the write.
    async fn update(&self, key: &str, f: UpdateFn<'_>) -> Result<Vec<u8>, PluginError>;
}
