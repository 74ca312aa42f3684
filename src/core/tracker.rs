//! Monotone best-value register
//!
//! The `MaxValueTracker` holds a `(value, data)` pair whose value never
//! decreases. It is the required primitive wherever concurrent actors race
//! to record a "best so far" artifact, most notably the best incoming
//! settlement claim: whichever claim carries the highest value wins, and
//! any interleaving of `set_if_max` calls converges to the same final
//! state.

use crate::store::Store;
use crate::types::PluginError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A `(value, data)` pair held by the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEntry {
    /// The comparable value (exact decimal, serialized as a string)
    #[serde(with = "rust_decimal::serde::str")]
    pub value: Decimal,

    /// Opaque payload carried alongside the value
    pub data: serde_json::Value,
}

impl TrackerEntry {
    /// Create an entry
    pub fn new(value: Decimal, data: serde_json::Value) -> Self {
        TrackerEntry { value, data }
    }

    /// The zero entry an empty tracker is equivalent to
    fn zero() -> Self {
        TrackerEntry {
            value: Decimal::ZERO,
            data: serde_json::Value::Null,
        }
    }
}

/// Monotone `(value, data)` register with atomic set-if-max
///
/// An empty tracker behaves as `{ value: 0, data: null }`. Bound trackers
/// persist the current maximum through the shared [`Store`] after every
/// accepted update.
pub struct MaxValueTracker {
    current: Mutex<Option<TrackerEntry>>,
    store: Option<(Arc<dyn Store>, String)>,
}

impl MaxValueTracker {
    /// Create an unbound (memory-only) tracker
    pub fn new() -> Self {
        MaxValueTracker {
            current: Mutex::new(None),
            store: None,
        }
    }

    /// Bind a tracker to a store under `key`, restoring a persisted maximum
    pub async fn bound(store: Arc<dyn Store>, key: impl Into<String>) -> Result<Self, PluginError> {
        let key = key.into();
        let current = match store.get(&key).await? {
            Some(bytes) => Some(serde_json::from_slice(&bytes).map_err(|e| {
                PluginError::store(format!("corrupt tracker snapshot: {}", e))
            })?),
            None => None,
        };
        Ok(MaxValueTracker {
            current: Mutex::new(current),
            store: Some((store, key)),
        })
    }

    /// Replace the entry if the candidate's value is strictly greater
    ///
    /// Returns the displaced previous maximum when the candidate wins, or
    /// the candidate itself unchanged when it does not. Two concurrent
    /// calls always produce the state some serialization of them would.
    ///
    /// A bound tracker writes through [`Store::update`]: the closure
    /// re-compares against whatever is persisted under the key, so the
    /// stored maximum never decreases even when another tracker instance
    /// shares the record.
    pub async fn set_if_max(&self, entry: TrackerEntry) -> Result<TrackerEntry, PluginError> {
        let mut current = self.current.lock().await;
        let previous = current.clone().unwrap_or_else(TrackerEntry::zero);
        if entry.value > previous.value {
            if let Some((store, key)) = &self.store {
                let candidate = serde_json::to_vec(&entry)
                    .map_err(|e| PluginError::store(format!("serialize tracker: {}", e)))?;
                let value = entry.value;
                store
                    .update(key, &mut |persisted| {
                        if let Some(bytes) = persisted {
                            if let Ok(prev) = serde_json::from_slice::<TrackerEntry>(bytes) {
                                if prev.value >= value {
                                    return Ok(bytes.to_vec());
                                }
                            }
                        }
                        Ok(candidate.clone())
                    })
                    .await?;
            }
            *current = Some(entry);
            Ok(previous)
        } else {
            Ok(entry)
        }
    }

    /// The current maximum, `None` if nothing was ever recorded
    pub async fn get_max(&self) -> Option<TrackerEntry> {
        self.current.lock().await.clone()
    }
}

impl Default for MaxValueTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn entry(value: i64) -> TrackerEntry {
        TrackerEntry::new(Decimal::new(value, 0), serde_json::json!({ "claim": value }))
    }

    #[tokio::test]
    async fn test_empty_tracker_behaves_as_zero() {
        let tracker = MaxValueTracker::new();
        assert_eq!(tracker.get_max().await, None);

        // Anything above zero displaces the implicit zero entry
        let displaced = tracker.set_if_max(entry(1)).await.unwrap();
        assert_eq!(displaced.value, Decimal::ZERO);
        assert_eq!(displaced.data, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_lower_value_is_returned_unchanged() {
        let tracker = MaxValueTracker::new();
        tracker.set_if_max(entry(50)).await.unwrap();

        let bounced = tracker.set_if_max(entry(40)).await.unwrap();
        assert_eq!(bounced, entry(40));
        assert_eq!(tracker.get_max().await, Some(entry(50)));
    }

    #[tokio::test]
    async fn test_equal_value_does_not_replace() {
        let tracker = MaxValueTracker::new();
        tracker.set_if_max(entry(50)).await.unwrap();

        let candidate = TrackerEntry::new(Decimal::new(50, 0), serde_json::json!("other"));
        let bounced = tracker.set_if_max(candidate.clone()).await.unwrap();
        assert_eq!(bounced, candidate);
        assert_eq!(tracker.get_max().await.unwrap().data, serde_json::json!({ "claim": 50 }));
    }

    #[tokio::test]
    async fn test_value_is_monotone_across_any_sequence() {
        let tracker = MaxValueTracker::new();
        let mut observed = Decimal::ZERO;
        for value in [30, 50, 40, 70, 10, 70] {
            tracker.set_if_max(entry(value)).await.unwrap();
            let max = tracker.get_max().await.unwrap().value;
            assert!(max >= observed);
            observed = max;
        }
        assert_eq!(observed, Decimal::new(70, 0));
    }

    #[tokio::test]
    async fn test_concurrent_set_if_max_converges() {
        let tracker = Arc::new(MaxValueTracker::new());
        let mut handles = vec![];
        for value in 1..=32i64 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                tracker.set_if_max(entry(value)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tracker.get_max().await, Some(entry(32)));
    }

    #[tokio::test]
    async fn test_shared_record_stays_monotone_across_instances() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let first = MaxValueTracker::bound(Arc::clone(&store), "Y2xhaW0")
            .await
            .unwrap();
        let second = MaxValueTracker::bound(Arc::clone(&store), "Y2xhaW0")
            .await
            .unwrap();

        first.set_if_max(entry(70)).await.unwrap();
        // The second instance opened before 70 was recorded; its stale,
        // lower candidate must not clobber the persisted maximum.
        second.set_if_max(entry(40)).await.unwrap();

        let reopened = MaxValueTracker::bound(store, "Y2xhaW0").await.unwrap();
        assert_eq!(reopened.get_max().await, Some(entry(70)));
    }

    #[tokio::test]
    async fn test_bound_tracker_restores_maximum() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        {
            let tracker = MaxValueTracker::bound(Arc::clone(&store), "Y2xhaW0")
                .await
                .unwrap();
            tracker.set_if_max(entry(70)).await.unwrap();
            tracker.set_if_max(entry(40)).await.unwrap();
        }
        let tracker = MaxValueTracker::bound(Arc::clone(&store), "Y2xhaW0")
            .await
            .unwrap();
        assert_eq!(tracker.get_max().await, Some(entry(70)));
    }
}
