//! Transfer log: the authoritative ledger of conditional transfers
//!
//! This module provides the `TransferLog`, which records every prepared
//! transfer, guards the `prepared -> fulfilled | cancelled` state machine,
//! and maintains four aggregate balances:
//!
//! - incoming fulfilled
//! - incoming fulfilled-and-prepared (bounded above by `maximum`)
//! - outgoing fulfilled
//! - outgoing fulfilled-and-prepared (bounds the signed balance below by
//!   `minimum`)
//!
//! The aggregates are exact functions of the record set; they are updated
//! in the same critical section as the record mutation and are never
//! observable mid-update.
//!
//! # Idempotence
//!
//! `prepare` with an id that already exists succeeds without effect when
//! the transfer is field-for-field identical and fails with a duplicate
//! error otherwise. `fulfill` of a fulfilled transfer and `cancel` of a
//! cancelled transfer are no-ops. This makes every log mutation safe under
//! redelivery of RPC frames.
//!
//! # Persistence
//!
//! A log may be bound to a [`Store`] under a caller-chosen key. A bound
//! log writes its serialized record set and bounds after every mutation
//! and restores them (recomputing aggregates) when reopened with the same
//! key.

use crate::store::Store;
use crate::types::{PluginError, Transfer, TransferRecord, TransferState};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// The four balance aggregates maintained by the log
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Aggregates {
    incoming_fulfilled: Decimal,
    incoming_fulfilled_and_prepared: Decimal,
    outgoing_fulfilled: Decimal,
    outgoing_fulfilled_and_prepared: Decimal,
}

impl Aggregates {
    /// Recompute the aggregates as a pure function of the record set
    fn derive(records: &HashMap<Uuid, TransferRecord>) -> Self {
        let mut aggregates = Aggregates::default();
        for record in records.values() {
            let amount = record.transfer.amount;
            match (record.is_incoming, record.state) {
                (true, TransferState::Prepared) => {
                    aggregates.incoming_fulfilled_and_prepared += amount;
                }
                (true, TransferState::Fulfilled) => {
                    aggregates.incoming_fulfilled += amount;
                    aggregates.incoming_fulfilled_and_prepared += amount;
                }
                (false, TransferState::Prepared) => {
                    aggregates.outgoing_fulfilled_and_prepared += amount;
                }
                (false, TransferState::Fulfilled) => {
                    aggregates.outgoing_fulfilled += amount;
                    aggregates.outgoing_fulfilled_and_prepared += amount;
                }
                (_, TransferState::Cancelled) => {}
            }
        }
        aggregates
    }
}

/// Serialized form of the log: records and bounds, aggregates derived
#[derive(Debug, Serialize, Deserialize)]
struct LogSnapshot {
    records: HashMap<Uuid, TransferRecord>,
    #[serde(with = "rust_decimal::serde::str_option")]
    maximum: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str")]
    minimum: Decimal,
}

#[derive(Debug, Default)]
struct LogState {
    records: HashMap<Uuid, TransferRecord>,
    aggregates: Aggregates,
    /// Upper bound on incoming fulfilled-and-prepared; `None` = unbounded
    maximum: Option<Decimal>,
    /// Lower bound on the signed balance net of prepared outgoing; `<= 0`
    minimum: Decimal,
}

/// Durable, concurrent-safe ledger of conditional transfers
///
/// All operations are linearizable with respect to one another: mutations
/// hold the write lock across the in-memory change and the store write, so
/// no reader observes a record without its aggregate contribution.
pub struct TransferLog {
    state: RwLock<LogState>,
    store: Option<(Arc<dyn Store>, String)>,
}

impl TransferLog {
    /// Create an unbound (memory-only) log
    pub fn new() -> Self {
        TransferLog {
            state: RwLock::new(LogState::default()),
            store: None,
        }
    }

    /// Bind a log to a store under `key`, restoring any persisted state
    ///
    /// Reopening with the same key yields the records and bounds the
    /// previous instance persisted; aggregates are recomputed from the
    /// restored records.
    pub async fn bound(store: Arc<dyn Store>, key: impl Into<String>) -> Result<Self, PluginError> {
        let key = key.into();
        let mut state = LogState::default();
        if let Some(bytes) = store.get(&key).await? {
            let snapshot: LogSnapshot = serde_json::from_slice(&bytes)
                .map_err(|e| PluginError::store(format!("corrupt transfer log snapshot: {}", e)))?;
            state.aggregates = Aggregates::derive(&snapshot.records);
            state.records = snapshot.records;
            state.maximum = snapshot.maximum;
            state.minimum = snapshot.minimum;
        }
        Ok(TransferLog {
            state: RwLock::new(state),
            store: Some((store, key)),
        })
    }

    /// Persist the current state; called inside the write critical section
    ///
    /// The snapshot goes through [`Store::update`] so the named record is
    /// replaced atomically; writers are already serialized by the log's
    /// write lock, so the closure supersedes whatever it reads. A store
    /// failure propagates to the caller; the in-memory state stays
    /// consistent and is re-persisted by the next successful mutation.
    async fn persist(&self, state: &LogState) -> Result<(), PluginError> {
        if let Some((store, key)) = &self.store {
            let snapshot = LogSnapshot {
                records: state.records.clone(),
                maximum: state.maximum,
                minimum: state.minimum,
            };
            let bytes = serde_json::to_vec(&snapshot)
                .map_err(|e| PluginError::store(format!("serialize transfer log: {}", e)))?;
            store.update(key, &mut |_| Ok(bytes.clone())).await?;
        }
        Ok(())
    }

    /// Record a transfer in the `prepared` state
    ///
    /// Returns `true` if the record was inserted and `false` on an
    /// idempotent replay (identical transfer already present).
    ///
    /// # Errors
    ///
    /// - `Duplicate` if the id exists with different contents
    /// - `NotAccepted` if the transfer would violate the side-specific
    ///   balance bound; the log is left unchanged
    /// - `InvalidFields` if the amount is negative
    pub async fn prepare(&self, transfer: Transfer, is_incoming: bool) -> Result<bool, PluginError> {
        if transfer.amount.is_sign_negative() {
            return Err(PluginError::invalid_fields("transfer amount is negative"));
        }

        let mut state = self.state.write().await;

        if let Some(existing) = state.records.get(&transfer.id) {
            if existing.transfer == transfer && existing.is_incoming == is_incoming {
                return Ok(false);
            }
            return Err(PluginError::duplicate(transfer.id));
        }

        let amount = transfer.amount;
        if is_incoming {
            let prospective = state
                .aggregates
                .incoming_fulfilled_and_prepared
                .checked_add(amount)
                .ok_or_else(|| PluginError::not_accepted("amount overflows balance range"))?;
            if let Some(maximum) = state.maximum {
                if prospective > maximum {
                    return Err(PluginError::not_accepted(format!(
                        "incoming transfer of {} would put the balance over the maximum of {}",
                        amount, maximum
                    )));
                }
            }
            state.aggregates.incoming_fulfilled_and_prepared = prospective;
        } else {
            let prospective = state
                .aggregates
                .outgoing_fulfilled_and_prepared
                .checked_add(amount)
                .ok_or_else(|| PluginError::not_accepted("amount overflows balance range"))?;
            let lowest_balance = state.aggregates.incoming_fulfilled - prospective;
            if lowest_balance < state.minimum {
                return Err(PluginError::not_accepted(format!(
                    "outgoing transfer of {} would put the balance under the minimum of {}",
                    amount, state.minimum
                )));
            }
            state.aggregates.outgoing_fulfilled_and_prepared = prospective;
        }

        state
            .records
            .insert(transfer.id, TransferRecord::prepared(transfer, is_incoming));
        self.persist(&state).await?;
        Ok(true)
    }

    /// Transition a prepared transfer to `fulfilled`
    ///
    /// Returns the record and whether the call performed the transition
    /// (`false` when the transfer was already fulfilled).
    ///
    /// # Errors
    ///
    /// - `AlreadyRejected` if the transfer is cancelled
    /// - `InvalidFields` if the id is unknown
    pub async fn fulfill(
        &self,
        id: Uuid,
        fulfillment: &str,
    ) -> Result<(TransferRecord, bool), PluginError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get(&id)
            .ok_or_else(|| PluginError::invalid_fields(format!("unknown transfer id {}", id)))?
            .clone();

        match record.state {
            TransferState::Fulfilled => Ok((record, false)),
            TransferState::Cancelled => Err(PluginError::already_rejected(id)),
            TransferState::Prepared => {
                let amount = record.transfer.amount;
                if record.is_incoming {
                    state.aggregates.incoming_fulfilled += amount;
                } else {
                    state.aggregates.outgoing_fulfilled += amount;
                }
                let mut updated = record;
                updated.state = TransferState::Fulfilled;
                updated.fulfillment = Some(fulfillment.to_string());
                state.records.insert(id, updated.clone());
                self.persist(&state).await?;
                Ok((updated, true))
            }
        }
    }

    /// Transition a prepared transfer to `cancelled`
    ///
    /// Returns the record and whether the call performed the transition
    /// (`false` when the transfer was already cancelled). The fulfilled
    /// aggregates are untouched; the transfer's amount is released from
    /// the fulfilled-and-prepared aggregate of its side.
    ///
    /// # Errors
    ///
    /// - `AlreadyFulfilled` if the transfer is fulfilled
    /// - `InvalidFields` if the id is unknown
    pub async fn cancel(
        &self,
        id: Uuid,
        reason: serde_json::Value,
    ) -> Result<(TransferRecord, bool), PluginError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get(&id)
            .ok_or_else(|| PluginError::invalid_fields(format!("unknown transfer id {}", id)))?
            .clone();

        match record.state {
            TransferState::Cancelled => Ok((record, false)),
            TransferState::Fulfilled => Err(PluginError::already_fulfilled(id)),
            TransferState::Prepared => {
                let amount = record.transfer.amount;
                if record.is_incoming {
                    state.aggregates.incoming_fulfilled_and_prepared -= amount;
                } else {
                    state.aggregates.outgoing_fulfilled_and_prepared -= amount;
                }
                let mut updated = record;
                updated.state = TransferState::Cancelled;
                updated.cancellation_reason = Some(reason);
                state.records.insert(id, updated.clone());
                self.persist(&state).await?;
                Ok((updated, true))
            }
        }
    }

    /// Look up a transfer record by id
    pub async fn get(&self, id: Uuid) -> Option<TransferRecord> {
        self.state.read().await.records.get(&id).cloned()
    }

    /// All records still in the `prepared` state
    ///
    /// Used to restore expiry timers after reopening a bound log.
    pub async fn prepared(&self) -> Vec<TransferRecord> {
        self.state
            .read()
            .await
            .records
            .values()
            .filter(|record| record.state == TransferState::Prepared)
            .cloned()
            .collect()
    }

    /// Signed net balance: incoming fulfilled minus outgoing fulfilled
    pub async fn get_balance(&self) -> Decimal {
        let state = self.state.read().await;
        state.aggregates.incoming_fulfilled - state.aggregates.outgoing_fulfilled
    }

    /// Sum of fulfilled incoming transfer amounts
    pub async fn get_incoming_fulfilled(&self) -> Decimal {
        self.state.read().await.aggregates.incoming_fulfilled
    }

    /// Sum of fulfilled and prepared incoming transfer amounts
    pub async fn get_incoming_fulfilled_and_prepared(&self) -> Decimal {
        self.state
            .read()
            .await
            .aggregates
            .incoming_fulfilled_and_prepared
    }

    /// Sum of fulfilled outgoing transfer amounts
    pub async fn get_outgoing_fulfilled(&self) -> Decimal {
        self.state.read().await.aggregates.outgoing_fulfilled
    }

    /// Sum of fulfilled and prepared outgoing transfer amounts
    pub async fn get_outgoing_fulfilled_and_prepared(&self) -> Decimal {
        self.state
            .read()
            .await
            .aggregates
            .outgoing_fulfilled_and_prepared
    }

    /// Upper bound on incoming fulfilled-and-prepared, `None` if unbounded
    pub async fn get_maximum(&self) -> Option<Decimal> {
        self.state.read().await.maximum
    }

    /// Set (or clear) the upper bound
    pub async fn set_maximum(&self, maximum: Option<Decimal>) -> Result<(), PluginError> {
        let mut state = self.state.write().await;
        state.maximum = maximum;
        self.persist(&state).await
    }

    /// Lower bound on the signed balance net of prepared outgoing transfers
    pub async fn get_minimum(&self) -> Decimal {
        self.state.read().await.minimum
    }

    /// Set the lower bound; must not be positive
    pub async fn set_minimum(&self, minimum: Decimal) -> Result<(), PluginError> {
        if minimum > Decimal::ZERO {
            return Err(PluginError::invalid_fields(
                "minimum balance must not be positive",
            ));
        }
        let mut state = self.state.write().await;
        state.minimum = minimum;
        self.persist(&state).await
    }

    #[cfg(test)]
    async fn aggregates_match_records(&self) -> bool {
        let state = self.state.read().await;
        Aggregates::derive(&state.records) == state.aggregates
    }
}

impl Default for TransferLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    fn transfer(id: &str, amount: i64) -> Transfer {
        Transfer {
            id: Uuid::parse_str(id).unwrap(),
            amount: Decimal::new(amount, 0),
            ledger: "peer.t.".to_string(),
            from: "peer.t.server".to_string(),
            to: "peer.t.client".to_string(),
            execution_condition: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string(),
            expires_at: Utc::now() + Duration::seconds(60),
            ilp: None,
            note_to_self: None,
        }
    }

    const ID_A: &str = "11111111-1111-1111-1111-111111111111";
    const ID_B: &str = "22222222-2222-2222-2222-222222222222";

    #[tokio::test]
    async fn test_prepare_updates_prepared_aggregates_only() {
        let log = TransferLog::new();

        log.prepare(transfer(ID_A, 100), true).await.unwrap();
        assert_eq!(log.get_incoming_fulfilled().await, Decimal::ZERO);
        assert_eq!(
            log.get_incoming_fulfilled_and_prepared().await,
            Decimal::new(100, 0)
        );
        assert_eq!(log.get_balance().await, Decimal::ZERO);
        assert!(log.aggregates_match_records().await);
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent_on_identical_input() {
        let log = TransferLog::new();

        assert!(log.prepare(transfer(ID_A, 100), true).await.unwrap());
        assert!(!log.prepare(transfer(ID_A, 100), true).await.unwrap());
        assert_eq!(
            log.get_incoming_fulfilled_and_prepared().await,
            Decimal::new(100, 0)
        );
    }

    #[tokio::test]
    async fn test_prepare_rejects_same_id_different_contents() {
        let log = TransferLog::new();

        log.prepare(transfer(ID_A, 100), true).await.unwrap();
        let result = log.prepare(transfer(ID_A, 200), true).await;
        assert!(matches!(result, Err(PluginError::Duplicate { .. })));
        // Aggregates unchanged by the failed prepare
        assert_eq!(
            log.get_incoming_fulfilled_and_prepared().await,
            Decimal::new(100, 0)
        );
    }

    #[tokio::test]
    async fn test_incoming_prepare_respects_maximum() {
        let log = TransferLog::new();
        log.set_maximum(Some(Decimal::new(50, 0))).await.unwrap();

        let result = log.prepare(transfer(ID_A, 100), true).await;
        assert!(matches!(result, Err(PluginError::NotAccepted { .. })));
        assert_eq!(
            log.get_incoming_fulfilled_and_prepared().await,
            Decimal::ZERO
        );
        assert!(log.get(Uuid::parse_str(ID_A).unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn test_outgoing_prepare_respects_minimum() {
        let log = TransferLog::new();
        // minimum 0: no outgoing credit before incoming funds
        let result = log.prepare(transfer(ID_A, 100), false).await;
        assert!(matches!(result, Err(PluginError::NotAccepted { .. })));

        log.set_minimum(Decimal::new(-100, 0)).await.unwrap();
        assert!(log.prepare(transfer(ID_A, 100), false).await.unwrap());
        let result = log.prepare(transfer(ID_B, 1), false).await;
        assert!(matches!(result, Err(PluginError::NotAccepted { .. })));
    }

    #[tokio::test]
    async fn test_fulfill_moves_amount_into_fulfilled_aggregate() {
        let log = TransferLog::new();
        log.prepare(transfer(ID_A, 100), true).await.unwrap();

        let (record, transitioned) = log
            .fulfill(Uuid::parse_str(ID_A).unwrap(), "preimage")
            .await
            .unwrap();
        assert!(transitioned);
        assert_eq!(record.state, TransferState::Fulfilled);
        assert_eq!(record.fulfillment.as_deref(), Some("preimage"));
        assert_eq!(log.get_incoming_fulfilled().await, Decimal::new(100, 0));
        assert_eq!(
            log.get_incoming_fulfilled_and_prepared().await,
            Decimal::new(100, 0)
        );
        assert_eq!(log.get_balance().await, Decimal::new(100, 0));
        assert!(log.aggregates_match_records().await);
    }

    #[tokio::test]
    async fn test_fulfill_is_noop_when_already_fulfilled() {
        let log = TransferLog::new();
        log.prepare(transfer(ID_A, 100), true).await.unwrap();
        let id = Uuid::parse_str(ID_A).unwrap();

        log.fulfill(id, "preimage").await.unwrap();
        let (_, transitioned) = log.fulfill(id, "preimage").await.unwrap();
        assert!(!transitioned);
        assert_eq!(log.get_incoming_fulfilled().await, Decimal::new(100, 0));
    }

    #[tokio::test]
    async fn test_fulfill_after_cancel_fails() {
        let log = TransferLog::new();
        log.prepare(transfer(ID_A, 100), true).await.unwrap();
        let id = Uuid::parse_str(ID_A).unwrap();

        log.cancel(id, serde_json::json!("expired")).await.unwrap();
        let result = log.fulfill(id, "preimage").await;
        assert!(matches!(result, Err(PluginError::AlreadyRejected { .. })));
    }

    #[tokio::test]
    async fn test_cancel_after_fulfill_fails() {
        let log = TransferLog::new();
        log.prepare(transfer(ID_A, 100), true).await.unwrap();
        let id = Uuid::parse_str(ID_A).unwrap();

        log.fulfill(id, "preimage").await.unwrap();
        let result = log.cancel(id, serde_json::json!("expired")).await;
        assert!(matches!(result, Err(PluginError::AlreadyFulfilled { .. })));
        assert_eq!(log.get_incoming_fulfilled().await, Decimal::new(100, 0));
    }

    #[tokio::test]
    async fn test_cancel_releases_prepared_amount() {
        let log = TransferLog::new();
        log.prepare(transfer(ID_A, 100), true).await.unwrap();
        let id = Uuid::parse_str(ID_A).unwrap();

        let (record, transitioned) =
            log.cancel(id, serde_json::json!("expired")).await.unwrap();
        assert!(transitioned);
        assert_eq!(record.state, TransferState::Cancelled);
        assert_eq!(
            log.get_incoming_fulfilled_and_prepared().await,
            Decimal::ZERO
        );
        assert!(log.aggregates_match_records().await);

        // Second cancel is a no-op
        let (_, transitioned) = log.cancel(id, serde_json::json!("expired")).await.unwrap();
        assert!(!transitioned);
    }

    #[tokio::test]
    async fn test_unknown_id_is_invalid_fields() {
        let log = TransferLog::new();
        let id = Uuid::parse_str(ID_A).unwrap();
        assert!(matches!(
            log.fulfill(id, "preimage").await,
            Err(PluginError::InvalidFields { .. })
        ));
        assert!(matches!(
            log.cancel(id, serde_json::json!("expired")).await,
            Err(PluginError::InvalidFields { .. })
        ));
    }

    #[tokio::test]
    async fn test_balance_is_signed() {
        let log = TransferLog::new();
        log.set_minimum(Decimal::new(-1000, 0)).await.unwrap();

        log.prepare(transfer(ID_A, 100), true).await.unwrap();
        log.fulfill(Uuid::parse_str(ID_A).unwrap(), "preimage")
            .await
            .unwrap();
        log.prepare(transfer(ID_B, 30), false).await.unwrap();
        log.fulfill(Uuid::parse_str(ID_B).unwrap(), "preimage")
            .await
            .unwrap();

        assert_eq!(log.get_balance().await, Decimal::new(70, 0));
        assert_eq!(log.get_outgoing_fulfilled().await, Decimal::new(30, 0));
    }

    #[tokio::test]
    async fn test_set_minimum_rejects_positive_values() {
        let log = TransferLog::new();
        assert!(log.set_minimum(Decimal::ONE).await.is_err());
        assert!(log.set_minimum(Decimal::ZERO).await.is_ok());
        assert!(log.set_minimum(Decimal::new(-5, 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_aggregates_track_records_across_mixed_operations() {
        let log = TransferLog::new();
        log.set_minimum(Decimal::new(-1000, 0)).await.unwrap();
        log.set_maximum(Some(Decimal::new(1000, 0))).await.unwrap();

        let ids: Vec<Uuid> = (0..6)
            .map(|i| Uuid::parse_str(&format!("00000000-0000-0000-0000-00000000000{}", i)).unwrap())
            .collect();

        for (i, id) in ids.iter().enumerate() {
            let mut t = transfer(ID_A, (i as i64 + 1) * 10);
            t.id = *id;
            log.prepare(t, i % 2 == 0).await.unwrap();
            assert!(log.aggregates_match_records().await);
        }
        log.fulfill(ids[0], "preimage").await.unwrap();
        assert!(log.aggregates_match_records().await);
        log.cancel(ids[1], serde_json::json!("expired")).await.unwrap();
        assert!(log.aggregates_match_records().await);
        log.fulfill(ids[3], "preimage").await.unwrap();
        log.cancel(ids[2], serde_json::json!({"code": "F00"}))
            .await
            .unwrap();
        assert!(log.aggregates_match_records().await);
    }

    #[tokio::test]
    async fn test_bound_log_restores_records_and_aggregates() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        {
            let log = TransferLog::bound(Arc::clone(&store), "bG9n").await.unwrap();
            log.set_maximum(Some(Decimal::new(500, 0))).await.unwrap();
            log.prepare(transfer(ID_A, 100), true).await.unwrap();
            log.fulfill(Uuid::parse_str(ID_A).unwrap(), "preimage")
                .await
                .unwrap();
            log.prepare(transfer(ID_B, 40), true).await.unwrap();
        }

        let log = TransferLog::bound(Arc::clone(&store), "bG9n").await.unwrap();
        assert_eq!(log.get_incoming_fulfilled().await, Decimal::new(100, 0));
        assert_eq!(
            log.get_incoming_fulfilled_and_prepared().await,
            Decimal::new(140, 0)
        );
        assert_eq!(log.get_maximum().await, Some(Decimal::new(500, 0)));
        let record = log.get(Uuid::parse_str(ID_A).unwrap()).await.unwrap();
        assert_eq!(record.state, TransferState::Fulfilled);
        assert_eq!(record.fulfillment.as_deref(), Some("preimage"));
        assert!(log.aggregates_match_records().await);
    }

    #[tokio::test]
    async fn test_unrelated_keys_do_not_collide() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        let log_a = TransferLog::bound(Arc::clone(&store), "a").await.unwrap();
        let log_b = TransferLog::bound(Arc::clone(&store), "b").await.unwrap();
        log_a.prepare(transfer(ID_A, 100), true).await.unwrap();

        let reopened_b = TransferLog::bound(Arc::clone(&store), "b").await.unwrap();
        assert!(reopened_b.get(Uuid::parse_str(ID_A).unwrap()).await.is_none());
        drop(log_b);
    }
}
