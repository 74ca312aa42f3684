//! Transfer-related types for the channel plugin
//!
//! This module defines the conditional transfer as it travels on the wire,
//! the ledger record wrapped around it, and the transfer state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conditional (hash-timelocked) transfer
///
/// A transfer is a promise to pay `amount`, released by a 32-byte preimage
/// whose SHA-256 digest matches `execution_condition`, valid until
/// `expires_at`. The struct is immutable once prepared: re-preparing the
/// same id with different contents is a duplicate error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    /// Unique transfer identifier (canonical UUID)
    pub id: Uuid,

    /// Transfer amount as an exact decimal (serialized as a decimal string)
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,

    /// Ledger prefix both endpoints share
    pub ledger: String,

    /// Sender address (`<prefix><account>`)
    pub from: String,

    /// Receiver address (`<prefix><account>`)
    pub to: String,

    /// base64url digest (32 bytes) the fulfillment must hash to
    pub execution_condition: String,

    /// Instant after which the transfer can no longer be fulfilled
    pub expires_at: DateTime<Utc>,

    /// Opaque interledger payload, forwarded untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ilp: Option<String>,

    /// Sender-private annotation; stored locally, stripped before the
    /// transfer is sent to the peer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_to_self: Option<serde_json::Value>,
}

impl Transfer {
    /// Copy of the transfer as it goes on the wire (`note_to_self` removed)
    pub fn for_wire(&self) -> Transfer {
        Transfer {
            note_to_self: None,
            ..self.clone()
        }
    }
}

/// Lifecycle state of a transfer in the log
///
/// Transitions are `Prepared -> Fulfilled` and `Prepared -> Cancelled`;
/// both `Fulfilled` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    /// Recorded, condition not yet met, not expired
    Prepared,
    /// Released by a valid fulfillment (terminal)
    Fulfilled,
    /// Rejected or expired (terminal)
    Cancelled,
}

impl TransferState {
    /// Whether this state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Fulfilled | TransferState::Cancelled)
    }
}

/// A transfer plus the ledger's bookkeeping around it
///
/// The record is created by `prepare` and mutated exactly once, by
/// `fulfill` or `cancel`. Records are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// The immutable transfer as prepared
    pub transfer: Transfer,

    /// Direction relative to this plugin: true if the peer prepared it
    pub is_incoming: bool,

    /// Current lifecycle state
    pub state: TransferState,

    /// The preimage, present iff `state == Fulfilled`
    pub fulfillment: Option<String>,

    /// Why the transfer was cancelled (reject reason or `"expired"`)
    pub cancellation_reason: Option<serde_json::Value>,
}

impl TransferRecord {
    /// Create a freshly prepared record
    pub fn prepared(transfer: Transfer, is_incoming: bool) -> Self {
        TransferRecord {
            transfer,
            is_incoming,
            state: TransferState::Prepared,
            fulfillment: None,
            cancellation_reason: None,
        }
    }

    /// Whether the transfer's deadline has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.transfer.expires_at
    }
}
