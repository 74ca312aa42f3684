//! Bilateral payment-channel ledger plugin
//! # Overview
//!
//! This library implements one endpoint of a bilateral, off-ledger payment
//! channel: two peers clear a stream of conditional (hash-timelocked)
//! transfers against each other and periodically secure the net balance
//! through a pluggable settlement backend.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Transfer, Message, events, errors)
//! - [`config`] - Engine configuration options
//! - [`store`] - Atomic named-record key-value store (memory and sled)
//! - [`core`] - Business logic components:
//!   - [`core::transfer_log`] - The authoritative transfer ledger with
//!     aggregate balances and bounds
//!   - [`core::tracker`] - Monotone best-claim register
//!   - [`core::engine`] - The plugin engine and connection state machine
//! - [`backend`] - The settlement backend capability set
//! - [`rpc`] - The authenticated request/response channel between peers
//!
//! # Transfer lifecycle
//!
//! A transfer is **prepared** on both sides, then either **fulfilled** by
//! revealing the preimage of its execution condition before the deadline,
//! or **cancelled** by rejection or expiry. Fulfilled and cancelled are
//! terminal; every transition is idempotent under redelivery.
//!
//! # Balance semantics
//!
//! An incoming fulfilled transfer raises this side's balance, an outgoing
//! one lowers it. Prepared incoming transfers count against the configured
//! maximum; prepared outgoing transfers count against the configured
//! minimum. All amounts are exact decimals, never floats.

// Module declarations
pub mod backend;
pub mod config;
pub mod core;
pub mod rpc;
pub mod store;
pub mod types;

pub use crate::core::{ConnectionState, MaxValueTracker, Plugin, TrackerEntry, TransferLog};
pub use backend::{BackendCtx, SettlementBackend};
pub use config::{PluginConfig, Role};
pub use store::{MemoryStore, SledStore, Store};
pub use types::{
    ErrorPacket, Message, PluginError, PluginEvent, Transfer, TransferRecord, TransferState,
};
