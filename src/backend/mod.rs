//! Settlement backend interface
//!
//! The engine clears transfers; a settlement backend secures the cleared
//! balance on some external settlement network by producing and verifying
//! claims. The engine drives the backend through the capability set below
//! and never interprets claims itself.
//!
//! Backends are constructed by the host (with the backend-specific keys
//! from [`PluginConfig::backend_options`](crate::config::PluginConfig))
//! and own their private state; the [`BackendCtx`] passed to every hook
//! provides the engine's transfer log, the peer RPC handle for
//! backend-to-backend chatter, and factories for trackers and logs that
//! share the engine's store and therefore its atomicity guarantees.
//!
//! Every hook except `connect` and `disconnect` is expected to complete
//! quickly (well under a second); longer work is the backend's own
//! background responsibility.

use crate::core::tracker::MaxValueTracker;
use crate::core::transfer_log::TransferLog;
use crate::rpc::RpcTransport;
use crate::store::Store;
use crate::types::{PluginError, Transfer};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Context handed to every backend hook
#[derive(Clone)]
pub struct BackendCtx {
    /// RPC handle for peer-to-peer backend chatter
    pub rpc: Arc<dyn RpcTransport>,

    /// The engine's own transfer log (read access for settlement math)
    pub transfer_log: Arc<TransferLog>,

    store: Arc<dyn Store>,
}

impl BackendCtx {
    /// Create a context over the engine's shared resources
    pub fn new(
        rpc: Arc<dyn RpcTransport>,
        transfer_log: Arc<TransferLog>,
        store: Arc<dyn Store>,
    ) -> Self {
        BackendCtx {
            rpc,
            transfer_log,
            store,
        }
    }

    /// Open a backend-private tracker persisted in the engine's store
    pub async fn open_tracker(&self, name: &str) -> Result<MaxValueTracker, PluginError> {
        let key = URL_SAFE_NO_PAD.encode(format!("tracker:{}", name));
        MaxValueTracker::bound(Arc::clone(&self.store), key).await
    }

    /// Open a backend-private transfer log persisted in the engine's store
    pub async fn open_log(&self, name: &str) -> Result<TransferLog, PluginError> {
        let key = URL_SAFE_NO_PAD.encode(format!("log:{}", name));
        TransferLog::bound(Arc::clone(&self.store), key).await
    }
}

/// Capability set a settlement backend provides to the engine
#[async_trait]
pub trait SettlementBackend: Send + Sync {
    /// Establish network resources; called while the plugin is connecting
    async fn connect(&self, _ctx: &BackendCtx) -> Result<(), PluginError> {
        Ok(())
    }

    /// Inspect an incoming transfer just recorded as prepared
    ///
    /// A returned error makes the engine cancel the transfer and raise
    /// the error to the peer.
    async fn handle_incoming_prepare(
        &self,
        _ctx: &BackendCtx,
        _transfer: &Transfer,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Produce a claim covering the outgoing fulfilled sum
    ///
    /// Called after each outgoing fulfillment; `None` skips settlement for
    /// this round. Errors are logged and swallowed by the engine.
    async fn create_outgoing_claim(
        &self,
        _ctx: &BackendCtx,
        _outgoing_fulfilled: Decimal,
    ) -> Result<Option<serde_json::Value>, PluginError> {
        Ok(None)
    }

    /// Verify and store a claim received from the peer
    ///
    /// Called with the peer's `create_outgoing_claim` result right after
    /// an incoming fulfillment round-trip. Errors are logged and swallowed
    /// by the engine.
    async fn handle_incoming_claim(
        &self,
        _ctx: &BackendCtx,
        _claim: serde_json::Value,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Final settlement; called while the plugin is disconnecting
    async fn disconnect(&self, _ctx: &BackendCtx) -> Result<(), PluginError> {
        Ok(())
    }

    /// Bearer token inbound peer requests must present
    fn auth_token(&self) -> String;

    /// This side's ILP address
    fn account(&self) -> String;

    /// The peer's ILP address
    fn peer_account(&self) -> String;

    /// Opaque ledger-info record for `get_info`
    fn info(&self) -> serde_json::Value;
}
