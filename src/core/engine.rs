//! Plugin engine
//!
//! Orchestrates the transfer log, the validator, the RPC channel, the
//! expiry scheduler and the settlement backend behind the public ledger
//! API. The engine owns the connection state machine; the log and RPC
//! dispatch are only reachable while `connected`.
//!
//! # Flow summary
//!
//! - Outbound transfers: validate, `prepare` locally, `send_transfer` to
//!   the peer, emit `outgoing_prepare`, schedule expiry.
//! - Inbound transfers: validate, `prepare`, let the backend inspect,
//!   emit `incoming_prepare`, schedule expiry. A backend refusal cancels
//!   the transfer and travels back to the peer.
//! - Fulfillments flow the other way and carry settlement claims
//!   piggybacked on the RPC response.
//! - Expiry drives `prepared -> cancelled` on both sides independently;
//!   every log mutation is idempotent, so duplicate delivery is harmless.

use crate::backend::{BackendCtx, SettlementBackend};
use crate::config::{PluginConfig, Role};
use crate::core::events::EventBus;
use crate::core::expiry::ExpiryScheduler;
use crate::core::transfer_log::TransferLog;
use crate::core::validator::{self, Validator};
use crate::rpc::{methods, HttpRpcClient, RpcDispatch, RpcTransport};
use crate::store::Store;
use crate::types::{ErrorPacket, Message, PluginError, PluginEvent, Transfer, TransferState};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection lifecycle of the plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Handler invoked for inbound `send_request` frames
pub type RequestHandler =
    Arc<dyn Fn(Message) -> BoxFuture<'static, Result<Message, PluginError>> + Send + Sync>;

struct PluginInner {
    prefix: String,
    account: String,
    peer_account: String,
    auth_token: String,
    stateful: bool,
    tolerate_rpc_failure: bool,
    listen: Option<SocketAddr>,
    info: RwLock<serde_json::Value>,
    state: RwLock<ConnectionState>,
    log: Arc<TransferLog>,
    validator: Validator,
    rpc: Arc<dyn RpcTransport>,
    backend: Option<Arc<dyn SettlementBackend>>,
    ctx: BackendCtx,
    events: EventBus,
    expiry: ExpiryScheduler,
    request_handler: RwLock<Option<RequestHandler>>,
    server: Mutex<Option<tokio::task::JoinHandle<()>>>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

/// Bilateral payment-channel ledger plugin
///
/// Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct Plugin {
    inner: Arc<PluginInner>,
}

impl Plugin {
    /// Create a plugin speaking HTTP to the peer endpoints in `config`
    pub async fn new(
        config: PluginConfig,
        store: Arc<dyn Store>,
        backend: Option<Arc<dyn SettlementBackend>>,
    ) -> Result<Self, PluginError> {
        let transport: Arc<dyn RpcTransport> = {
            let token = match &backend {
                Some(backend) => backend.auth_token(),
                None => config
                    .token
                    .clone()
                    .ok_or_else(|| PluginError::invalid_fields("token is required"))?,
            };
            Arc::new(HttpRpcClient::new(&config.prefix, &token, config.uris()?)?)
        };
        Self::with_transport(config, store, backend, transport).await
    }

    /// Create a plugin over a custom transport (in-process pairs, tests)
    pub async fn with_transport(
        config: PluginConfig,
        store: Arc<dyn Store>,
        backend: Option<Arc<dyn SettlementBackend>>,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<Self, PluginError> {
        config.validate()?;
        let prefix = config.prefix.clone();

        let (account, peer_account, auth_token, stateful) = match &backend {
            Some(backend) => (
                backend.account(),
                backend.peer_account(),
                backend.auth_token(),
                true,
            ),
            None => {
                let token = config
                    .token
                    .clone()
                    .ok_or_else(|| PluginError::invalid_fields("token is required"))?;
                let role = config.role.ok_or_else(|| {
                    PluginError::invalid_fields("role is required without a settlement backend")
                })?;
                let (account, peer_account) = match role {
                    Role::Server => (format!("{}server", prefix), format!("{}client", prefix)),
                    Role::Client => (format!("{}client", prefix), format!("{}server", prefix)),
                };
                (account, peer_account, token, role == Role::Server)
            }
        };

        let log_key = URL_SAFE_NO_PAD.encode(format!("transfer_log:{}", prefix));
        let log = Arc::new(TransferLog::bound(Arc::clone(&store), log_key).await?);
        if stateful {
            log.set_maximum(config.max_balance).await?;
            if let Some(minimum) = config.min_balance {
                log.set_minimum(minimum).await?;
            }
        }

        let info = match &backend {
            Some(backend) => backend.info(),
            None => config
                .info
                .clone()
                .unwrap_or_else(|| serde_json::json!({ "prefix": prefix })),
        };

        let ctx = BackendCtx::new(Arc::clone(&transport), Arc::clone(&log), store);
        let validator = Validator::new(&prefix, &account, &peer_account);

        Ok(Plugin {
            inner: Arc::new(PluginInner {
                prefix,
                account,
                peer_account,
                auth_token,
                stateful,
                tolerate_rpc_failure: config.tolerate_rpc_failure,
                listen: config.listen,
                info: RwLock::new(info),
                state: RwLock::new(ConnectionState::Disconnected),
                log,
                validator,
                rpc: transport,
                backend,
                ctx,
                events: EventBus::new(),
                expiry: ExpiryScheduler::new(),
                request_handler: RwLock::new(None),
                server: Mutex::new(None),
                bound_addr: Mutex::new(None),
            }),
        })
    }

    // ---- connection state -------------------------------------------------

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Whether the plugin is connected
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    fn assert_connected(&self) -> Result<(), PluginError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(PluginError::NotConnected)
        }
    }

    /// Bring the plugin up: bind the listener (if configured), connect the
    /// backend, restore expiry timers for persisted prepared transfers,
    /// and emit `connect`
    pub async fn connect(&self) -> Result<(), PluginError> {
        {
            let mut state = self.inner.state.write();
            match *state {
                ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
                ConnectionState::Disconnecting => {
                    return Err(PluginError::not_accepted("plugin is disconnecting"))
                }
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }

        if let Some(listen) = self.inner.listen {
            let dispatcher: Arc<dyn RpcDispatch> = Arc::new(self.clone());
            match crate::rpc::serve(listen, dispatcher).await {
                Ok((addr, task)) => {
                    *self.inner.bound_addr.lock() = Some(addr);
                    *self.inner.server.lock() = Some(task);
                }
                Err(e) => {
                    *self.inner.state.write() = ConnectionState::Disconnected;
                    return Err(e);
                }
            }
        }

        if let Some(backend) = &self.inner.backend {
            if let Err(e) = backend.connect(&self.inner.ctx).await {
                self.shutdown_listener();
                *self.inner.state.write() = ConnectionState::Disconnected;
                return Err(e);
            }
        }

        *self.inner.state.write() = ConnectionState::Connected;

        // A bound log may come back with prepared transfers from a
        // previous run; their deadlines still apply.
        for record in self.inner.log.prepared().await {
            self.schedule_expiry(record.transfer.id, record.transfer.expires_at);
        }

        if !self.inner.stateful {
            match self.inner.rpc.call(methods::GET_INFO, vec![]).await {
                Ok(info) => *self.inner.info.write() = info,
                Err(e) => warn!(error = %e, "could not fetch peer info, keeping local info"),
            }
        }

        info!(prefix = %self.inner.prefix, account = %self.inner.account, "plugin connected");
        self.inner.events.emit(PluginEvent::Connect);
        Ok(())
    }

    /// Take the plugin down: refuse new operations, stop expiry timers,
    /// run the backend's final settlement, and emit `disconnect`
    pub async fn disconnect(&self) -> Result<(), PluginError> {
        {
            let mut state = self.inner.state.write();
            match *state {
                ConnectionState::Disconnected | ConnectionState::Disconnecting => return Ok(()),
                _ => *state = ConnectionState::Disconnecting,
            }
        }

        self.inner.expiry.clear();

        // Settlement at disconnect is best-effort.
        if let Some(backend) = &self.inner.backend {
            if let Err(e) = backend.disconnect(&self.inner.ctx).await {
                warn!(error = %e, "settlement backend disconnect failed");
            }
        }

        self.shutdown_listener();
        *self.inner.state.write() = ConnectionState::Disconnected;
        info!(prefix = %self.inner.prefix, "plugin disconnected");
        self.inner.events.emit(PluginEvent::Disconnect);
        Ok(())
    }

    fn shutdown_listener(&self) {
        if let Some(task) = self.inner.server.lock().take() {
            task.abort();
        }
        *self.inner.bound_addr.lock() = None;
    }

    /// Address the embedded listener is bound to, if any
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self.inner.bound_addr.lock()
    }

    // ---- synchronous accessors -------------------------------------------

    /// This side's ILP address
    pub fn get_account(&self) -> String {
        self.inner.account.clone()
    }

    /// The peer's ILP address
    pub fn get_peer_account(&self) -> String {
        self.inner.peer_account.clone()
    }

    /// The channel prefix
    pub fn get_prefix(&self) -> String {
        self.inner.prefix.clone()
    }

    /// Ledger info record (the stateless side caches the peer's at connect)
    pub fn get_info(&self) -> serde_json::Value {
        self.inner.info.read().clone()
    }

    /// Subscribe to lifecycle events
    pub fn on_event(&self, handler: impl Fn(&PluginEvent) + Send + Sync + 'static) {
        self.inner.events.subscribe(handler);
    }

    /// The transfer log backing this plugin
    pub fn transfer_log(&self) -> Arc<TransferLog> {
        Arc::clone(&self.inner.log)
    }

    // ---- request handler registration ------------------------------------

    /// Register the handler answering inbound `send_request` frames
    ///
    /// # Errors
    ///
    /// `RequestHandlerAlreadyRegistered` if one is already installed.
    pub fn register_request_handler(&self, handler: RequestHandler) -> Result<(), PluginError> {
        let mut slot = self.inner.request_handler.write();
        if slot.is_some() {
            return Err(PluginError::RequestHandlerAlreadyRegistered);
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Remove the registered request handler, if any
    pub fn deregister_request_handler(&self) {
        *self.inner.request_handler.write() = None;
    }

    // ---- outbound operations ---------------------------------------------

    /// Prepare and send a conditional transfer to the peer
    pub async fn send_transfer(&self, transfer: Transfer) -> Result<(), PluginError> {
        self.assert_connected()?;

        let mut transfer = transfer;
        transfer.ledger = self.inner.prefix.clone();
        self.inner.validator.validate_outgoing_transfer(&transfer)?;

        let inserted = self.inner.log.prepare(transfer.clone(), false).await?;

        let wire = serde_json::to_value(transfer.for_wire())
            .map_err(|e| PluginError::invalid_fields(format!("unserializable transfer: {}", e)))?;
        let sent = self
            .inner
            .rpc
            .call(methods::SEND_TRANSFER, vec![wire])
            .await;
        if let Err(e) = sent {
            if self.inner.stateful || self.inner.tolerate_rpc_failure {
                // The peer may still have accepted the frame; the expiry
                // timer is authoritative either way.
                warn!(id = %transfer.id, error = %e, "send_transfer rpc failed, proceeding");
            } else {
                // Stateless: surface the failure. The prepared record is
                // left for the expiry timer to clean up.
                self.schedule_expiry(transfer.id, transfer.expires_at);
                return Err(e);
            }
        }

        if inserted {
            self.inner.events.emit(PluginEvent::OutgoingPrepare {
                transfer: transfer.clone(),
            });
            self.schedule_expiry(transfer.id, transfer.expires_at);
        }
        Ok(())
    }

    /// Fulfill an incoming prepared transfer with its preimage
    pub async fn fulfill_condition(&self, id: Uuid, fulfillment: &str) -> Result<(), PluginError> {
        self.assert_connected()?;

        let record = self
            .inner
            .log
            .get(id)
            .await
            .ok_or_else(|| PluginError::invalid_fields(format!("unknown transfer id {}", id)))?;
        if !record.is_incoming {
            return Err(PluginError::not_accepted(
                "only incoming transfers can be fulfilled locally",
            ));
        }
        if record.state == TransferState::Prepared && record.is_expired_at(Utc::now()) {
            return Err(PluginError::not_accepted(format!(
                "transfer {} has expired",
                id
            )));
        }
        validator::verify_fulfillment(fulfillment, &record.transfer.execution_condition)?;

        let (record, transitioned) = self.inner.log.fulfill(id, fulfillment).await?;
        self.inner.expiry.cancel(&id);
        if transitioned {
            self.inner.events.emit(PluginEvent::IncomingFulfill {
                transfer: record.transfer.clone(),
                fulfillment: fulfillment.to_string(),
            });
        }

        let claim = self
            .inner
            .rpc
            .call(
                methods::FULFILL_CONDITION,
                vec![serde_json::json!(id), serde_json::json!(fulfillment)],
            )
            .await?;

        // The peer piggybacks its settlement claim on the response.
        if let Some(backend) = &self.inner.backend {
            if !claim.is_null() && claim != serde_json::json!(true) {
                if let Err(e) = backend.handle_incoming_claim(&self.inner.ctx, claim).await {
                    warn!(id = %id, error = %e, "handle_incoming_claim failed, continuing");
                }
            }
        }
        Ok(())
    }

    /// Reject an incoming prepared transfer
    pub async fn reject_incoming_transfer(
        &self,
        id: Uuid,
        reason: serde_json::Value,
    ) -> Result<(), PluginError> {
        self.assert_connected()?;

        let record = self
            .inner
            .log
            .get(id)
            .await
            .ok_or_else(|| PluginError::invalid_fields(format!("unknown transfer id {}", id)))?;
        if !record.is_incoming {
            return Err(PluginError::not_accepted(
                "only incoming transfers can be rejected locally",
            ));
        }

        let (record, transitioned) = self.inner.log.cancel(id, reason.clone()).await?;
        self.inner.expiry.cancel(&id);
        if transitioned {
            self.inner.events.emit(PluginEvent::IncomingReject {
                transfer: record.transfer.clone(),
                reason: reason.clone(),
            });
        }

        // Mirror on the peer is best-effort; its expiry timer covers a
        // lost frame.
        if let Err(e) = self
            .inner
            .rpc
            .call(
                methods::REJECT_INCOMING_TRANSFER,
                vec![serde_json::json!(id), reason],
            )
            .await
        {
            warn!(id = %id, error = %e, "reject notification failed, peer will expire");
        }
        Ok(())
    }

    /// Send a one-way message to the peer
    pub async fn send_message(&self, message: Message) -> Result<(), PluginError> {
        self.assert_connected()?;
        self.inner.validator.validate_outgoing_message(&message)?;

        let wire = serde_json::to_value(&message)
            .map_err(|e| PluginError::invalid_fields(format!("unserializable message: {}", e)))?;
        self.inner.rpc.call(methods::SEND_MESSAGE, vec![wire]).await?;
        self.inner
            .events
            .emit(PluginEvent::OutgoingMessage { message });
        Ok(())
    }

    /// Send a request to the peer and await its response message
    pub async fn send_request(&self, message: Message) -> Result<Message, PluginError> {
        self.assert_connected()?;
        self.inner.validator.validate_outgoing_message(&message)?;

        self.inner.events.emit(PluginEvent::OutgoingRequest {
            message: message.clone(),
        });

        let wire = serde_json::to_value(&message)
            .map_err(|e| PluginError::invalid_fields(format!("unserializable message: {}", e)))?;
        let raw = self.inner.rpc.call(methods::SEND_REQUEST, vec![wire]).await?;
        let response: Message = serde_json::from_value(raw)
            .map_err(|e| PluginError::invalid_fields(format!("invalid response message: {}", e)))?;
        self.inner.validator.validate_incoming_message(&response)?;

        self.inner.events.emit(PluginEvent::IncomingResponse {
            message: response.clone(),
        });
        Ok(response)
    }

    // ---- queries ----------------------------------------------------------

    /// Signed net balance of this side
    ///
    /// The stateful side answers from its own log; the stateless side asks
    /// the peer and flips the sign of the report.
    pub async fn get_balance(&self) -> Result<Decimal, PluginError> {
        self.assert_connected()?;
        if self.inner.stateful {
            Ok(self.inner.log.get_balance().await)
        } else {
            let raw = self.inner.rpc.call(methods::GET_BALANCE, vec![]).await?;
            Ok(-decimal_from_value(&raw, "balance")?)
        }
    }

    /// The maximum the stateful side will let this channel owe
    pub async fn get_limit(&self) -> Result<Decimal, PluginError> {
        self.assert_connected()?;
        if self.inner.stateful {
            Ok(self.inner.log.get_maximum().await.unwrap_or(Decimal::ZERO))
        } else {
            let raw = self.inner.rpc.call(methods::GET_LIMIT, vec![]).await?;
            Ok(-decimal_from_value(&raw, "limit")?)
        }
    }

    /// The fulfillment of a fulfilled transfer
    pub async fn get_fulfillment(&self, id: Uuid) -> Result<String, PluginError> {
        self.assert_connected()?;
        let record = self
            .inner
            .log
            .get(id)
            .await
            .ok_or_else(|| PluginError::invalid_fields(format!("unknown transfer id {}", id)))?;
        match record.state {
            TransferState::Fulfilled => record.fulfillment.ok_or_else(|| {
                PluginError::store(format!("fulfilled transfer {} lost its fulfillment", id))
            }),
            TransferState::Cancelled => Err(PluginError::already_rejected(id)),
            TransferState::Prepared => Err(PluginError::not_accepted(format!(
                "transfer {} has not been fulfilled",
                id
            ))),
        }
    }

    // ---- expiry ------------------------------------------------------------

    fn schedule_expiry(&self, id: Uuid, expires_at: chrono::DateTime<Utc>) {
        let plugin = self.clone();
        self.inner
            .expiry
            .schedule(id, expires_at, move || async move {
                plugin.handle_expiry(id).await;
            });
    }

    async fn handle_expiry(&self, id: Uuid) {
        let Some(record) = self.inner.log.get(id).await else {
            return;
        };
        if record.state != TransferState::Prepared {
            return;
        }

        match self.inner.log.cancel(id, serde_json::json!("expired")).await {
            Ok((record, true)) => {
                debug!(id = %id, "transfer expired");
                // Best-effort notification; the peer expires on its own
                // clock regardless.
                if let Err(e) = self
                    .inner
                    .rpc
                    .call(methods::EXPIRE_TRANSFER, vec![serde_json::json!(id)])
                    .await
                {
                    debug!(id = %id, error = %e, "expire notification failed");
                }
                self.emit_cancel(
                    &record.transfer,
                    record.is_incoming,
                    serde_json::json!("expired"),
                );
            }
            Ok((_, false)) => {}
            Err(e) => debug!(id = %id, error = %e, "expiry cancel skipped"),
        }
    }

    fn emit_cancel(&self, transfer: &Transfer, is_incoming: bool, reason: serde_json::Value) {
        let event = if is_incoming {
            PluginEvent::IncomingCancel {
                transfer: transfer.clone(),
                reason,
            }
        } else {
            PluginEvent::OutgoingCancel {
                transfer: transfer.clone(),
                reason,
            }
        };
        self.inner.events.emit(event);
    }

    // ---- inbound dispatch --------------------------------------------------

    /// Handle one inbound RPC frame
    ///
    /// Hosts that terminate the transport themselves (no `listen`
    /// configured) deliver frames here.
    pub async fn handle_rpc(
        &self,
        method: &str,
        prefix: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError> {
        if prefix != self.inner.prefix {
            return Err(PluginError::invalid_fields(format!(
                "prefix '{}' does not match '{}'",
                prefix, self.inner.prefix
            )));
        }
        self.assert_connected()?;

        match method {
            methods::SEND_TRANSFER => self.rpc_send_transfer(args).await,
            methods::FULFILL_CONDITION => self.rpc_fulfill_condition(args).await,
            methods::REJECT_INCOMING_TRANSFER => self.rpc_reject_incoming_transfer(args).await,
            methods::EXPIRE_TRANSFER => self.rpc_expire_transfer(args).await,
            methods::SEND_MESSAGE => self.rpc_send_message(args).await,
            methods::SEND_REQUEST => self.rpc_send_request(args).await,
            methods::GET_LIMIT => {
                let maximum = self.inner.log.get_maximum().await.unwrap_or(Decimal::ZERO);
                Ok(serde_json::json!(maximum.to_string()))
            }
            methods::GET_BALANCE => {
                let balance = self.inner.log.get_balance().await;
                Ok(serde_json::json!(balance.to_string()))
            }
            methods::GET_INFO => Ok(self.get_info()),
            methods::GET_FULFILLMENT => {
                let id: Uuid = arg(&args, 0, "transfer id")?;
                let fulfillment = self.get_fulfillment(id).await?;
                Ok(serde_json::json!(fulfillment))
            }
            other => Err(PluginError::invalid_fields(format!(
                "unknown method '{}'",
                other
            ))),
        }
    }

    async fn rpc_send_transfer(
        &self,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError> {
        let transfer: Transfer = arg(&args, 0, "transfer")?;
        self.inner.validator.validate_incoming_transfer(&transfer)?;

        let inserted = self.inner.log.prepare(transfer.clone(), true).await?;
        if inserted {
            if let Some(backend) = &self.inner.backend {
                if let Err(e) = backend
                    .handle_incoming_prepare(&self.inner.ctx, &transfer)
                    .await
                {
                    let reason =
                        serde_json::to_value(ErrorPacket::bad_request(&self.inner.account, &e))
                            .unwrap_or_else(|_| serde_json::json!(e.to_string()));
                    if let Err(cancel_error) = self.inner.log.cancel(transfer.id, reason).await {
                        warn!(id = %transfer.id, error = %cancel_error, "could not cancel refused transfer");
                    }
                    return Err(e);
                }
            }
            self.inner.events.emit(PluginEvent::IncomingPrepare {
                transfer: transfer.clone(),
            });
            self.schedule_expiry(transfer.id, transfer.expires_at);
        }
        Ok(serde_json::json!(true))
    }

    async fn rpc_fulfill_condition(
        &self,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError> {
        let id: Uuid = arg(&args, 0, "transfer id")?;
        let fulfillment: String = arg(&args, 1, "fulfillment")?;

        let record = self
            .inner
            .log
            .get(id)
            .await
            .ok_or_else(|| PluginError::invalid_fields(format!("unknown transfer id {}", id)))?;
        if record.is_incoming {
            return Err(PluginError::not_accepted(
                "only the receiving side may fulfill a transfer",
            ));
        }
        if record.state == TransferState::Prepared && record.is_expired_at(Utc::now()) {
            return Err(PluginError::not_accepted(format!(
                "transfer {} has expired",
                id
            )));
        }
        validator::verify_fulfillment(&fulfillment, &record.transfer.execution_condition)?;

        let (record, transitioned) = self.inner.log.fulfill(id, &fulfillment).await?;
        self.inner.expiry.cancel(&id);
        if transitioned {
            self.inner.events.emit(PluginEvent::OutgoingFulfill {
                transfer: record.transfer.clone(),
                fulfillment: fulfillment.clone(),
            });
        }

        // Answer with a settlement claim covering everything fulfilled so
        // far; claim production failures must not fail the fulfillment.
        if let Some(backend) = &self.inner.backend {
            let outgoing_fulfilled = self.inner.log.get_outgoing_fulfilled().await;
            match backend
                .create_outgoing_claim(&self.inner.ctx, outgoing_fulfilled)
                .await
            {
                Ok(Some(claim)) => return Ok(claim),
                Ok(None) => {}
                Err(e) => warn!(id = %id, error = %e, "create_outgoing_claim failed, continuing"),
            }
        }
        Ok(serde_json::json!(true))
    }

    async fn rpc_reject_incoming_transfer(
        &self,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError> {
        let id: Uuid = arg(&args, 0, "transfer id")?;
        let reason = args.get(1).cloned().unwrap_or(serde_json::Value::Null);

        let record = self
            .inner
            .log
            .get(id)
            .await
            .ok_or_else(|| PluginError::invalid_fields(format!("unknown transfer id {}", id)))?;
        if record.is_incoming {
            return Err(PluginError::not_accepted(
                "only the sending side mirrors a rejection",
            ));
        }

        let (record, transitioned) = self.inner.log.cancel(id, reason.clone()).await?;
        self.inner.expiry.cancel(&id);
        if transitioned {
            self.inner.events.emit(PluginEvent::OutgoingReject {
                transfer: record.transfer.clone(),
                reason,
            });
        }
        Ok(serde_json::json!(true))
    }

    async fn rpc_expire_transfer(
        &self,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError> {
        let id: Uuid = arg(&args, 0, "transfer id")?;

        let record = self
            .inner
            .log
            .get(id)
            .await
            .ok_or_else(|| PluginError::invalid_fields(format!("unknown transfer id {}", id)))?;
        if !record.is_expired_at(Utc::now()) {
            return Err(PluginError::not_accepted(format!(
                "transfer {} has not yet expired",
                id
            )));
        }

        let (record, transitioned) = self
            .inner
            .log
            .cancel(id, serde_json::json!("expired"))
            .await?;
        self.inner.expiry.cancel(&id);
        if transitioned {
            self.emit_cancel(
                &record.transfer,
                record.is_incoming,
                serde_json::json!("expired"),
            );
        }
        Ok(serde_json::json!(true))
    }

    async fn rpc_send_message(
        &self,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError> {
        let message: Message = arg(&args, 0, "message")?;
        self.inner.validator.validate_incoming_message(&message)?;
        self.inner
            .events
            .emit(PluginEvent::IncomingMessage { message });
        Ok(serde_json::json!(true))
    }

    async fn rpc_send_request(
        &self,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError> {
        let message: Message = arg(&args, 0, "message")?;
        self.inner.validator.validate_incoming_message(&message)?;
        self.inner.events.emit(PluginEvent::IncomingRequest {
            message: message.clone(),
        });

        let handler = self
            .inner
            .request_handler
            .read()
            .clone()
            .ok_or_else(|| PluginError::not_accepted("no request handler registered"))?;
        let response = handler(message).await?;
        self.inner.validator.validate_outgoing_message(&response)?;

        self.inner.events.emit(PluginEvent::OutgoingResponse {
            message: response.clone(),
        });
        serde_json::to_value(&response)
            .map_err(|e| PluginError::invalid_fields(format!("unserializable response: {}", e)))
    }
}

#[async_trait]
impl RpcDispatch for Plugin {
    async fn dispatch(
        &self,
        method: &str,
        prefix: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError> {
        self.handle_rpc(method, prefix, args).await
    }

    fn auth_token(&self) -> String {
        self.inner.auth_token.clone()
    }
}

fn arg<T: DeserializeOwned>(
    args: &[serde_json::Value],
    index: usize,
    what: &str,
) -> Result<T, PluginError> {
    let value = args.get(index).ok_or_else(|| {
        PluginError::invalid_fields(format!("missing argument {}: {}", index, what))
    })?;
    serde_json::from_value(value.clone())
        .map_err(|e| PluginError::invalid_fields(format!("invalid {}: {}", what, e)))
}

fn decimal_from_value(value: &serde_json::Value, what: &str) -> Result<Decimal, PluginError> {
    let text = value
        .as_str()
        .ok_or_else(|| PluginError::invalid_fields(format!("{} must be a decimal string", what)))?;
    Decimal::from_str(text)
        .map_err(|e| PluginError::invalid_fields(format!("malformed {} '{}': {}", what, text, e)))
}
