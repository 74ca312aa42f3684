//! Lifecycle events emitted by the plugin engine
//!
//! Events are delivered to subscribers strictly after the corresponding
//! state transition has committed to the transfer log. Subscribers observe
//! the ledger, they never drive it.

use crate::types::message::Message;
use crate::types::transfer::Transfer;

/// Events emitted by the plugin engine
#[derive(Debug, Clone)]
pub enum PluginEvent {
    /// The plugin reached the connected state
    Connect,

    /// The plugin disconnected
    Disconnect,

    /// A locally sent transfer was recorded as prepared
    OutgoingPrepare { transfer: Transfer },

    /// A peer-sent transfer was recorded as prepared
    IncomingPrepare { transfer: Transfer },

    /// The peer fulfilled a transfer we prepared
    OutgoingFulfill {
        transfer: Transfer,
        fulfillment: String,
    },

    /// We fulfilled a transfer the peer prepared
    IncomingFulfill {
        transfer: Transfer,
        fulfillment: String,
    },

    /// The peer rejected a transfer we prepared
    OutgoingReject {
        transfer: Transfer,
        reason: serde_json::Value,
    },

    /// We rejected a transfer the peer prepared
    IncomingReject {
        transfer: Transfer,
        reason: serde_json::Value,
    },

    /// A transfer we prepared expired unfulfilled
    OutgoingCancel {
        transfer: Transfer,
        reason: serde_json::Value,
    },

    /// A transfer the peer prepared expired unfulfilled
    IncomingCancel {
        transfer: Transfer,
        reason: serde_json::Value,
    },

    /// A message was sent to the peer
    OutgoingMessage { message: Message },

    /// A message arrived from the peer
    IncomingMessage { message: Message },

    /// A request was sent to the peer
    OutgoingRequest { message: Message },

    /// A request arrived from the peer
    IncomingRequest { message: Message },

    /// A response was returned to the peer
    OutgoingResponse { message: Message },

    /// A response arrived from the peer
    IncomingResponse { message: Message },
}

impl PluginEvent {
    /// Snake-case event name, used for logging and test assertions
    pub fn name(&self) -> &'static str {
        match self {
            PluginEvent::Connect => "connect",
            PluginEvent::Disconnect => "disconnect",
            PluginEvent::OutgoingPrepare { .. } => "outgoing_prepare",
            PluginEvent::IncomingPrepare { .. } => "incoming_prepare",
            PluginEvent::OutgoingFulfill { .. } => "outgoing_fulfill",
            PluginEvent::IncomingFulfill { .. } => "incoming_fulfill",
            PluginEvent::OutgoingReject { .. } => "outgoing_reject",
            PluginEvent::IncomingReject { .. } => "incoming_reject",
            PluginEvent::OutgoingCancel { .. } => "outgoing_cancel",
            PluginEvent::IncomingCancel { .. } => "incoming_cancel",
            PluginEvent::OutgoingMessage { .. } => "outgoing_message",
            PluginEvent::IncomingMessage { .. } => "incoming_message",
            PluginEvent::OutgoingRequest { .. } => "outgoing_request",
            PluginEvent::IncomingRequest { .. } => "incoming_request",
            PluginEvent::OutgoingResponse { .. } => "outgoing_response",
            PluginEvent::IncomingResponse { .. } => "incoming_response",
        }
    }
}
