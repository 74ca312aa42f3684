//! Error types for the channel plugin
//!
//! This module defines all error kinds raised by the plugin, the transfer
//! log, the validator and the RPC layer, together with the mapping to and
//! from the wire representation (`{ error: { name, message } }`).
//!
//! # Error Categories
//!
//! - **Validation**: structurally invalid transfers, messages or fields
//! - **Policy**: balance bounds, authentication, backend refusal
//! - **State machine**: operations against a transfer in a terminal state
//! - **Infrastructure**: store and RPC transport failures

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the channel plugin
///
/// Each variant corresponds to one kind in the protocol's error taxonomy
/// and carries enough context to diagnose the failure. Variants that cross
/// the wire are identified by a stable error name.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PluginError {
    /// Structural or validation failure on a transfer, message or field
    #[error("invalid fields: {message}")]
    InvalidFields {
        /// What was malformed
        message: String,
    },

    /// Policy rejection: bounds exceeded, authentication failed, or the
    /// settlement backend refused the transfer
    #[error("not accepted: {message}")]
    NotAccepted {
        /// Why the operation was refused
        message: String,
    },

    /// Operation required a non-cancelled transfer
    #[error("transfer {id} has already been rejected")]
    AlreadyRejected {
        /// The cancelled transfer
        id: Uuid,
    },

    /// Operation required a non-fulfilled transfer
    #[error("transfer {id} has already been fulfilled")]
    AlreadyFulfilled {
        /// The fulfilled transfer
        id: Uuid,
    },

    /// `prepare` re-used an id with different contents
    #[error("duplicate transfer id {id} with different contents")]
    Duplicate {
        /// The conflicting transfer id
        id: Uuid,
    },

    /// Public operation invoked while the plugin is not connected
    #[error("plugin is not connected")]
    NotConnected,

    /// A request handler is already registered
    #[error("a request handler is already registered")]
    RequestHandlerAlreadyRegistered,

    /// Key-value store failure
    #[error("store error: {message}")]
    Store {
        /// Description of the store failure
        message: String,
    },

    /// RPC transport failure (all configured endpoints failed)
    #[error("rpc error: {message}")]
    Rpc {
        /// Description of the transport failure
        message: String,
    },
}

impl PluginError {
    /// Create an InvalidFields error
    pub fn invalid_fields(message: impl ToString) -> Self {
        PluginError::InvalidFields {
            message: message.to_string(),
        }
    }

    /// Create a NotAccepted error
    pub fn not_accepted(message: impl ToString) -> Self {
        PluginError::NotAccepted {
            message: message.to_string(),
        }
    }

    /// Create an AlreadyRejected error
    pub fn already_rejected(id: Uuid) -> Self {
        PluginError::AlreadyRejected { id }
    }

    /// Create an AlreadyFulfilled error
    pub fn already_fulfilled(id: Uuid) -> Self {
        PluginError::AlreadyFulfilled { id }
    }

    /// Create a Duplicate error
    pub fn duplicate(id: Uuid) -> Self {
        PluginError::Duplicate { id }
    }

    /// Create a Store error
    pub fn store(message: impl ToString) -> Self {
        PluginError::Store {
            message: message.to_string(),
        }
    }

    /// Create an Rpc error
    pub fn rpc(message: impl ToString) -> Self {
        PluginError::Rpc {
            message: message.to_string(),
        }
    }

    /// Stable error name used on the wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            PluginError::InvalidFields { .. } => "InvalidFieldsError",
            PluginError::NotAccepted { .. } => "NotAcceptedError",
            PluginError::AlreadyRejected { .. } => "AlreadyRolledBackError",
            PluginError::AlreadyFulfilled { .. } => "AlreadyFulfilledError",
            PluginError::Duplicate { .. } => "DuplicateIdError",
            PluginError::NotConnected => "NotConnectedError",
            PluginError::RequestHandlerAlreadyRegistered => "RequestHandlerAlreadyRegisteredError",
            PluginError::Store { .. } => "StoreError",
            PluginError::Rpc { .. } => "RpcError",
        }
    }

    /// Rebuild an error from its wire representation
    ///
    /// Unrecognized names collapse into `NotAccepted`, preserving the
    /// original name in the message.
    pub fn from_wire(name: &str, message: &str) -> Self {
        // Id-carrying variants lose the id across the wire; the message
        // keeps the human-readable context.
        match name {
            "InvalidFieldsError" => PluginError::invalid_fields(message),
            "NotAcceptedError" => PluginError::not_accepted(message),
            "AlreadyRolledBackError" => PluginError::not_accepted(format!(
                "peer reported transfer already rolled back: {}",
                message
            )),
            "AlreadyFulfilledError" => PluginError::not_accepted(format!(
                "peer reported transfer already fulfilled: {}",
                message
            )),
            "DuplicateIdError" => PluginError::not_accepted(format!(
                "peer reported duplicate transfer id: {}",
                message
            )),
            "NotConnectedError" => PluginError::NotConnected,
            "RequestHandlerAlreadyRegisteredError" => PluginError::RequestHandlerAlreadyRegistered,
            "StoreError" => PluginError::store(message),
            "RpcError" => PluginError::rpc(message),
            other => PluginError::not_accepted(format!("{}: {}", other, message)),
        }
    }
}

// Conversion from sled errors raised by the persistent store
impl From<sled::Error> for PluginError {
    fn from(error: sled::Error) -> Self {
        PluginError::store(error.to_string())
    }
}

// Conversion from reqwest transport errors raised by the RPC client
impl From<reqwest::Error> for PluginError {
    fn from(error: reqwest::Error) -> Self {
        PluginError::rpc(error.to_string())
    }
}
