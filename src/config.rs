//! Plugin configuration
//!
//! Options recognized by the engine, deserializable from the camelCase
//! key names used in deployment manifests. Keys the engine does not know
//! are collected unmodified and forwarded to the settlement backend.

use crate::types::PluginError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Which fixed account this side takes in asymmetric (backend-less) mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Stateful side: owns the log bounds and answers balance queries
    Server,
    /// Stateless side: proxies balance and info queries to the peer
    Client,
}

/// Engine configuration
///
/// `rpc_uri` and `rpc_uris` are mutually exclusive and exactly one must
/// be present; the list form enables ordered failover.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    /// ILP address prefix shared by both endpoints of the channel
    pub prefix: String,

    /// Shared bearer secret (required in asymmetric mode; with a
    /// settlement backend the backend supplies the token instead)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Single peer endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_uri: Option<String>,

    /// Ordered peer endpoints; the first that answers wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_uris: Option<Vec<String>>,

    /// Treat individual RPC failures as non-fatal
    #[serde(default)]
    pub tolerate_rpc_failure: bool,

    /// Upper bound on incoming fulfilled-and-prepared (stateful side)
    #[serde(
        default,
        with = "rust_decimal::serde::str_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_balance: Option<Decimal>,

    /// Lower bound on the signed net position, `<= 0` (stateful side)
    #[serde(
        default,
        with = "rust_decimal::serde::str_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_balance: Option<Decimal>,

    /// Opaque ledger-info record returned by `get_info`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,

    /// Bind address for the embedded RPC listener; when unset the host
    /// delivers inbound frames through `Plugin::handle_rpc`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<SocketAddr>,

    /// Fixed account taken in asymmetric mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Unrecognized keys, forwarded to the settlement backend
    #[serde(flatten)]
    pub backend_options: serde_json::Map<String, serde_json::Value>,
}

impl PluginConfig {
    /// Minimal asymmetric configuration
    pub fn asymmetric(prefix: &str, token: &str, role: Role, rpc_uri: &str) -> Self {
        PluginConfig {
            prefix: prefix.to_string(),
            token: Some(token.to_string()),
            rpc_uri: Some(rpc_uri.to_string()),
            rpc_uris: None,
            tolerate_rpc_failure: false,
            max_balance: None,
            min_balance: None,
            info: None,
            listen: None,
            role: Some(role),
            backend_options: serde_json::Map::new(),
        }
    }

    /// The ordered endpoint list
    ///
    /// # Errors
    ///
    /// `InvalidFields` unless exactly one of `rpc_uri` / `rpc_uris` is set
    /// and the resulting list is non-empty.
    pub fn uris(&self) -> Result<Vec<String>, PluginError> {
        match (&self.rpc_uri, &self.rpc_uris) {
            (Some(uri), None) => Ok(vec![uri.clone()]),
            (None, Some(uris)) if !uris.is_empty() => Ok(uris.clone()),
            (None, Some(_)) => Err(PluginError::invalid_fields("rpcUris must not be empty")),
            (Some(_), Some(_)) => Err(PluginError::invalid_fields(
                "rpcUri and rpcUris are mutually exclusive",
            )),
            (None, None) => Err(PluginError::invalid_fields(
                "one of rpcUri or rpcUris is required",
            )),
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), PluginError> {
        self.uris()?;
        if self.prefix.is_empty() {
            return Err(PluginError::invalid_fields("prefix must not be empty"));
        }
        if let Some(minimum) = self.min_balance {
            if minimum > Decimal::ZERO {
                return Err(PluginError::invalid_fields(
                    "minBalance must not be positive",
                ));
            }
        }
        Ok(())
    }
}
