//! Outbound RPC client
//!
//! HTTP client side of the request/response channel. Calls are posted as
//! JSON frames with a shared bearer token. The endpoint list is ordered:
//! a transport failure moves on to the next URI, an application error
//! returned by the peer does not (the peer answered; retrying another
//! endpoint of the same peer cannot change the answer). The call fails
//! only after every endpoint has been attempted.

use crate::rpc::protocol::{RpcRequest, RpcResponse};
use crate::types::PluginError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Transport seam the engine sends peer calls through
///
/// The production implementation is [`HttpRpcClient`]; tests substitute an
/// in-process loopback.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Invoke `method` on the peer with positional `args`
    async fn call(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError>;
}

/// HTTP implementation of [`RpcTransport`] with ordered failover
pub struct HttpRpcClient {
    http: reqwest::Client,
    uris: Vec<String>,
    token: String,
    prefix: String,
}

impl HttpRpcClient {
    /// Create a client for the given peer endpoints
    ///
    /// # Errors
    ///
    /// Returns `InvalidFields` if `uris` is empty, `Rpc` if the underlying
    /// HTTP client cannot be built.
    pub fn new(prefix: &str, token: &str, uris: Vec<String>) -> Result<Self, PluginError> {
        if uris.is_empty() {
            return Err(PluginError::invalid_fields(
                "at least one rpc endpoint is required",
            ));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(HttpRpcClient {
            http,
            uris,
            token: token.to_string(),
            prefix: prefix.to_string(),
        })
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn call(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError> {
        let request = RpcRequest {
            method: method.to_string(),
            prefix: self.prefix.clone(),
            args,
        };

        let mut last_error = PluginError::rpc("no rpc endpoints configured");
        for uri in &self.uris {
            let sent = self
                .http
                .post(uri)
                .bearer_auth(&self.token)
                .json(&request)
                .send()
                .await;
            match sent {
                Ok(response) => match response.json::<RpcResponse>().await {
                    // An answered call is final, error or not.
                    Ok(frame) => return frame.into_result(),
                    Err(e) => {
                        debug!(method, uri, error = %e, "unparseable rpc response, trying next endpoint");
                        last_error = PluginError::rpc(format!(
                            "unparseable response from {}: {}",
                            uri, e
                        ));
                    }
                },
                Err(e) => {
                    debug!(method, uri, error = %e, "rpc transport failure, trying next endpoint");
                    last_error = e.into();
                }
            }
        }
        Err(last_error)
    }
}
