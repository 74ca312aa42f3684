//! Inbound RPC dispatch
//!
//! HTTP server side of the request/response channel: a single POST
//! endpoint accepting request frames, authenticated with the shared
//! bearer token. Authentication failures answer 401 with a NotAccepted
//! error body; application errors answer 400 with the mapped error body;
//! unknown methods are application errors too, raised by the dispatcher.

use crate::rpc::protocol::{RpcRequest, RpcResponse};
use crate::types::PluginError;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Dispatch seam the server hands inbound frames to
///
/// Implemented by the plugin engine; tests may implement it directly.
#[async_trait]
pub trait RpcDispatch: Send + Sync {
    /// Handle one inbound request frame
    async fn dispatch(
        &self,
        method: &str,
        prefix: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, PluginError>;

    /// The bearer token inbound requests must present
    fn auth_token(&self) -> String;
}

/// Build the router for a dispatcher
pub fn make_router(handler: Arc<dyn RpcDispatch>) -> Router {
    Router::new().route("/", post(handle_rpc)).with_state(handler)
}

/// Bind `addr` and serve the dispatcher on it
///
/// Returns the bound address (useful with port 0) and the server task.
pub async fn serve(
    addr: SocketAddr,
    handler: Arc<dyn RpcDispatch>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), PluginError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PluginError::rpc(format!("cannot bind rpc listener on {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| PluginError::rpc(format!("cannot read local rpc address: {}", e)))?;
    info!(%local_addr, "rpc listener bound");

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, make_router(handler).into_make_service()).await {
            debug!(error = %e, "rpc listener stopped");
        }
    });
    Ok((local_addr, task))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn handle_rpc(
    State(handler): State<Arc<dyn RpcDispatch>>,
    headers: HeaderMap,
    Json(request): Json<RpcRequest>,
) -> (StatusCode, Json<RpcResponse>) {
    let authorized = bearer_token(&headers)
        .map(|presented| presented == handler.auth_token())
        .unwrap_or(false);
    if !authorized {
        let error = PluginError::not_accepted("invalid authentication token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(RpcResponse::from_error(&error)),
        );
    }

    debug!(method = %request.method, "rpc frame received");
    match handler
        .dispatch(&request.method, &request.prefix, request.args)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(RpcResponse::from_result(result))),
        Err(error) => (
            StatusCode::BAD_REQUEST,
            Json(RpcResponse::from_error(&error)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::client::{HttpRpcClient, RpcTransport};

    struct EchoDispatch;

    #[async_trait]
    impl RpcDispatch for EchoDispatch {
        async fn dispatch(
            &self,
            method: &str,
            prefix: &str,
            args: Vec<serde_json::Value>,
        ) -> Result<serde_json::Value, PluginError> {
            match method {
                "echo" => Ok(serde_json::json!({ "prefix": prefix, "args": args })),
                other => Err(PluginError::invalid_fields(format!(
                    "unknown method '{}'",
                    other
                ))),
            }
        }

        fn auth_token(&self) -> String {
            "secret".to_string()
        }
    }

    #[tokio::test]
    async fn test_authorized_call_roundtrip() {
        let (addr, server) = serve("127.0.0.1:0".parse().unwrap(), Arc::new(EchoDispatch))
            .await
            .unwrap();

        let client =
            HttpRpcClient::new("peer.t.", "secret", vec![format!("http://{}/", addr)]).unwrap();
        let result = client
            .call("echo", vec![serde_json::json!(1)])
            .await
            .unwrap();
        assert_eq!(result["prefix"], "peer.t.");
        assert_eq!(result["args"], serde_json::json!([1]));

        server.abort();
    }

    #[tokio::test]
    async fn test_bad_token_is_not_accepted() {
        let (addr, server) = serve("127.0.0.1:0".parse().unwrap(), Arc::new(EchoDispatch))
            .await
            .unwrap();

        let client =
            HttpRpcClient::new("peer.t.", "wrong", vec![format!("http://{}/", addr)]).unwrap();
        let error = client.call("echo", vec![]).await.unwrap_err();
        assert!(matches!(error, PluginError::NotAccepted { .. }));

        server.abort();
    }

    #[tokio::test]
    async fn test_unknown_method_maps_back_to_invalid_fields() {
        let (addr, server) = serve("127.0.0.1:0".parse().unwrap(), Arc::new(EchoDispatch))
            .await
            .unwrap();

        let client =
            HttpRpcClient::new("peer.t.", "secret", vec![format!("http://{}/", addr)]).unwrap();
        let error = client.call("nope", vec![]).await.unwrap_err();
        assert!(matches!(error, PluginError::InvalidFields { .. }));

        server.abort();
    }

    #[tokio::test]
    async fn test_failover_skips_dead_endpoint() {
        let (addr, server) = serve("127.0.0.1:0".parse().unwrap(), Arc::new(EchoDispatch))
            .await
            .unwrap();

        // First endpoint refuses connections, second answers.
        let client = HttpRpcClient::new(
            "peer.t.",
            "secret",
            vec![
                "http://127.0.0.1:1/".to_string(),
                format!("http://{}/", addr),
            ],
        )
        .unwrap();
        let result = client.call("echo", vec![]).await.unwrap();
        assert_eq!(result["prefix"], "peer.t.");

        server.abort();
    }
}
