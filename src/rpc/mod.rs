//! RPC layer
//!
//! The authenticated bidirectional request/response channel between the
//! two peers:
//! - `protocol`: the wire frames and method names
//! - `client`: outbound calls with bearer auth and ordered failover
//! - `server`: the inbound HTTP endpoint and dispatch seam

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{HttpRpcClient, RpcTransport};
pub use protocol::{methods, RpcErrorBody, RpcRequest, RpcResponse};
pub use server::{make_router, serve, RpcDispatch};
