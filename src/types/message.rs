//! Peer messaging types
//!
//! Messages carry free-form JSON between the two endpoints of the channel,
//! either fire-and-forget (`send_message`) or as a request expecting a
//! response (`send_request`). The error packet is the reject reason format
//! delivered to the peer when a transfer or request is refused.

use serde::{Deserialize, Serialize};

/// A message exchanged between the two peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Ledger prefix the message belongs to
    pub ledger: String,

    /// Sender address
    pub from: String,

    /// Receiver address
    pub to: String,

    /// Opaque ILP payload, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ilp: Option<String>,

    /// Free-form JSON body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Reject reason delivered to the peer as an ILP-style error packet
///
/// Rejected requests surface at the peer with code `F00 Bad Request` and
/// the stringified cause in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPacket {
    /// ILP error code
    pub code: String,

    /// Human-readable error name
    pub name: String,

    /// Address of the endpoint that produced the error
    pub triggered_by: String,

    /// Stringified cause
    pub data: String,
}

impl ErrorPacket {
    /// Build the standard `F00 Bad Request` packet
    pub fn bad_request(triggered_by: &str, cause: impl ToString) -> Self {
        ErrorPacket {
            code: "F00".to_string(),
            name: "Bad Request".to_string(),
            triggered_by: triggered_by.to_string(),
            data: cause.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_packet() {
        let packet = ErrorPacket::bad_request("peer.t.server", "balance exceeds maximum");
        assert_eq!(packet.code, "F00");
        assert_eq!(packet.name, "Bad Request");
        assert_eq!(packet.data, "balance exceeds maximum");

        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["triggeredBy"], "peer.t.server");
    }

    #[test]
    fn test_message_roundtrip() {
        let message = Message {
            ledger: "peer.t.".to_string(),
            from: "peer.t.client".to_string(),
            to: "peer.t.server".to_string(),
            ilp: None,
            data: Some(serde_json::json!({"hello": "world"})),
        };
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
        assert!(!json.contains("ilp"));
    }
}
