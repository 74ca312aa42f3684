//! Structural validation of transfers, messages and fulfillments
//!
//! The validator is stateless: it is configured with the channel's prefix
//! and the two account addresses, and checks shape only. Semantic checks
//! (bounds, state machine, condition hash at fulfillment time) belong to
//! the transfer log and the engine.

use crate::types::{Message, PluginError, Transfer};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Shape checks for everything that crosses the channel
#[derive(Debug, Clone)]
pub struct Validator {
    prefix: String,
    account: String,
    peer_account: String,
}

impl Validator {
    /// Create a validator for one side of the channel
    pub fn new(prefix: &str, account: &str, peer_account: &str) -> Self {
        Validator {
            prefix: prefix.to_string(),
            account: account.to_string(),
            peer_account: peer_account.to_string(),
        }
    }

    /// Validate a transfer we are about to send
    pub fn validate_outgoing_transfer(&self, transfer: &Transfer) -> Result<(), PluginError> {
        self.validate_transfer(transfer, &self.account, &self.peer_account)
    }

    /// Validate a transfer the peer sent us
    pub fn validate_incoming_transfer(&self, transfer: &Transfer) -> Result<(), PluginError> {
        self.validate_transfer(transfer, &self.peer_account, &self.account)
    }

    fn validate_transfer(
        &self,
        transfer: &Transfer,
        from: &str,
        to: &str,
    ) -> Result<(), PluginError> {
        if transfer.amount.is_sign_negative() {
            return Err(PluginError::invalid_fields(format!(
                "transfer {} has negative amount {}",
                transfer.id, transfer.amount
            )));
        }
        if transfer.ledger != self.prefix {
            return Err(PluginError::invalid_fields(format!(
                "transfer {} ledger '{}' does not match prefix '{}'",
                transfer.id, transfer.ledger, self.prefix
            )));
        }
        if transfer.from != from {
            return Err(PluginError::invalid_fields(format!(
                "transfer {} from '{}', expected '{}'",
                transfer.id, transfer.from, from
            )));
        }
        if transfer.to != to {
            return Err(PluginError::invalid_fields(format!(
                "transfer {} to '{}', expected '{}'",
                transfer.id, transfer.to, to
            )));
        }
        decode_digest(&transfer.execution_condition, "executionCondition")?;
        Ok(())
    }

    /// Validate a message we are about to send
    pub fn validate_outgoing_message(&self, message: &Message) -> Result<(), PluginError> {
        self.validate_message(message, &self.account, &self.peer_account)
    }

    /// Validate a message the peer sent us
    pub fn validate_incoming_message(&self, message: &Message) -> Result<(), PluginError> {
        self.validate_message(message, &self.peer_account, &self.account)
    }

    fn validate_message(&self, message: &Message, from: &str, to: &str) -> Result<(), PluginError> {
        if message.ledger != self.prefix {
            return Err(PluginError::invalid_fields(format!(
                "message ledger '{}' does not match prefix '{}'",
                message.ledger, self.prefix
            )));
        }
        if message.from != from {
            return Err(PluginError::invalid_fields(format!(
                "message from '{}', expected '{}'",
                message.from, from
            )));
        }
        if message.to != to {
            return Err(PluginError::invalid_fields(format!(
                "message to '{}', expected '{}'",
                message.to, to
            )));
        }
        Ok(())
    }
}

/// Decode a 43-character base64url encoding of exactly 32 bytes
///
/// Conditions and fulfillments both use this shape.
pub fn decode_digest(encoded: &str, field: &str) -> Result<[u8; 32], PluginError> {
    if encoded.len() != 43 {
        return Err(PluginError::invalid_fields(format!(
            "{} must be 43 base64url characters, got {}",
            field,
            encoded.len()
        )));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| PluginError::invalid_fields(format!("{} is not base64url: {}", field, e)))?;
    let digest: [u8; 32] = bytes
        .try_into()
        .map_err(|_| PluginError::invalid_fields(format!("{} must decode to 32 bytes", field)))?;
    Ok(digest)
}

/// Check that the fulfillment's SHA-256 digest matches the condition
///
/// Both arguments are base64url strings; the fulfillment is the 32-byte
/// preimage, the condition its digest.
pub fn verify_fulfillment(fulfillment: &str, condition: &str) -> Result<(), PluginError> {
    let preimage = decode_digest(fulfillment, "fulfillment")?;
    let expected = decode_digest(condition, "executionCondition")?;

    let mut hasher = Sha256::new();
    hasher.update(preimage);
    let digest = hasher.finalize();

    if digest.as_slice() != expected {
        return Err(PluginError::not_accepted(
            "fulfillment does not hash to the execution condition",
        ));
    }
    Ok(())
}

/// Encode 32 bytes as the wire's 43-character base64url form
pub fn encode_digest(bytes: &[u8; 32]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn condition_for(preimage: &[u8; 32]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(preimage);
        encode_digest(&hasher.finalize().into())
    }

    fn transfer() -> Transfer {
        let preimage = [7u8; 32];
        Transfer {
            id: Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap(),
            amount: Decimal::new(100, 0),
            ledger: "peer.t.".to_string(),
            from: "peer.t.server".to_string(),
            to: "peer.t.client".to_string(),
            execution_condition: condition_for(&preimage),
            expires_at: Utc::now() + Duration::seconds(60),
            ilp: None,
            note_to_self: None,
        }
    }

    fn validator() -> Validator {
        Validator::new("peer.t.", "peer.t.server", "peer.t.client")
    }

    #[test]
    fn test_valid_outgoing_transfer() {
        assert!(validator().validate_outgoing_transfer(&transfer()).is_ok());
    }

    #[test]
    fn test_incoming_transfer_swaps_endpoints() {
        let mut t = transfer();
        t.from = "peer.t.client".to_string();
        t.to = "peer.t.server".to_string();
        assert!(validator().validate_incoming_transfer(&t).is_ok());
        // The same transfer is not a valid outgoing one
        assert!(validator().validate_outgoing_transfer(&t).is_err());
    }

    #[test]
    fn test_wrong_ledger_rejected() {
        let mut t = transfer();
        t.ledger = "other.".to_string();
        let err = validator().validate_outgoing_transfer(&t).unwrap_err();
        assert!(matches!(err, PluginError::InvalidFields { .. }));
    }

    #[test]
    fn test_wrong_endpoints_rejected() {
        let mut t = transfer();
        t.to = "peer.t.stranger".to_string();
        assert!(validator().validate_outgoing_transfer(&t).is_err());
    }

    #[test]
    fn test_malformed_condition_rejected() {
        let mut t = transfer();
        t.execution_condition = "tooshort".to_string();
        assert!(validator().validate_outgoing_transfer(&t).is_err());

        t.execution_condition = "!".repeat(43);
        assert!(validator().validate_outgoing_transfer(&t).is_err());
    }

    #[test]
    fn test_verify_fulfillment_accepts_matching_preimage() {
        let preimage = [7u8; 32];
        let fulfillment = encode_digest(&preimage);
        let condition = condition_for(&preimage);
        assert!(verify_fulfillment(&fulfillment, &condition).is_ok());
    }

    #[test]
    fn test_verify_fulfillment_rejects_wrong_preimage() {
        let condition = condition_for(&[7u8; 32]);
        let wrong = encode_digest(&[8u8; 32]);
        let err = verify_fulfillment(&wrong, &condition).unwrap_err();
        assert!(matches!(err, PluginError::NotAccepted { .. }));
    }

    #[test]
    fn test_message_endpoint_checks() {
        let v = validator();
        let message = Message {
            ledger: "peer.t.".to_string(),
            from: "peer.t.server".to_string(),
            to: "peer.t.client".to_string(),
            ilp: None,
            data: None,
        };
        assert!(v.validate_outgoing_message(&message).is_ok());
        assert!(v.validate_incoming_message(&message).is_err());
    }
}
