//! Cluster protocol messages and their wire encoding.
//!
//! The cross-node protocol is a closed set: activation requests/responses
//! and identity handover chunks. [`WireMessage`] is the serde enum every
//! inter-node transport speaks; the loopback transport round-trips each
//! message through JSON so the encoding is exercised even in-process.

use serde::{Deserialize, Serialize};

use super::identity::ClusterIdentity;
use crate::pid::Pid;
use crate::process::{AnyMessage, MessageEnvelope};

/// Ask a member's placement activator to host an identity.
///
/// Carries the requester's spawn lock so the activator can persist the
/// activation under the lease the requester acquired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRequest {
    /// The identity to activate.
    pub identity: ClusterIdentity,
    /// Lock id acquired by the requesting node.
    pub lock_id: String,
}

/// Answer to an [`ActivationRequest`].
///
/// `None` means activation failed; the requester releases its lock and the
/// caller retries later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResponse {
    /// The hosted pid, when activation succeeded.
    pub pid: Option<Pid>,
}

/// One activation carried by a handover chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    /// The identity.
    pub identity: ClusterIdentity,
    /// Where it is activated.
    pub pid: Pid,
}

/// One chunk of a member's activation inventory during reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityHandover {
    /// Address of the sending member.
    pub address: String,
    /// Sequential chunk number, starting at 1.
    pub chunk_id: u32,
    /// True on the member's last chunk.
    pub final_chunk: bool,
    /// Hash of the topology this round reconciles against.
    pub topology_hash: u64,
    /// Activations in this chunk.
    pub actors: Vec<Activation>,
}

/// The closed set of messages that cross node boundaries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// See [`ActivationRequest`].
    ActivationRequest(ActivationRequest),
    /// See [`ActivationResponse`].
    ActivationResponse(ActivationResponse),
    /// See [`IdentityHandover`].
    IdentityHandover(IdentityHandover),
}

impl WireMessage {
    /// Encode an envelope's payload if it belongs to the wire set.
    pub fn from_payload(message: &AnyMessage) -> Option<WireMessage> {
        if let Some(m) = message.downcast_ref::<ActivationRequest>() {
            return Some(WireMessage::ActivationRequest(m.clone()));
        }
        if let Some(m) = message.downcast_ref::<ActivationResponse>() {
            return Some(WireMessage::ActivationResponse(m.clone()));
        }
        if let Some(m) = message.downcast_ref::<IdentityHandover>() {
            return Some(WireMessage::IdentityHandover(m.clone()));
        }
        None
    }

    /// Unwrap back into a concrete payload envelope for local delivery.
    pub fn into_envelope(self, sender: Option<Pid>) -> MessageEnvelope {
        match self {
            WireMessage::ActivationRequest(m) => match sender {
                Some(sender) => MessageEnvelope::with_sender(m, sender),
                None => MessageEnvelope::new(m),
            },
            WireMessage::ActivationResponse(m) => match sender {
                Some(sender) => MessageEnvelope::with_sender(m, sender),
                None => MessageEnvelope::new(m),
            },
            WireMessage::IdentityHandover(m) => match sender {
                Some(sender) => MessageEnvelope::with_sender(m, sender),
                None => MessageEnvelope::new(m),
            },
        }
    }
}

/// First message a freshly placed virtual actor receives, telling it which
/// cluster identity it embodies. Local to the hosting node, never on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterInit {
    /// The identity this actor was activated for.
    pub identity: ClusterIdentity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::msg;

    #[test]
    fn test_wire_round_trip_activation_request() {
        let wire = WireMessage::ActivationRequest(ActivationRequest {
            identity: ClusterIdentity::new("counter", "c-1"),
            lock_id: "lock-42".to_string(),
        });
        let json = serde_json::to_string(&wire).expect("encode");
        let back: WireMessage = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, wire);
    }

    #[test]
    fn test_from_payload_recognizes_wire_types_only() {
        let request = msg(ActivationRequest {
            identity: ClusterIdentity::new("counter", "c-1"),
            lock_id: "lock-1".to_string(),
        });
        assert!(WireMessage::from_payload(&request).is_some());

        let not_wire = msg("plain string".to_string());
        assert!(WireMessage::from_payload(&not_wire).is_none());
    }

    #[test]
    fn test_into_envelope_preserves_sender() {
        let wire = WireMessage::ActivationResponse(ActivationResponse { pid: None });
        let sender = Pid::new("node-a:1", "$futures").with_request_id(3);
        let envelope = wire.into_envelope(Some(sender.clone()));
        assert_eq!(envelope.sender, Some(sender));
        assert!(envelope
            .message
            .downcast_ref::<ActivationResponse>()
            .is_some());
    }
}
