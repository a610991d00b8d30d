//! Inter-agent messages.
//!
//! On the wire a message keeps the open `message_type` + `payload` pair so
//! peers running newer protocol revisions stay interoperable; in memory
//! the pair round-trips through the typed [`MessageBody`] union, with
//! unrecognized discriminators decoding to [`MessageBody::Unknown`].
//!
//! Messages are transient: owned by the sender until delivered, then by
//! the receiver for processing, never persisted.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::errors::{MeshError, Result};
use crate::ledger::CommitAttestation;
use crate::mesh::directory::Agent;

type HmacSha256 = Hmac<Sha256>;

/// Wire-format message exchanged between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Sender identifier.
    pub from_agent: String,
    /// Recipient identifier. During endpoint-addressed sync, where no
    /// agent id is known yet, this carries the peer endpoint.
    pub to_agent: String,
    /// Body discriminator.
    pub message_type: String,
    /// Open payload whose shape depends on `message_type`.
    pub payload: Value,
    /// Send time.
    pub timestamp: DateTime<Utc>,
    /// Hex HMAC-SHA256 over the message body. Empty when signing is
    /// disabled.
    #[serde(default)]
    pub signature: String,
}

/// Typed view of a message's `message_type`/`payload` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Request for the receiver's enabled agent roster.
    Discovery,
    /// Attestations for the receiver to merge into its ledger.
    AttestationPush {
        attestations: Vec<CommitAttestation>,
    },
    /// Request for attestations absent from the sender's digest list.
    AttestationPull { known_digests: Vec<String> },
    /// Liveness touch; the receiver updates the sender's `last_sync`.
    Heartbeat,
    /// Unrecognized discriminator, acknowledged but not processed.
    Unknown {
        message_type: String,
        payload: Value,
    },
}

#[derive(Serialize, Deserialize)]
struct PushPayload {
    attestations: Vec<CommitAttestation>,
}

#[derive(Serialize, Deserialize)]
struct PullPayload {
    known_digests: Vec<String>,
}

impl MessageBody {
    /// Wire discriminator for this body.
    pub fn message_type(&self) -> &str {
        match self {
            Self::Discovery => "discovery",
            Self::AttestationPush { .. } => "attestation_push",
            Self::AttestationPull { .. } => "attestation_pull",
            Self::Heartbeat => "heartbeat",
            Self::Unknown { message_type, .. } => message_type,
        }
    }

    /// Decode a wire `message_type`/`payload` pair.
    ///
    /// A known discriminator with a payload that does not match its
    /// schema is a [`MeshError::MalformedMessage`]; an unknown
    /// discriminator is not an error and yields [`MessageBody::Unknown`].
    pub fn from_wire(message_type: &str, payload: Value) -> Result<Self> {
        let malformed = |e: serde_json::Error| {
            MeshError::MalformedMessage(format!("invalid {} payload: {}", message_type, e))
        };
        match message_type {
            "discovery" => Ok(Self::Discovery),
            "attestation_push" => {
                let body: PushPayload = serde_json::from_value(payload).map_err(malformed)?;
                Ok(Self::AttestationPush {
                    attestations: body.attestations,
                })
            }
            "attestation_pull" => {
                let body: PullPayload = serde_json::from_value(payload).map_err(malformed)?;
                Ok(Self::AttestationPull {
                    known_digests: body.known_digests,
                })
            }
            "heartbeat" => Ok(Self::Heartbeat),
            other => Ok(Self::Unknown {
                message_type: other.to_string(),
                payload,
            }),
        }
    }

    fn to_payload(&self) -> Result<Value> {
        let payload = match self {
            Self::Discovery | Self::Heartbeat => Value::Object(Default::default()),
            Self::AttestationPush { attestations } => serde_json::to_value(PushPayload {
                attestations: attestations.clone(),
            })?,
            Self::AttestationPull { known_digests } => serde_json::to_value(PullPayload {
                known_digests: known_digests.clone(),
            })?,
            Self::Unknown { payload, .. } => payload.clone(),
        };
        Ok(payload)
    }
}

impl Message {
    /// Build an unsigned message from a typed body.
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        body: &MessageBody,
    ) -> Result<Self> {
        Ok(Self {
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            message_type: body.message_type().to_string(),
            payload: body.to_payload()?,
            timestamp: Utc::now(),
            signature: String::new(),
        })
    }

    /// Decode this message's body into its typed form.
    pub fn body(&self) -> Result<MessageBody> {
        MessageBody::from_wire(&self.message_type, self.payload.clone())
    }

    /// Sign the message body with the shared mesh key.
    pub fn sign(&mut self, key: &str) {
        self.signature = hmac_hex(key, &self.canonical());
    }

    /// Verify the signature against the shared mesh key.
    pub fn verify_signature(&self, key: &str) -> bool {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(self.canonical().as_bytes());
        match hex::decode(&self.signature) {
            Ok(sig) => mac.verify_slice(&sig).is_ok(),
            Err(_) => false,
        }
    }

    // Canonical byte string covered by the signature. The payload is
    // included in its serialized form, so any tampering with content,
    // routing, or send time invalidates the signature.
    fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.from_agent,
            self.to_agent,
            self.message_type,
            self.payload,
            self.timestamp.to_rfc3339(),
        )
    }
}

fn hmac_hex(key: &str, data: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Acknowledgement envelope returned by the inbound message handler.
///
/// Discovery and pull replies ride in the optional fields so the message
/// endpoint remains the only operation exposed across the process
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAck {
    /// Always "received" on success.
    pub status: String,
    /// Time the message was processed.
    pub timestamp: DateTime<Utc>,
    /// Enabled agent roster, answering a discovery request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<Agent>>,
    /// Attestations the sender was missing, answering a pull.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestations: Option<Vec<CommitAttestation>>,
}

impl MessageAck {
    /// Plain acknowledgement.
    pub fn received() -> Self {
        Self {
            status: "received".to_string(),
            timestamp: Utc::now(),
            agents: None,
            attestations: None,
        }
    }

    /// Acknowledgement carrying an agent roster.
    pub fn with_agents(mut self, agents: Vec<Agent>) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Acknowledgement carrying attestations.
    pub fn with_attestations(mut self, attestations: Vec<CommitAttestation>) -> Self {
        self.attestations = Some(attestations);
        self
    }
}
