//! Message bus.
//!
//! Signs, serializes, and exchanges messages between agents, and hosts
//! the server-side dispatch for everything arriving over the mesh. The
//! ledger's reconciliation traffic (push/pull) and the directory's
//! discovery traffic both terminate here.

use std::sync::Arc;

use crate::config::MeshConfig;
use crate::errors::{MeshError, Result};
use crate::ledger::CommitLedger;
use crate::mesh::directory::AgentDirectory;
use crate::mesh::message::{Message, MessageAck, MessageBody};
use crate::mesh::transport::PeerTransport;

/// Inter-agent message bus.
pub struct MessageBus {
    config: MeshConfig,
    node_id: String,
    directory: Arc<AgentDirectory>,
    ledger: Arc<CommitLedger>,
    transport: Arc<dyn PeerTransport>,
}

impl MessageBus {
    pub fn new(
        config: MeshConfig,
        node_id: impl Into<String>,
        directory: Arc<AgentDirectory>,
        ledger: Arc<CommitLedger>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            config,
            node_id: node_id.into(),
            directory,
            ledger,
            transport,
        }
    }

    /// This node's identity, presented as `from_agent` on outbound
    /// messages.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn gate(&self) -> Result<()> {
        if !self.config.enabled {
            return Err(MeshError::NotEnabled {
                component: "message bus",
            });
        }
        Ok(())
    }

    /// Send a message to a registered agent.
    ///
    /// The recipient's endpoint is resolved through the directory; the
    /// transport signs the message when a mesh key is configured.
    pub async fn send(&self, to_agent: &str, body: MessageBody) -> Result<MessageAck> {
        self.gate()?;
        let agent = self.directory.get(to_agent).ok_or_else(|| {
            MeshError::Transport(format!("unknown agent: {}", to_agent))
        })?;
        let message = Message::new(&self.node_id, to_agent, &body)?;
        tracing::debug!(
            to = %to_agent,
            endpoint = %agent.endpoint,
            message_type = %message.message_type,
            "sending message"
        );
        self.transport.exchange(&agent.endpoint, &message).await
    }

    /// Decode and authenticate a raw inbound message.
    ///
    /// Structurally invalid bytes are a [`MeshError::MalformedMessage`];
    /// when a mesh key is configured, a missing or wrong signature is a
    /// [`MeshError::UnauthenticatedMessage`].
    pub fn receive(&self, raw: &[u8]) -> Result<Message> {
        let message: Message = serde_json::from_slice(raw)
            .map_err(|e| MeshError::MalformedMessage(e.to_string()))?;
        if let Some(key) = &self.config.signing_key {
            if !message.verify_signature(key) {
                return Err(MeshError::UnauthenticatedMessage(format!(
                    "signature mismatch for message from {}",
                    message.from_agent
                )));
            }
        }
        Ok(message)
    }

    /// Process one inbound message and build its acknowledgement.
    ///
    /// Discovery and pull replies ride in the ack's optional fields;
    /// unknown message types are acknowledged without processing so newer
    /// peers are not rejected.
    pub async fn handle_incoming(&self, message: Message) -> Result<MessageAck> {
        self.gate()?;
        let body = message.body()?;
        tracing::debug!(
            from = %message.from_agent,
            message_type = %message.message_type,
            "handling inbound message"
        );

        match body {
            MessageBody::Discovery => {
                Ok(MessageAck::received().with_agents(self.directory.list_enabled()))
            }
            MessageBody::AttestationPush { attestations } => {
                let mut merged = 0;
                for attestation in attestations {
                    if self.ledger.merge_remote(attestation)? {
                        merged += 1;
                    }
                }
                if merged > 0 {
                    tracing::info!(from = %message.from_agent, merged, "merged pushed attestations");
                }
                Ok(MessageAck::received())
            }
            MessageBody::AttestationPull { known_digests } => {
                let missing = self.ledger.missing_from(&known_digests)?;
                Ok(MessageAck::received().with_attestations(missing))
            }
            MessageBody::Heartbeat => {
                self.directory.touch(&message.from_agent);
                Ok(MessageAck::received())
            }
            MessageBody::Unknown { message_type, .. } => {
                tracing::debug!(from = %message.from_agent, %message_type, "ignoring unknown message type");
                Ok(MessageAck::received())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::{CommitAttestation, NewCommit};
    use crate::mesh::directory::Agent;
    use crate::mesh::transport::testing::MockTransport;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        transport: Arc<MockTransport>,
        directory: Arc<AgentDirectory>,
        ledger: Arc<CommitLedger>,
        bus: MessageBus,
    }

    fn fixture(mesh: MeshConfig, ledger_config: LedgerConfig) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let directory = Arc::new(AgentDirectory::new(
            mesh.clone(),
            "node-self",
            transport.clone(),
        ));
        let ledger = Arc::new(CommitLedger::new(
            ledger_config,
            "node-self",
            transport.clone(),
        ));
        let bus = MessageBus::new(
            mesh,
            "node-self",
            directory.clone(),
            ledger.clone(),
            transport.clone(),
        );
        Fixture {
            transport,
            directory,
            ledger,
            bus,
        }
    }

    fn default_fixture() -> Fixture {
        fixture(MeshConfig::default(), LedgerConfig::default())
    }

    fn sample_attestation(digest: &str) -> CommitAttestation {
        CommitAttestation {
            digest: digest.to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
            author: "bob".to_string(),
            message: "add feature".to_string(),
            external_anchor: None,
            verified: false,
            confirmations: 2,
        }
    }

    fn peer_agent(id: &str) -> Agent {
        Agent {
            id: id.to_string(),
            name: format!("repo-{}", id),
            repository_url: format!("https://git.example.com/{}", id),
            endpoint: format!("https://{}.example.com", id),
            protocol: "http".to_string(),
            enabled: true,
            last_sync: None,
        }
    }

    #[tokio::test]
    async fn test_send_resolves_endpoint_through_directory() {
        let f = default_fixture();
        f.directory.register(peer_agent("peer-1")).unwrap();

        f.bus.send("peer-1", MessageBody::Heartbeat).await.unwrap();

        let sent = f.transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://peer-1.example.com");
        assert_eq!(sent[0].1.from_agent, "node-self");
        assert_eq!(sent[0].1.message_type, "heartbeat");
    }

    #[tokio::test]
    async fn test_send_to_unknown_agent_is_transport_error() {
        let f = default_fixture();
        let err = f.bus.send("ghost", MessageBody::Heartbeat).await.unwrap_err();
        assert!(matches!(err, MeshError::Transport(_)));
    }

    #[tokio::test]
    async fn test_send_gated_when_disabled() {
        let f = fixture(
            MeshConfig {
                enabled: false,
                ..MeshConfig::default()
            },
            LedgerConfig::default(),
        );
        let err = f.bus.send("peer-1", MessageBody::Heartbeat).await.unwrap_err();
        assert!(matches!(err, MeshError::NotEnabled { .. }));
    }

    #[test]
    fn test_receive_rejects_malformed_bytes() {
        let f = default_fixture();
        let err = f.bus.receive(b"not json at all").unwrap_err();
        assert!(matches!(err, MeshError::MalformedMessage(_)));
    }

    #[test]
    fn test_receive_verifies_signature_when_key_configured() {
        let f = fixture(
            MeshConfig {
                signing_key: Some("shared-secret".to_string()),
                ..MeshConfig::default()
            },
            LedgerConfig::default(),
        );

        let mut message = Message::new("peer-1", "node-self", &MessageBody::Heartbeat).unwrap();
        message.sign("shared-secret");
        let raw = serde_json::to_vec(&message).unwrap();
        assert!(f.bus.receive(&raw).is_ok());

        let mut forged = Message::new("peer-1", "node-self", &MessageBody::Heartbeat).unwrap();
        forged.sign("wrong-secret");
        let raw = serde_json::to_vec(&forged).unwrap();
        let err = f.bus.receive(&raw).unwrap_err();
        assert!(matches!(err, MeshError::UnauthenticatedMessage(_)));
    }

    #[test]
    fn test_receive_skips_verification_without_key() {
        let f = default_fixture();
        let message = Message::new("peer-1", "node-self", &MessageBody::Heartbeat).unwrap();
        let raw = serde_json::to_vec(&message).unwrap();
        assert!(f.bus.receive(&raw).is_ok());
    }

    #[tokio::test]
    async fn test_discovery_returns_enabled_roster() {
        let f = default_fixture();
        f.directory.register(peer_agent("peer-1")).unwrap();
        f.directory
            .register(Agent {
                enabled: false,
                ..peer_agent("peer-2")
            })
            .unwrap();

        let message = Message::new("peer-9", "node-self", &MessageBody::Discovery).unwrap();
        let ack = f.bus.handle_incoming(message).await.unwrap();

        let agents = ack.agents.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "peer-1");
    }

    #[tokio::test]
    async fn test_push_merges_into_ledger() {
        let f = default_fixture();
        let message = Message::new(
            "peer-1",
            "node-self",
            &MessageBody::AttestationPush {
                attestations: vec![sample_attestation("d1")],
            },
        )
        .unwrap();

        let ack = f.bus.handle_incoming(message).await.unwrap();
        assert_eq!(ack.status, "received");
        assert_eq!(f.ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_push_with_ledger_disabled_is_not_enabled() {
        let f = fixture(
            MeshConfig::default(),
            LedgerConfig {
                enabled: false,
                ..LedgerConfig::default()
            },
        );
        let message = Message::new(
            "peer-1",
            "node-self",
            &MessageBody::AttestationPush {
                attestations: vec![sample_attestation("d1")],
            },
        )
        .unwrap();

        let err = f.bus.handle_incoming(message).await.unwrap_err();
        assert!(matches!(err, MeshError::NotEnabled { .. }));
    }

    #[tokio::test]
    async fn test_pull_returns_only_missing() {
        let f = default_fixture();
        let recorded = f
            .ledger
            .record_commit(NewCommit {
                timestamp: Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
                author: "alice".to_string(),
                message: "fix bug".to_string(),
            })
            .await
            .unwrap();
        f.ledger.merge_remote(sample_attestation("d2")).unwrap();

        let message = Message::new(
            "peer-1",
            "node-self",
            &MessageBody::AttestationPull {
                known_digests: vec![recorded.digest.clone()],
            },
        )
        .unwrap();
        let ack = f.bus.handle_incoming(message).await.unwrap();

        let attestations = ack.attestations.unwrap();
        assert_eq!(attestations.len(), 1);
        assert_eq!(attestations[0].digest, "d2");
    }

    #[tokio::test]
    async fn test_heartbeat_touches_sender() {
        let f = default_fixture();
        f.directory.register(peer_agent("peer-1")).unwrap();

        let message = Message::new("peer-1", "node-self", &MessageBody::Heartbeat).unwrap();
        f.bus.handle_incoming(message).await.unwrap();

        assert!(f.directory.get("peer-1").unwrap().last_sync.is_some());
    }

    #[tokio::test]
    async fn test_unknown_type_is_acknowledged() {
        let f = default_fixture();
        let message = Message {
            from_agent: "peer-1".to_string(),
            to_agent: "node-self".to_string(),
            message_type: "topology_report".to_string(),
            payload: serde_json::json!({"hops": 3}),
            timestamp: Utc::now(),
            signature: String::new(),
        };

        let ack = f.bus.handle_incoming(message).await.unwrap();
        assert_eq!(ack.status, "received");
        assert!(f.ledger.is_empty());
    }
}
