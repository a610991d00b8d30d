//! Outbound transport seam.
//!
//! All network calls to peers, discovery endpoints, and the anchoring
//! network go through [`PeerTransport`], so the mesh core stays
//! independent of the wire implementation and tests can substitute an
//! in-memory double. [`HttpTransport`] is the production implementation:
//! JSON over HTTP with a bounded timeout on every call.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{MeshError, Result};
use crate::ledger::CommitAttestation;
use crate::mesh::message::{Message, MessageAck};

/// Default timeout for outbound calls, in seconds. A peer that stalls
/// past this fails the call instead of blocking the caller.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Anchoring state reported by the backing network for one digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorStatus {
    /// Opaque identifier assigned by the anchoring network.
    pub anchor_id: String,
    /// Independent confirmations observed so far.
    pub confirmations: u32,
}

/// Transport for message exchange and anchoring-network calls.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Deliver a message to a peer endpoint and return its
    /// acknowledgement.
    async fn exchange(&self, endpoint: &str, message: &Message) -> Result<MessageAck>;

    /// Submit an attestation to the anchoring network; returns the
    /// assigned anchor identifier.
    async fn anchor(&self, network_url: &str, attestation: &CommitAttestation) -> Result<String>;

    /// Query the anchoring network for a digest's confirmation state.
    /// `None` means the digest is unknown to the network.
    async fn confirmations(&self, network_url: &str, digest: &str) -> Result<Option<AnchorStatus>>;
}

/// HTTP implementation of [`PeerTransport`].
pub struct HttpTransport {
    client: reqwest::Client,
    /// Opaque protocol selector from the mesh configuration, forwarded to
    /// peers so mixed-protocol meshes can route on it.
    protocol: String,
    /// Shared mesh key; outbound messages are signed when present.
    signing_key: Option<String>,
}

#[derive(Deserialize)]
struct AnchorReceipt {
    anchor_id: String,
}

impl HttpTransport {
    /// Build a transport with the default timeout.
    pub fn new(protocol: impl Into<String>, signing_key: Option<String>) -> Result<Self> {
        Self::with_timeout(
            protocol,
            signing_key,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    /// Build a transport with an explicit timeout.
    pub fn with_timeout(
        protocol: impl Into<String>,
        signing_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            protocol: protocol.into(),
            signing_key,
        })
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn exchange(&self, endpoint: &str, message: &Message) -> Result<MessageAck> {
        let url = format!("{}/mesh/message", endpoint.trim_end_matches('/'));
        tracing::debug!(%url, message_type = %message.message_type, "delivering message");

        let mut message = message.clone();
        if let Some(key) = &self.signing_key {
            message.sign(key);
        }

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Mesh-Protocol", &self.protocol)
            .json(&message)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(MeshError::Transport(format!(
                "{} responded with HTTP {}",
                url,
                resp.status()
            )));
        }
        Ok(resp.json::<MessageAck>().await?)
    }

    async fn anchor(&self, network_url: &str, attestation: &CommitAttestation) -> Result<String> {
        let url = format!("{}/attestations", network_url.trim_end_matches('/'));
        tracing::debug!(%url, digest = %attestation.digest, "anchoring attestation");

        let resp = self.client.post(&url).json(attestation).send().await?;
        if !resp.status().is_success() {
            return Err(MeshError::Transport(format!(
                "{} responded with HTTP {}",
                url,
                resp.status()
            )));
        }
        let receipt = resp.json::<AnchorReceipt>().await?;
        Ok(receipt.anchor_id)
    }

    async fn confirmations(&self, network_url: &str, digest: &str) -> Result<Option<AnchorStatus>> {
        let url = format!(
            "{}/attestations/{}",
            network_url.trim_end_matches('/'),
            digest
        );

        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(MeshError::Transport(format!(
                "{} responded with HTTP {}",
                url,
                resp.status()
            )));
        }
        Ok(Some(resp.json::<AnchorStatus>().await?))
    }
}
