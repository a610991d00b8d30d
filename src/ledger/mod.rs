//! Commit attestation ledger.
//!
//! Owns the append-only collection of commit attestations. Entries are
//! keyed by content digest, so recording is idempotent: the same
//! `(timestamp, author, message)` triple always lands on the same entry.
//! Attestations are never deleted; corrections are new attestations, and
//! remote data merged during sync can only add trust signal, never
//! rewrite locally recorded content.

pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;
use crate::errors::{MeshError, Result};
use crate::hasher;
use crate::mesh::message::{Message, MessageBody};
use crate::mesh::transport::PeerTransport;
use store::SqliteStore;

/// A recorded claim that a given commit exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitAttestation {
    /// Content digest of `(timestamp, author, message)`.
    pub digest: String,
    /// Point in time the commit was authored (caller-supplied).
    pub timestamp: DateTime<Utc>,
    /// Commit author.
    pub author: String,
    /// Commit message.
    pub message: String,
    /// Identifier assigned by the anchoring network; absent until
    /// anchoring succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_anchor: Option<String>,
    /// True once independently confirmed present in the backing network.
    #[serde(default)]
    pub verified: bool,
    /// Independent confirmations observed; never decreases.
    #[serde(default)]
    pub confirmations: u32,
}

/// Commit data submitted for recording. The ledger computes the digest
/// itself; caller-supplied digests are never trusted.
#[derive(Debug, Clone)]
pub struct NewCommit {
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub message: String,
}

/// Outcome of one peer-sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Endpoints that completed both exchanges.
    pub synced: Vec<String>,
    /// Endpoints that were unreachable or answered with an error.
    pub failed: Vec<String>,
    /// Attestations newly merged from peers.
    pub merged: usize,
}

#[derive(Default)]
struct Entries {
    by_digest: HashMap<String, CommitAttestation>,
    /// Digests in recording order, oldest first.
    order: Vec<String>,
}

/// The commit ledger.
pub struct CommitLedger {
    config: LedgerConfig,
    node_id: String,
    entries: RwLock<Entries>,
    transport: Arc<dyn PeerTransport>,
    store: Option<Arc<SqliteStore>>,
}

impl CommitLedger {
    /// Build an in-memory ledger.
    pub fn new(
        config: LedgerConfig,
        node_id: impl Into<String>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            config,
            node_id: node_id.into(),
            entries: RwLock::new(Entries::default()),
            transport,
            store: None,
        }
    }

    /// Build a ledger backed by a durable store, reloading any
    /// attestations that survived a restart.
    pub fn with_store(
        config: LedgerConfig,
        node_id: impl Into<String>,
        transport: Arc<dyn PeerTransport>,
        store: Arc<SqliteStore>,
    ) -> Result<Self> {
        let mut entries = Entries::default();
        for attestation in store.load_attestations()? {
            entries.order.push(attestation.digest.clone());
            entries.by_digest.insert(attestation.digest.clone(), attestation);
        }
        Ok(Self {
            config,
            node_id: node_id.into(),
            entries: RwLock::new(entries),
            transport,
            store: Some(store),
        })
    }

    fn gate(&self) -> Result<()> {
        if !self.config.enabled {
            return Err(MeshError::NotEnabled {
                component: "ledger",
            });
        }
        Ok(())
    }

    fn persist(&self, attestation: &CommitAttestation) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_attestation(attestation) {
                tracing::warn!(digest = %attestation.digest, error = %e, "store write failed");
            }
        }
    }

    /// Record a commit.
    ///
    /// Computes the digest from the commit triple (the ledger is the sole
    /// authority on digest computation) and appends the attestation.
    /// Re-recording an existing triple returns the existing entry
    /// unchanged. When anchoring is enabled the new attestation is
    /// submitted to the backing network; anchoring failure leaves it
    /// unanchored and is logged, never failing the record.
    pub async fn record_commit(&self, commit: NewCommit) -> Result<CommitAttestation> {
        self.gate()?;
        let digest = hasher::commit_digest(&commit.timestamp, &commit.author, &commit.message);

        let attestation = {
            let mut entries = self.entries.write();
            if let Some(existing) = entries.by_digest.get(&digest) {
                return Ok(existing.clone());
            }
            let attestation = CommitAttestation {
                digest: digest.clone(),
                timestamp: commit.timestamp,
                author: commit.author,
                message: commit.message,
                external_anchor: None,
                verified: false,
                confirmations: 0,
            };
            entries.order.push(digest.clone());
            entries.by_digest.insert(digest.clone(), attestation.clone());
            attestation
        };
        self.persist(&attestation);
        tracing::info!(%digest, author = %attestation.author, "recorded commit attestation");

        if self.config.blockchain_integration && !self.config.network_url.is_empty() {
            match self
                .transport
                .anchor(&self.config.network_url, &attestation)
                .await
            {
                Ok(anchor_id) => {
                    let updated = {
                        let mut entries = self.entries.write();
                        entries.by_digest.get_mut(&digest).map(|entry| {
                            entry.external_anchor = Some(anchor_id);
                            entry.clone()
                        })
                    };
                    if let Some(updated) = updated {
                        self.persist(&updated);
                        return Ok(updated);
                    }
                }
                Err(e) => {
                    tracing::warn!(%digest, error = %e, "anchoring failed, attestation left unanchored");
                }
            }
        }

        Ok(attestation)
    }

    /// Check whether a commit is confirmed present in the backing
    /// network.
    ///
    /// Unknown digests answer `false`, never an error. With anchoring
    /// disabled the locally recorded `verified` flag answers; otherwise
    /// the confirmation source is queried and the confirmation count
    /// ratchets upward.
    pub async fn verify_commit(&self, digest: &str) -> Result<bool> {
        self.gate()?;
        let Some(local) = self.entries.read().by_digest.get(digest).cloned() else {
            return Ok(false);
        };

        if !self.config.blockchain_integration || self.config.network_url.is_empty() {
            return Ok(local.verified);
        }

        match self
            .transport
            .confirmations(&self.config.network_url, digest)
            .await?
        {
            Some(status) => {
                let updated = {
                    let mut entries = self.entries.write();
                    let Some(entry) = entries.by_digest.get_mut(digest) else {
                        return Ok(false);
                    };
                    if entry.external_anchor.is_none() {
                        entry.external_anchor = Some(status.anchor_id);
                    }
                    if status.confirmations > entry.confirmations {
                        entry.confirmations = status.confirmations;
                    }
                    entry.verified = entry.confirmations >= 1;
                    entry.clone()
                };
                self.persist(&updated);
                Ok(updated.verified)
            }
            None => Ok(false),
        }
    }

    /// Snapshot of the most recent attestations, newest first, capped at
    /// `limit`.
    pub fn history(&self, limit: usize) -> Result<Vec<CommitAttestation>> {
        self.gate()?;
        let entries = self.entries.read();
        Ok(entries
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|digest| entries.by_digest.get(digest).cloned())
            .collect())
    }

    /// Number of recorded attestations.
    pub fn len(&self) -> usize {
        self.entries.read().order.len()
    }

    /// Whether the ledger holds no attestations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attestations whose digests are not in `known`. Serves
    /// attestation-pull requests from peers.
    pub fn missing_from(&self, known: &[String]) -> Result<Vec<CommitAttestation>> {
        self.gate()?;
        let entries = self.entries.read();
        Ok(entries
            .order
            .iter()
            .filter(|digest| !known.contains(digest))
            .filter_map(|digest| entries.by_digest.get(digest).cloned())
            .collect())
    }

    /// Merge one attestation learned from a peer. Returns `true` when the
    /// digest was new.
    ///
    /// Local data is authoritative for content: a known digest can only
    /// gain confirmations (ratcheting to the remote count when higher),
    /// never have its `timestamp`/`author`/`message` or anchor replaced.
    /// An unknown digest is added as unverified with zero local
    /// confirmations — trust is re-earned through verification here.
    pub fn merge_remote(&self, remote: CommitAttestation) -> Result<bool> {
        self.gate()?;
        let (is_new, changed) = {
            let mut entries = self.entries.write();
            if let Some(local) = entries.by_digest.get_mut(&remote.digest) {
                if remote.confirmations > local.confirmations {
                    local.confirmations = remote.confirmations;
                    (false, Some(local.clone()))
                } else {
                    (false, None)
                }
            } else {
                let attestation = CommitAttestation {
                    verified: false,
                    confirmations: 0,
                    ..remote
                };
                entries.order.push(attestation.digest.clone());
                entries
                    .by_digest
                    .insert(attestation.digest.clone(), attestation.clone());
                (true, Some(attestation))
            }
        };
        if let Some(attestation) = &changed {
            self.persist(attestation);
            if is_new {
                tracing::debug!(digest = %attestation.digest, "merged remote attestation");
            }
        }
        Ok(is_new)
    }

    /// Exchange attestation summaries with each peer endpoint and merge
    /// anything new.
    ///
    /// Gated on `blockchain_integration`, independent of the ledger's own
    /// enabled flag. Each peer exchange is independent: unreachable peers
    /// are logged into the report and never block reconciliation with the
    /// reachable subset. Zero reachable peers is a success.
    pub async fn sync_with_peers(&self, endpoints: &[String]) -> Result<SyncReport> {
        if !self.config.blockchain_integration {
            return Err(MeshError::BlockchainDisabled);
        }

        let mut report = SyncReport::default();
        for endpoint in endpoints {
            match self.sync_one_peer(endpoint).await {
                Ok(merged) => {
                    report.merged += merged;
                    report.synced.push(endpoint.clone());
                }
                Err(e) => {
                    tracing::warn!(%endpoint, error = %e, "peer sync failed");
                    report.failed.push(endpoint.clone());
                }
            }
        }
        tracing::debug!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            merged = report.merged,
            "peer sync pass complete"
        );
        Ok(report)
    }

    // Pull first so the peer's reply is scoped to what we lack, then push
    // our full set for the peer to merge idempotently.
    async fn sync_one_peer(&self, endpoint: &str) -> Result<usize> {
        let known: Vec<String> = self.entries.read().order.clone();
        let pull = Message::new(
            &self.node_id,
            endpoint,
            &MessageBody::AttestationPull {
                known_digests: known,
            },
        )?;
        let ack = self.transport.exchange(endpoint, &pull).await?;

        let mut merged = 0;
        for attestation in ack.attestations.unwrap_or_default() {
            if self.merge_remote(attestation)? {
                merged += 1;
            }
        }

        let local: Vec<CommitAttestation> = {
            let entries = self.entries.read();
            entries
                .order
                .iter()
                .filter_map(|digest| entries.by_digest.get(digest).cloned())
                .collect()
        };
        if !local.is_empty() {
            let push = Message::new(
                &self.node_id,
                endpoint,
                &MessageBody::AttestationPush {
                    attestations: local,
                },
            )?;
            self.transport.exchange(endpoint, &push).await?;
        }
        Ok(merged)
    }
}
