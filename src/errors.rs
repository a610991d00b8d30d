//! Crate-wide error taxonomy.
//!
//! Every failure in the ledger/mesh core is one of these variants.
//! Feature-gate failures (`NotEnabled`, `BlockchainDisabled`) are returned
//! to the caller; transport failures during scheduled sync are logged and
//! swallowed at the tick level; message rejections are terminal for that
//! message. Nothing here is fatal to the process.

use thiserror::Error;

/// Error type for ledger and mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// A feature-flag gate failed. The caller should re-check its
    /// configuration; this is never retried automatically.
    #[error("{component} is not enabled")]
    NotEnabled {
        /// The gated component, e.g. "ledger" or "message bus".
        component: &'static str,
    },

    /// Cross-network anchoring is disabled. Distinct from the ledger's
    /// own enabled flag: local recording and anchoring gate independently.
    #[error("blockchain integration is not enabled")]
    BlockchainDisabled,

    /// A peer or discovery endpoint was unreachable. Retried only on the
    /// next scheduled tick, never inline.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound message was structurally invalid.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// An inbound message's signature did not verify against the
    /// configured mesh key.
    #[error("unauthenticated message: {0}")]
    UnauthenticatedMessage(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The durable store failed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for MeshError {
    fn from(err: reqwest::Error) -> Self {
        MeshError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;
