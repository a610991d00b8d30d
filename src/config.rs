//! Node configuration.
//!
//! Plain serde structures loaded from YAML. Each component receives its
//! slice of the configuration at construction and owns it; there is no
//! process-wide configuration singleton.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{MeshError, Result};

/// Default sync-loop interval in seconds.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Commit ledger configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Agent mesh configuration.
    #[serde(default)]
    pub mesh: MeshConfig,
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Interval between scheduled sync ticks, in seconds.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
}

/// Commit ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Whether the ledger records and serves attestations at all.
    pub enabled: bool,
    /// Ledger schema/protocol version string.
    #[serde(default)]
    pub version: String,
    /// Base URL of the backing anchoring network.
    #[serde(default)]
    pub network_url: String,
    /// Whether attestations are anchored to the backing network and
    /// synced across peers. Gates `sync_with_peers` independently of
    /// `enabled`.
    #[serde(default)]
    pub blockchain_integration: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            version: "1".to_string(),
            network_url: String::new(),
            blockchain_integration: false,
        }
    }
}

/// Agent mesh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Whether this node participates in the mesh.
    pub enabled: bool,
    /// Stable identifier this node presents as `from_agent`. Minted at
    /// startup when absent.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Peer discovery mode, e.g. "automatic" or "manual".
    #[serde(default)]
    pub discovery_mode: String,
    /// Opaque protocol selector passed to the transport.
    #[serde(default)]
    pub communication_protocol: String,
    /// Peer repository identifiers this node syncs with.
    #[serde(default)]
    pub peer_repositories: Vec<String>,
    /// Discovery endpoints queried for new agents.
    #[serde(default)]
    pub agent_endpoints: Vec<String>,
    /// Shared HMAC key for message signatures. When absent, messages are
    /// neither signed nor verified.
    #[serde(default)]
    pub signing_key: Option<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_id: None,
            discovery_mode: "automatic".to_string(),
            communication_protocol: "http".to_string(),
            peer_repositories: Vec::new(),
            agent_endpoints: Vec::new(),
            signing_key: None,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the inbound endpoint binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_sync_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MeshError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| MeshError::Config(e.to_string()))
    }
}
