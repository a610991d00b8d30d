//! Agent directory.
//!
//! Owns the set of known agents: identity, reachability, and whether each
//! one participates in sync. Registration is last-write-wins by id, so a
//! re-registered agent replaces its prior record wholesale and duplicates
//! cannot exist.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MeshConfig;
use crate::errors::{MeshError, Result};
use crate::ledger::store::SqliteStore;
use crate::mesh::message::{Message, MessageBody};
use crate::mesh::transport::PeerTransport;

/// A remote peer participating in attestation exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Stable unique identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Repository this agent attests for.
    pub repository_url: String,
    /// Where this agent receives mesh messages.
    pub endpoint: String,
    /// Opaque protocol selector for reaching this agent.
    pub protocol: String,
    /// Whether this agent participates in sync.
    pub enabled: bool,
    /// Most recent successful reconciliation with this agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

impl Agent {
    /// Build an enabled agent with a freshly minted id.
    pub fn new(
        name: impl Into<String>,
        repository_url: impl Into<String>,
        endpoint: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            repository_url: repository_url.into(),
            endpoint: endpoint.into(),
            protocol: protocol.into(),
            enabled: true,
            last_sync: None,
        }
    }
}

/// Directory of known agents.
pub struct AgentDirectory {
    config: MeshConfig,
    node_id: String,
    agents: RwLock<HashMap<String, Agent>>,
    transport: Arc<dyn PeerTransport>,
    store: Option<Arc<SqliteStore>>,
}

impl AgentDirectory {
    /// Build an in-memory directory.
    pub fn new(
        config: MeshConfig,
        node_id: impl Into<String>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            config,
            node_id: node_id.into(),
            agents: RwLock::new(HashMap::new()),
            transport,
            store: None,
        }
    }

    /// Build a directory backed by a durable store, reloading any agents
    /// that survived a restart.
    pub fn with_store(
        config: MeshConfig,
        node_id: impl Into<String>,
        transport: Arc<dyn PeerTransport>,
        store: Arc<SqliteStore>,
    ) -> Result<Self> {
        let mut agents = HashMap::new();
        for agent in store.load_agents()? {
            agents.insert(agent.id.clone(), agent);
        }
        Ok(Self {
            config,
            node_id: node_id.into(),
            agents: RwLock::new(agents),
            transport,
            store: Some(store),
        })
    }

    fn gate(&self) -> Result<()> {
        if !self.config.enabled {
            return Err(MeshError::NotEnabled {
                component: "agent directory",
            });
        }
        Ok(())
    }

    /// Register an agent, replacing any prior record with the same id.
    pub fn register(&self, agent: Agent) -> Result<()> {
        self.gate()?;
        if let Some(store) = &self.store {
            store.upsert_agent(&agent)?;
        }
        tracing::info!(id = %agent.id, name = %agent.name, "registered agent");
        self.agents.write().insert(agent.id.clone(), agent);
        Ok(())
    }

    /// Look up an agent by id.
    pub fn get(&self, id: &str) -> Option<Agent> {
        self.agents.read().get(id).cloned()
    }

    /// Agents participating in sync, ordered by id.
    pub fn list_enabled(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .read()
            .values()
            .filter(|a| a.enabled)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Number of known agents, enabled or not.
    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Record a successful exchange with an agent.
    pub fn touch(&self, id: &str) {
        let now = Utc::now();
        let mut agents = self.agents.write();
        if let Some(agent) = agents.get_mut(id) {
            agent.last_sync = Some(now);
            if let Some(store) = &self.store {
                if let Err(e) = store.touch_agent(id, now) {
                    tracing::warn!(%id, error = %e, "store write failed");
                }
            }
        }
    }

    /// Query each configured discovery endpoint and register agents not
    /// seen before.
    ///
    /// Endpoints that fail or time out are logged and skipped; no
    /// responders yields an empty list, not an error. Returns only the
    /// newly found agents.
    pub async fn discover_peers(&self) -> Result<Vec<Agent>> {
        self.gate()?;

        let mut queries = Vec::new();
        for endpoint in &self.config.agent_endpoints {
            let message = Message::new(&self.node_id, endpoint, &MessageBody::Discovery)?;
            queries.push(async move {
                let result = self.transport.exchange(endpoint, &message).await;
                (endpoint.clone(), result)
            });
        }

        let mut discovered = Vec::new();
        for (endpoint, result) in futures::future::join_all(queries).await {
            let ack = match result {
                Ok(ack) => ack,
                Err(e) => {
                    tracing::warn!(%endpoint, error = %e, "discovery endpoint unreachable");
                    continue;
                }
            };
            for agent in ack.agents.unwrap_or_default() {
                if agent.id == self.node_id || self.get(&agent.id).is_some() {
                    continue;
                }
                self.register(agent.clone())?;
                discovered.push(agent);
            }
        }
        if !discovered.is_empty() {
            tracing::info!(count = discovered.len(), "discovered new agents");
        }
        Ok(discovered)
    }
}
