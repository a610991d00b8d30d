//! Durable store for attestations and the agent directory.
//!
//! SQLite-backed. The ledger and directory reload from the store at
//! construction so both collections survive process restarts; every
//! mutation writes through. Only the logical schema lives here — the
//! in-memory collections remain the source of truth while the process
//! runs.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::errors::Result;
use crate::ledger::CommitAttestation;
use crate::mesh::directory::Agent;

/// SQLite-backed durable store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store. Used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS attestations (
                digest          TEXT PRIMARY KEY,
                timestamp       TEXT NOT NULL,
                author          TEXT NOT NULL,
                message         TEXT NOT NULL,
                external_anchor TEXT,
                verified        INTEGER NOT NULL DEFAULT 0,
                confirmations   INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS agents (
                id             TEXT PRIMARY KEY,
                name           TEXT NOT NULL,
                repository_url TEXT NOT NULL,
                endpoint       TEXT NOT NULL,
                protocol       TEXT NOT NULL,
                enabled        INTEGER NOT NULL DEFAULT 1,
                last_sync      TEXT
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or update one attestation.
    pub fn upsert_attestation(&self, attestation: &CommitAttestation) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO attestations
                 (digest, timestamp, author, message, external_anchor, verified, confirmations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(digest) DO UPDATE SET
                 external_anchor = excluded.external_anchor,
                 verified        = excluded.verified,
                 confirmations   = excluded.confirmations",
            params![
                attestation.digest,
                attestation.timestamp.to_rfc3339(),
                attestation.author,
                attestation.message,
                attestation.external_anchor,
                attestation.verified,
                attestation.confirmations,
            ],
        )?;
        Ok(())
    }

    /// Load all attestations in recording order (oldest first).
    pub fn load_attestations(&self) -> Result<Vec<CommitAttestation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT digest, timestamp, author, message, external_anchor, verified, confirmations
             FROM attestations ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CommitAttestation {
                digest: row.get(0)?,
                timestamp: parse_timestamp(row.get::<_, String>(1)?),
                author: row.get(2)?,
                message: row.get(3)?,
                external_anchor: row.get(4)?,
                verified: row.get(5)?,
                confirmations: row.get(6)?,
            })
        })?;
        let mut attestations = Vec::new();
        for row in rows {
            attestations.push(row?);
        }
        Ok(attestations)
    }

    /// Insert or replace one agent record.
    pub fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO agents
                 (id, name, repository_url, endpoint, protocol, enabled, last_sync)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                agent.id,
                agent.name,
                agent.repository_url,
                agent.endpoint,
                agent.protocol,
                agent.enabled,
                agent.last_sync.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Load all agent records.
    pub fn load_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, repository_url, endpoint, protocol, enabled, last_sync
             FROM agents ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Agent {
                id: row.get(0)?,
                name: row.get(1)?,
                repository_url: row.get(2)?,
                endpoint: row.get(3)?,
                protocol: row.get(4)?,
                enabled: row.get(5)?,
                last_sync: row
                    .get::<_, Option<String>>(6)?
                    .map(parse_timestamp),
            })
        })?;
        let mut agents = Vec::new();
        for row in rows {
            agents.push(row?);
        }
        Ok(agents)
    }

    /// Update an agent's `last_sync` column.
    pub fn touch_agent(&self, id: &str, last_sync: DateTime<Utc>) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE agents SET last_sync = ?2 WHERE id = ?1",
            params![id, last_sync.to_rfc3339()],
        )?;
        Ok(())
    }
}

// Timestamps were written by us as RFC 3339; a row that no longer parses
// means the store file was edited out-of-band. Fall back to epoch rather
// than dropping the record.
fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}
