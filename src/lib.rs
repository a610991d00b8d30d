//! # attestmesh
//!
//! Tamper-evident, cross-repository record of source-control commits,
//! propagated across a mesh of cooperating peer agents.
//!
//! The crate answers two questions for any participant: has this commit
//! been seen and attested by the network, and which agents are currently
//! reachable to exchange attestations with. The [`ledger`] owns commit
//! attestations (content-addressed by SHA-256, append-only, eventually
//! anchored to a backing trust network); the [`mesh`] owns peer
//! discovery, registration, and signed message exchange; the
//! [`scheduler`] drives periodic reconciliation between the two.

pub mod config;
pub mod errors;
pub mod hasher;
pub mod ledger;
pub mod mesh;
pub mod scheduler;
pub mod server;

pub use config::Config;
pub use errors::{MeshError, Result};
pub use ledger::store::SqliteStore;
pub use ledger::{CommitAttestation, CommitLedger, NewCommit, SyncReport};
pub use mesh::bus::MessageBus;
pub use mesh::directory::{Agent, AgentDirectory};
pub use mesh::message::{Message, MessageAck, MessageBody};
pub use mesh::transport::{AnchorStatus, HttpTransport, PeerTransport};
pub use scheduler::SyncScheduler;

/// Crate version, reported by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
