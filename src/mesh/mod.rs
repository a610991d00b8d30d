//! Agent mesh: peer directory, signed message exchange, and transport.
//!
//! The mesh carries the ledger's cross-repository sync: attestation
//! summaries ride on bus messages, and discovery/pull replies travel in
//! the acknowledgement envelope so the inbound message endpoint stays the
//! single process-boundary operation.

pub mod bus;
pub mod directory;
pub mod message;
pub mod transport;

pub use bus::MessageBus;
pub use directory::{Agent, AgentDirectory};
pub use message::{Message, MessageAck, MessageBody};
pub use transport::{AnchorStatus, HttpTransport, PeerTransport};
