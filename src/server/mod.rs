//! HTTP surface of the mesh.
//!
//! Exposes the inbound message endpoint — the only mesh operation that
//! crosses the process boundary — plus a liveness probe.
//!
//! # Endpoints
//!
//! - `GET  /health`       — Liveness probe
//! - `POST /mesh/message` — Inbound agent message

pub mod routes;

pub use routes::{app_router, AppState};
