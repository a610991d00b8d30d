//! Content addressing for commit attestations.
//!
//! A commit's digest is the SHA-256 hash of its `(timestamp, author,
//! message)` triple. The digest is a pure function of the triple: the
//! same inputs always produce the same 64-character hex string, which is
//! what makes recording idempotent.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Compute the content digest for a commit.
///
/// Hashes `"{rfc3339 timestamp}:{author}:{message}"` with SHA-256 and
/// returns the lowercase hex encoding. Never fails; empty strings are
/// valid input.
pub fn commit_digest(timestamp: &DateTime<Utc>, author: &str, message: &str) -> String {
    let source = format!("{}:{}:{}", timestamp.to_rfc3339(), author, message);
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}
