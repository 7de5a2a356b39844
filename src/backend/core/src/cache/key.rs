//! Cache keys for role entries.
//!
//! Both components are SHA-256 digests rendered as lowercase hex, so every
//! key has the same width and the `:` separator can never appear inside a
//! component. Raw identities and session codes never reach the cache.

use sha2::{Digest, Sha256};
use std::fmt;

/// Namespace shared by every role entry.
pub const ROLE_NAMESPACE: &str = "role";

fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Key of the cached role level for one (identity, session code) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleCacheKey {
    identity: String,
    session: String,
}

impl RoleCacheKey {
    pub fn new(identity: &str, session_code: &str) -> Self {
        Self {
            identity: digest(identity),
            session: digest(session_code),
        }
    }

    /// Prefix shared by every session key of `identity`.
    pub fn identity_prefix(identity: &str) -> String {
        format!("{}:{}:", ROLE_NAMESPACE, digest(identity))
    }
}

impl fmt::Display for RoleCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", ROLE_NAMESPACE, self.identity, self.session)
    }
}
