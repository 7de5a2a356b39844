//! Key-value cache used by the authorization guard.
//!
//! ```text
//!   AuthorizationGuard ──► RoleCacheKey ──► dyn CacheBackend
//!                                              ├── InMemoryBackend (DashMap)
//!                                              └── RedisBackend    (ConnectionManager)
//! ```
//!
//! Backends store opaque strings with an optional TTL and support prefix
//! deletion, which the session invalidation hooks rely on.

pub mod backend;
pub mod key;

pub use backend::{CacheBackend, CacheStats, InMemoryBackend, InMemoryConfig, RedisBackend};
pub use key::RoleCacheKey;
