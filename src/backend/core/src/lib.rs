#![allow(clippy::result_large_err)]
//! # Agora Core
//!
//! Role-level authorization service for the Agora community platform.
//!
//! ## Architecture
//!
//! - **Guard**: cache-first role lookup with authoritative store fallback
//! - **Cache**: in-memory and Redis backends for cached role levels
//! - **Store**: PostgreSQL authorization records
//! - **Sessions**: session issuance, revocation and role changes, with cache invalidation
//! - **Auth**: bearer token authentication producing the request identity
//! - **API**: REST endpoints for session administration and dry-run checks
//! - **Observability**: structured logging and Prometheus metrics

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod observability;
pub mod sessions;

pub use error::{AgoraError, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::auth::{AuthConfig, AuthContext, AuthError, AuthLayer, Authenticator, Claims};
    pub use crate::cache::{CacheBackend, CacheStats, InMemoryBackend, RedisBackend, RoleCacheKey};
    pub use crate::config::Config;
    pub use crate::error::{AgoraError, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result};
    pub use crate::guard::{
        Authorization, AuthorizationGuard, AuthorizationRecord, AuthorizationStore,
        CacheFailurePolicy, DecisionSource, GuardContext, GuardError, GuardSettings,
        InMemoryAuthorizationStore, OperationRegistry, PredefinedRole, RequireRoleLayer,
        RequiredLevels, RoleLevel,
    };
    pub use crate::sessions::{IssuedSession, SessionService, SessionSummary};
}
