//! Role-level authorization with a cache-backed lookup.
//!
//! - **Levels**: integer tiers where lower is more privileged
//! - **Registry**: operation name to required levels, built at startup
//! - **Store**: authoritative `(identity, session_code) -> role_level` records
//! - **Guard**: cache-first lookup with store fallback and write-through
//! - **Middleware**: per-route tower layer that runs the guard
//!
//! ```text
//!  request ──► AuthLayer ──► RequireRoleLayer("posts.delete")
//!                                 │
//!                                 ▼
//!                       AuthorizationGuard::authorize
//!                          │ hit          │ miss
//!                          ▼              ▼
//!                     CacheBackend   AuthorizationStore ──► CacheBackend::set
//! ```

pub mod authorizer;
pub mod level;
pub mod middleware;
pub mod registry;
pub mod roles;
pub mod store;

pub use authorizer::{
    Authorization, AuthorizationGuard, CacheFailurePolicy, DecisionSource, Dependency,
    GuardError, GuardSettings,
};
pub use level::{ParseRoleLevelError, RequiredLevels, RoleLevel};
pub use middleware::{GuardContext, RequireRoleLayer, RequireRoleService};
pub use registry::{OperationRegistry, OperationRegistryBuilder, Requirement};
pub use roles::PredefinedRole;
pub use store::{AuthorizationRecord, AuthorizationStore, InMemoryAuthorizationStore};
