//! The authorization cache guard.
//!
//! For a request carrying `(identity, session_code)` and an operation with a
//! set of required levels, the guard:
//!
//! 1. allows immediately when the operation has no requirement;
//! 2. takes the minimum of the required levels;
//! 3. reads the caller's level from the cache, falling back to the
//!    authoritative store on a miss and writing the result back with a TTL;
//! 4. denies when the level is numerically greater than the minimum.
//!
//! A cached level is trusted until it expires or is invalidated. Session
//! revocation and role changes go through `SessionService`, which deletes the
//! affected entries after mutating the store.

use axum::http::StatusCode;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use super::level::{RequiredLevels, RoleLevel};
use super::registry::OperationRegistry;
use super::store::AuthorizationStore;
use crate::cache::{CacheBackend, RoleCacheKey};
use crate::config::GuardConfig;

// ═══════════════════════════════════════════════════════════════════════════════
// Policy and Outcomes
// ═══════════════════════════════════════════════════════════════════════════════

/// What to do when the cache cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFailurePolicy {
    /// Deny with `DependencyUnavailable`.
    #[default]
    FailClosed,
    /// Decide from the authoritative store alone.
    BypassCache,
}

/// Where the effective role level came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Cache,
    Store,
}

impl DecisionSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Store => "store",
        }
    }
}

/// Successful authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// The operation declares no requirement.
    Unrestricted,
    Granted {
        level: RoleLevel,
        required: RoleLevel,
        source: DecisionSource,
    },
}

impl Authorization {
    pub fn level(&self) -> Option<RoleLevel> {
        match self {
            Self::Unrestricted => None,
            Self::Granted { level, .. } => Some(*level),
        }
    }

    pub fn source(&self) -> Option<DecisionSource> {
        match self {
            Self::Unrestricted => None,
            Self::Granted { source, .. } => Some(*source),
        }
    }
}

/// Collaborator that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Cache,
    Store,
}

impl Dependency {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was denied.
#[derive(Debug, Error)]
pub enum GuardError {
    /// No authoritative record for the (identity, session code) pair.
    #[error("invalid authentication")]
    InvalidAuthentication,

    #[error("insufficient permissions")]
    InsufficientPermissions { required: RoleLevel, actual: RoleLevel },

    #[error("authorization {dependency} unavailable")]
    DependencyUnavailable {
        dependency: Dependency,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Only raised by strict registries.
    #[error("operation not registered: {0}")]
    UnknownOperation(String),
}

impl GuardError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidAuthentication => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions { .. } | Self::UnknownOperation(_) => {
                StatusCode::FORBIDDEN
            }
            Self::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Metric label for this denial.
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::InvalidAuthentication => "invalid_authentication",
            Self::InsufficientPermissions { .. } => "insufficient_permissions",
            Self::DependencyUnavailable { .. } => "dependency_unavailable",
            Self::UnknownOperation(_) => "unknown_operation",
        }
    }

    fn unavailable<E>(dependency: Dependency, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::DependencyUnavailable {
            dependency,
            source: Box::new(source),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Guard
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct GuardSettings {
    /// `None` keeps cached levels until they are invalidated.
    pub role_cache_ttl: Option<Duration>,
    pub cache_failure_policy: CacheFailurePolicy,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            role_cache_ttl: Some(Duration::from_secs(300)),
            cache_failure_policy: CacheFailurePolicy::FailClosed,
        }
    }
}

impl From<&GuardConfig> for GuardSettings {
    fn from(config: &GuardConfig) -> Self {
        Self {
            role_cache_ttl: config.role_cache_ttl,
            cache_failure_policy: config.cache_failure_policy,
        }
    }
}

enum CacheLookup {
    Hit(RoleLevel),
    Miss,
    /// Read failed and the policy allows continuing without the cache.
    Bypassed,
}

/// Cache-backed role level check. Cheap to clone.
#[derive(Clone)]
pub struct AuthorizationGuard {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn AuthorizationStore>,
    registry: Arc<OperationRegistry>,
    settings: GuardSettings,
}

impl AuthorizationGuard {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn AuthorizationStore>,
        registry: Arc<OperationRegistry>,
        settings: GuardSettings,
    ) -> Self {
        Self {
            cache,
            store,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn AuthorizationStore> {
        &self.store
    }

    /// Decide whether the caller meets `required_levels`.
    pub async fn authorize(
        &self,
        required_levels: Option<&RequiredLevels>,
        identity: &str,
        session_code: &str,
    ) -> Result<Authorization, GuardError> {
        let started = Instant::now();
        let result = self.decide(required_levels, identity, session_code).await;

        let outcome = match &result {
            Ok(Authorization::Unrestricted) => "unrestricted",
            Ok(Authorization::Granted { .. }) => "granted",
            Err(err) => err.outcome(),
        };
        counter!("agora_guard_decisions_total", "outcome" => outcome).increment(1);
        histogram!("agora_guard_decision_seconds").record(started.elapsed().as_secs_f64());

        result
    }

    /// Resolve `operation` in the registry, then [`authorize`](Self::authorize).
    pub async fn authorize_operation(
        &self,
        operation: &str,
        identity: &str,
        session_code: &str,
    ) -> Result<Authorization, GuardError> {
        let required = match self.requirement_for(operation) {
            Ok(required) => required,
            Err(err) => {
                counter!("agora_guard_decisions_total", "outcome" => err.outcome()).increment(1);
                return Err(err);
            }
        };
        self.authorize(required, identity, session_code).await
    }

    /// Levels required by `operation`. Unregistered operations have none
    /// unless the registry is strict.
    pub fn requirement_for(&self, operation: &str) -> Result<Option<&RequiredLevels>, GuardError> {
        match self.registry.lookup(operation) {
            Some(requirement) => Ok(requirement.required_levels()),
            None if self.registry.is_strict() => {
                warn!(operation = %operation, "Rejected unregistered operation");
                Err(GuardError::UnknownOperation(operation.to_string()))
            }
            None => Ok(None),
        }
    }

    /// Drop the cached level of one session.
    pub async fn invalidate_session(
        &self,
        identity: &str,
        session_code: &str,
    ) -> crate::error::Result<bool> {
        let key = RoleCacheKey::new(identity, session_code).to_string();
        let removed = self.cache.delete(&key).await?;
        debug!(identity = %identity, removed, "Invalidated cached role level");
        Ok(removed)
    }

    /// Drop the cached levels of every session of `identity`.
    pub async fn invalidate_identity(&self, identity: &str) -> crate::error::Result<u64> {
        let prefix = RoleCacheKey::identity_prefix(identity);
        let removed = self.cache.delete_by_prefix(&prefix).await?;
        debug!(identity = %identity, removed, "Invalidated cached role levels");
        Ok(removed)
    }

    async fn decide(
        &self,
        required_levels: Option<&RequiredLevels>,
        identity: &str,
        session_code: &str,
    ) -> Result<Authorization, GuardError> {
        let Some(required_levels) = required_levels else {
            return Ok(Authorization::Unrestricted);
        };
        let required = required_levels.minimum();
        let key = RoleCacheKey::new(identity, session_code).to_string();

        let (level, source) = match self.read_cache(&key, identity).await? {
            CacheLookup::Hit(level) => (level, DecisionSource::Cache),
            CacheLookup::Miss => {
                let level = self.load_level(identity, session_code).await?;
                self.populate(&key, identity, level).await;
                (level, DecisionSource::Store)
            }
            CacheLookup::Bypassed => {
                (self.load_level(identity, session_code).await?, DecisionSource::Store)
            }
        };

        if !level.satisfies(required) {
            warn!(
                identity = %identity,
                role_level = %level,
                required_level = %required,
                source = source.as_str(),
                "Insufficient permissions"
            );
            return Err(GuardError::InsufficientPermissions {
                required,
                actual: level,
            });
        }

        Ok(Authorization::Granted {
            level,
            required,
            source,
        })
    }

    async fn read_cache(&self, key: &str, identity: &str) -> Result<CacheLookup, GuardError> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match raw.parse::<RoleLevel>() {
                Ok(level) => {
                    counter!("agora_guard_cache_lookups_total", "result" => "hit").increment(1);
                    debug!(identity = %identity, role_level = %level, "Role level cache hit");
                    Ok(CacheLookup::Hit(level))
                }
                Err(err) => {
                    counter!("agora_guard_cache_lookups_total", "result" => "corrupt").increment(1);
                    warn!(identity = %identity, error = %err, "Ignoring unparsable cached role level");
                    Ok(CacheLookup::Miss)
                }
            },
            Ok(None) => {
                counter!("agora_guard_cache_lookups_total", "result" => "miss").increment(1);
                debug!(identity = %identity, "Role level cache miss");
                Ok(CacheLookup::Miss)
            }
            Err(err) => {
                counter!("agora_guard_cache_lookups_total", "result" => "error").increment(1);
                match self.settings.cache_failure_policy {
                    CacheFailurePolicy::FailClosed => {
                        warn!(
                            backend = self.cache.name(),
                            error = %err,
                            "Role cache unavailable, denying request"
                        );
                        Err(GuardError::unavailable(Dependency::Cache, err))
                    }
                    CacheFailurePolicy::BypassCache => {
                        warn!(
                            backend = self.cache.name(),
                            error = %err,
                            "Role cache unavailable, reading store directly"
                        );
                        Ok(CacheLookup::Bypassed)
                    }
                }
            }
        }
    }

    async fn load_level(&self, identity: &str, session_code: &str) -> Result<RoleLevel, GuardError> {
        let record = self
            .store
            .find_one(identity, session_code)
            .await
            .map_err(|err| {
                warn!(store = self.store.name(), error = %err, "Authorization store unavailable");
                GuardError::unavailable(Dependency::Store, err)
            })?;

        match record {
            Some(record) => Ok(record.role_level),
            None => {
                warn!(identity = %identity, "No authorization record for session");
                Err(GuardError::InvalidAuthentication)
            }
        }
    }

    /// Write-through after a store read. A failed write leaves the decision
    /// unchanged.
    async fn populate(&self, key: &str, identity: &str, level: RoleLevel) {
        let value = level.to_string();
        if let Err(err) = self
            .cache
            .set(key, &value, self.settings.role_cache_ttl)
            .await
        {
            warn!(
                backend = self.cache.name(),
                identity = %identity,
                error = %err,
                "Failed to cache role level"
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
