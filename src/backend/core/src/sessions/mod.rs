//! Session lifecycle and cache invalidation.
//!
//! Every mutation of authorization records goes through [`SessionService`].
//! The store is written first and the affected cache entries are deleted
//! afterwards, so a cached level never outlives the record it was read from
//! by more than one concurrent miss (bounded by the cache TTL).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::error::{AgoraError, Result};
use crate::guard::{
    AuthorizationGuard, AuthorizationRecord, AuthorizationStore, PredefinedRole, RoleLevel,
};

/// A new session and the access token that carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedSession {
    pub identity: String,
    pub session_code: String,
    pub role_level: RoleLevel,
    pub access_token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_code: String,
    pub role_level: RoleLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<PredefinedRole>,
    pub created_at: DateTime<Utc>,
}

impl From<AuthorizationRecord> for SessionSummary {
    fn from(record: AuthorizationRecord) -> Self {
        Self {
            role: PredefinedRole::from_level(record.role_level),
            session_code: record.session_code,
            role_level: record.role_level,
            created_at: record.created_at,
        }
    }
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn AuthorizationStore>,
    guard: Arc<AuthorizationGuard>,
    authenticator: Arc<Authenticator>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn AuthorizationStore>,
        guard: Arc<AuthorizationGuard>,
        authenticator: Arc<Authenticator>,
    ) -> Self {
        Self {
            store,
            guard,
            authenticator,
        }
    }

    /// Create a session for `identity` at `role_level` and sign its token.
    pub async fn issue(&self, identity: &str, role_level: RoleLevel) -> Result<IssuedSession> {
        let identity = validate_identity(identity)?;
        let session_code = Uuid::new_v4().simple().to_string();

        let record = AuthorizationRecord::new(identity, session_code.as_str(), role_level);
        self.store.insert(&record).await?;

        let token = match self.authenticator.issue_token(identity, &session_code) {
            Ok(token) => token,
            Err(err) => {
                if let Err(cleanup) = self.store.delete(identity, &session_code).await {
                    error!(identity = %identity, error = %cleanup, "Failed to remove unsigned session");
                }
                return Err(err.into());
            }
        };

        info!(identity = %identity, role_level = %role_level, "Session issued");
        Ok(IssuedSession {
            identity: identity.to_string(),
            session_code,
            role_level,
            access_token: token.token,
            token_id: token.token_id,
            expires_at: token.expires_at,
        })
    }

    /// Delete one session. Returns whether it existed.
    ///
    /// The cache entry is deleted even when the record was already gone, so
    /// retrying after a cache failure completes the revocation.
    pub async fn revoke(&self, identity: &str, session_code: &str) -> Result<bool> {
        let deleted = self.store.delete(identity, session_code).await?;

        self.guard
            .invalidate_session(identity, session_code)
            .await
            .map_err(|err| invalidation_failed(identity, err))?;

        if deleted {
            info!(identity = %identity, "Session revoked");
        }
        Ok(deleted)
    }

    /// Delete every session of `identity`.
    pub async fn revoke_all(&self, identity: &str) -> Result<u64> {
        let deleted = self.store.delete_for_identity(identity).await?;

        self.guard
            .invalidate_identity(identity)
            .await
            .map_err(|err| invalidation_failed(identity, err))?;

        info!(identity = %identity, sessions = deleted, "All sessions revoked");
        Ok(deleted)
    }

    /// Change the role level on every session of `identity`.
    pub async fn assign_role(&self, identity: &str, role_level: RoleLevel) -> Result<u64> {
        let updated = self.store.update_role_level(identity, role_level).await?;
        if updated == 0 {
            return Err(AgoraError::not_found("identity", identity));
        }

        self.guard
            .invalidate_identity(identity)
            .await
            .map_err(|err| invalidation_failed(identity, err))?;

        info!(identity = %identity, role_level = %role_level, sessions = updated, "Role level assigned");
        Ok(updated)
    }

    pub async fn list(&self, identity: &str) -> Result<Vec<SessionSummary>> {
        let records = self.store.list_for_identity(identity).await?;
        Ok(records.into_iter().map(SessionSummary::from).collect())
    }

    /// Issue a session for `identity` unless it already has one.
    pub async fn ensure_bootstrap_session(
        &self,
        identity: &str,
        role_level: RoleLevel,
    ) -> Result<Option<IssuedSession>> {
        if !self.store.list_for_identity(identity).await?.is_empty() {
            return Ok(None);
        }
        self.issue(identity, role_level).await.map(Some)
    }
}

fn validate_identity(identity: &str) -> Result<&str> {
    let trimmed = identity.trim();
    if trimmed.is_empty() {
        return Err(AgoraError::validation("identity must not be empty"));
    }
    if trimmed.len() != identity.len() {
        return Err(AgoraError::validation(
            "identity must not have surrounding whitespace",
        ));
    }
    Ok(identity)
}

fn invalidation_failed(identity: &str, err: AgoraError) -> AgoraError {
    warn!(
        identity = %identity,
        error = %err,
        "Store updated but cached role levels could not be invalidated"
    );
    err.with_context("identity", identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use crate::cache::InMemoryBackend;
    use crate::error::ErrorCode;
    use crate::guard::{GuardSettings, InMemoryAuthorizationStore, OperationRegistry};

    fn service() -> SessionService {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let guard = Arc::new(AuthorizationGuard::new(
            Arc::new(InMemoryBackend::default()),
            store.clone(),
            Arc::new(OperationRegistry::default()),
            GuardSettings::default(),
        ));
        let authenticator = Arc::new(
            Authenticator::new(AuthConfig::builder().jwt_secret("test-secret").build()).unwrap(),
        );
        SessionService::new(store, guard, authenticator)
    }

    #[tokio::test]
    async fn test_issue_creates_record_and_token() {
        let sessions = service();
        let issued = sessions.issue("alice", RoleLevel::new(3)).await.unwrap();

        assert_eq!(issued.session_code.len(), 32);
        assert!(!issued.access_token.is_empty());

        let listed = sessions.list("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_code, issued.session_code);
        assert_eq!(listed[0].role, Some(PredefinedRole::Member));
    }

    #[tokio::test]
    async fn test_issue_rejects_blank_identity() {
        let err = service().issue("  ", RoleLevel::new(3)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_assign_role_requires_sessions() {
        let err = service()
            .assign_role("ghost", RoleLevel::new(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RecordNotFound);
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let sessions = service();
        let issued = sessions.issue("bob", RoleLevel::new(2)).await.unwrap();

        assert!(sessions.revoke("bob", &issued.session_code).await.unwrap());
        assert!(!sessions.revoke("bob", &issued.session_code).await.unwrap());
        assert!(sessions.list("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_session_only_once() {
        let sessions = service();
        assert!(sessions
            .ensure_bootstrap_session("root", RoleLevel::new(1))
            .await
            .unwrap()
            .is_some());
        assert!(sessions
            .ensure_bootstrap_session("root", RoleLevel::new(1))
            .await
            .unwrap()
            .is_none());
    }
}
