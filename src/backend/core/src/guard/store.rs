//! Authoritative authorization records.
//!
//! The guard only ever calls [`AuthorizationStore::find_one`]. The mutating
//! methods are used by the session service, which fires the matching cache
//! invalidation after each write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::level::RoleLevel;
use crate::error::{AgoraError, ErrorCode, ErrorDetails, Result};

/// One (identity, session code) pair and the role level it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub identity: String,
    pub session_code: String,
    pub role_level: RoleLevel,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationRecord {
    pub fn new(
        identity: impl Into<String>,
        session_code: impl Into<String>,
        role_level: impl Into<RoleLevel>,
    ) -> Self {
        Self {
            identity: identity.into(),
            session_code: session_code.into(),
            role_level: role_level.into(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Exact lookup on both fields.
    async fn find_one(&self, identity: &str, session_code: &str)
        -> Result<Option<AuthorizationRecord>>;

    /// Insert a new record. Fails with `DuplicateRecord` when the pair exists.
    async fn insert(&self, record: &AuthorizationRecord) -> Result<()>;

    /// Returns whether a record was deleted.
    async fn delete(&self, identity: &str, session_code: &str) -> Result<bool>;

    /// Delete every record of `identity`.
    async fn delete_for_identity(&self, identity: &str) -> Result<u64>;

    /// Rewrite the level on every record of `identity`.
    async fn update_role_level(&self, identity: &str, level: RoleLevel) -> Result<u64>;

    /// Records of `identity`, oldest first.
    async fn list_for_identity(&self, identity: &str) -> Result<Vec<AuthorizationRecord>>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

fn duplicate(identity: &str, session_code: &str) -> AgoraError {
    AgoraError::new(
        ErrorCode::DuplicateRecord,
        "A record with this identifier already exists",
    )
    .with_details(
        ErrorDetails::new()
            .with_entity("session", session_code)
            .with_context("identity", identity),
    )
}

/// Process-local store for tests and single-node development runs.
#[derive(Default)]
pub struct InMemoryAuthorizationStore {
    records: DashMap<(String, String), AuthorizationRecord>,
}

impl InMemoryAuthorizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AuthorizationStore for InMemoryAuthorizationStore {
    async fn find_one(
        &self,
        identity: &str,
        session_code: &str,
    ) -> Result<Option<AuthorizationRecord>> {
        Ok(self
            .records
            .get(&(identity.to_string(), session_code.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn insert(&self, record: &AuthorizationRecord) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        let key = (record.identity.clone(), record.session_code.clone());
        match self.records.entry(key) {
            Entry::Occupied(_) => Err(duplicate(&record.identity, &record.session_code)),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn delete(&self, identity: &str, session_code: &str) -> Result<bool> {
        Ok(self
            .records
            .remove(&(identity.to_string(), session_code.to_string()))
            .is_some())
    }

    async fn delete_for_identity(&self, identity: &str) -> Result<u64> {
        let before = self.records.len();
        self.records.retain(|(id, _), _| id != identity);
        Ok(before.saturating_sub(self.records.len()) as u64)
    }

    async fn update_role_level(&self, identity: &str, level: RoleLevel) -> Result<u64> {
        let mut updated = 0u64;
        for mut entry in self.records.iter_mut() {
            if entry.key().0 == identity {
                entry.value_mut().role_level = level;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn list_for_identity(&self, identity: &str) -> Result<Vec<AuthorizationRecord>> {
        let mut records: Vec<AuthorizationRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == identity)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_code.cmp(&b.session_code))
        });
        Ok(records)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
