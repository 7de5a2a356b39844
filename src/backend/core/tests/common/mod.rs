//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agora_core::auth::{AuthConfig, Authenticator};
use agora_core::cache::{CacheBackend, CacheStats, InMemoryBackend};
use agora_core::error::{AgoraError, ErrorCode, Result};
use agora_core::guard::{
    AuthorizationGuard, AuthorizationRecord, AuthorizationStore, GuardSettings,
    InMemoryAuthorizationStore, OperationRegistry, RoleLevel,
};
use async_trait::async_trait;

pub const JWT_SECRET: &str = "integration-test-secret";

// ============================================================================
// Counting store
// ============================================================================

/// In-memory store that counts lookups and can be switched off.
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryAuthorizationStore,
    find_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_records(records: &[(&str, &str, i32)]) -> Arc<Self> {
        let store = Arc::new(Self::new());
        for (identity, session, level) in records {
            store
                .insert(&AuthorizationRecord::new(*identity, *session, *level))
                .await
                .unwrap();
        }
        store
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AgoraError::new(
                ErrorCode::DatabaseConnectionFailed,
                "store is down",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthorizationStore for CountingStore {
    async fn find_one(
        &self,
        identity: &str,
        session_code: &str,
    ) -> Result<Option<AuthorizationRecord>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.find_one(identity, session_code).await
    }

    async fn insert(&self, record: &AuthorizationRecord) -> Result<()> {
        self.check()?;
        self.inner.insert(record).await
    }

    async fn delete(&self, identity: &str, session_code: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(identity, session_code).await
    }

    async fn delete_for_identity(&self, identity: &str) -> Result<u64> {
        self.check()?;
        self.inner.delete_for_identity(identity).await
    }

    async fn update_role_level(&self, identity: &str, level: RoleLevel) -> Result<u64> {
        self.check()?;
        self.inner.update_role_level(identity, level).await
    }

    async fn list_for_identity(&self, identity: &str) -> Result<Vec<AuthorizationRecord>> {
        self.check()?;
        self.inner.list_for_identity(identity).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

// ============================================================================
// Flaky cache
// ============================================================================

/// In-memory cache whose reads, writes and deletes can fail on demand.
#[derive(Default)]
pub struct FlakyCache {
    inner: InMemoryBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn unavailable() -> AgoraError {
        AgoraError::new(ErrorCode::CacheConnectionFailed, "cache is down")
    }
}

#[async_trait]
impl CacheBackend for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.delete(key).await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.delete_by_prefix(prefix).await
    }

    async fn ping(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        self.inner.stats().await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn registry() -> OperationRegistry {
    OperationRegistry::builder()
        .public("operations.list")
        .require("posts.create", [3])
        .require("posts.delete", [2])
        .require("roles.assign", [1])
        .require("reports.review", [3, 1, 5])
        .build()
}

pub fn guard(
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn AuthorizationStore>,
    settings: GuardSettings,
) -> Arc<AuthorizationGuard> {
    Arc::new(AuthorizationGuard::new(
        cache,
        store,
        Arc::new(registry()),
        settings,
    ))
}

pub fn authenticator() -> Arc<Authenticator> {
    Arc::new(
        Authenticator::new(
            AuthConfig::builder()
                .jwt_secret(JWT_SECRET)
                .add_public_path("/api/v1/operations")
                .build(),
        )
        .unwrap(),
    )
}
