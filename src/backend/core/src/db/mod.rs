//! Database layer for Agora.
//!
//! PostgreSQL through sqlx. The `authorization_records` table is the
//! authoritative source of role levels.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{AgoraError, ErrorCode, ErrorContext, ErrorDetails, Result};
use crate::guard::{AuthorizationRecord, AuthorizationStore, RoleLevel};

/// Database connection and operations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");
        let start = Instant::now();
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .inspect_err(|e| error!(error = %e, "Database migration failed"))
            .error_code(ErrorCode::DatabaseError, "Database migration failed")?;
        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "Database migrations completed"
        );
        Ok(())
    }

    /// Round-trip a trivial query and report its latency.
    pub async fn check_connectivity(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        let latency = start.elapsed();
        if latency > Duration::from_millis(100) {
            warn!(
                latency_ms = latency.as_millis() as u64,
                "Database connectivity check latency is high"
            );
        }
        Ok(latency)
    }
}

fn record_query(query: &'static str, started: Instant) {
    histogram!("agora_store_query_seconds", "query" => query)
        .record(started.elapsed().as_secs_f64());
}

#[async_trait]
impl AuthorizationStore for Database {
    async fn find_one(
        &self,
        identity: &str,
        session_code: &str,
    ) -> Result<Option<AuthorizationRecord>> {
        let started = Instant::now();
        let row = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            SELECT identity, session_code, role_level, created_at
            FROM authorization_records
            WHERE identity = $1 AND session_code = $2
            "#,
        )
        .bind(identity)
        .bind(session_code)
        .fetch_optional(&self.pool)
        .await?;
        record_query("find_one", started);

        Ok(row.map(Into::into))
    }

    async fn insert(&self, record: &AuthorizationRecord) -> Result<()> {
        let started = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO authorization_records (identity, session_code, role_level, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (identity, session_code) DO NOTHING
            "#,
        )
        .bind(&record.identity)
        .bind(&record.session_code)
        .bind(record.role_level.value())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        record_query("insert", started);

        if result.rows_affected() == 0 {
            return Err(AgoraError::new(
                ErrorCode::DuplicateRecord,
                "A record with this identifier already exists",
            )
            .with_details(
                ErrorDetails::new()
                    .with_entity("session", &record.session_code)
                    .with_context("identity", &record.identity),
            ));
        }
        Ok(())
    }

    async fn delete(&self, identity: &str, session_code: &str) -> Result<bool> {
        let started = Instant::now();
        let result = sqlx::query(
            "DELETE FROM authorization_records WHERE identity = $1 AND session_code = $2",
        )
        .bind(identity)
        .bind(session_code)
        .execute(&self.pool)
        .await?;
        record_query("delete", started);

        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_identity(&self, identity: &str) -> Result<u64> {
        let started = Instant::now();
        let result = sqlx::query("DELETE FROM authorization_records WHERE identity = $1")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        record_query("delete_for_identity", started);

        Ok(result.rows_affected())
    }

    async fn update_role_level(&self, identity: &str, level: RoleLevel) -> Result<u64> {
        let started = Instant::now();
        let result = sqlx::query(
            "UPDATE authorization_records SET role_level = $2 WHERE identity = $1",
        )
        .bind(identity)
        .bind(level.value())
        .execute(&self.pool)
        .await?;
        record_query("update_role_level", started);

        Ok(result.rows_affected())
    }

    async fn list_for_identity(&self, identity: &str) -> Result<Vec<AuthorizationRecord>> {
        let started = Instant::now();
        let rows = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            SELECT identity, session_code, role_level, created_at
            FROM authorization_records
            WHERE identity = $1
            ORDER BY created_at, session_code
            "#,
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;
        record_query("list_for_identity", started);

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check_connectivity().await.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
pub struct AuthorizationRow {
    pub identity: String,
    pub session_code: String,
    pub role_level: i32,
    pub created_at: DateTime<Utc>,
}

impl From<AuthorizationRow> for AuthorizationRecord {
    fn from(row: AuthorizationRow) -> Self {
        Self {
            identity: row.identity,
            session_code: row.session_code,
            role_level: RoleLevel::new(row.role_level),
            created_at: row.created_at,
        }
    }
}
