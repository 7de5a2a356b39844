//! API request handlers.
//!
//! Handlers return `Result<impl IntoResponse, AgoraError>` so errors reach the
//! client through the error envelope with their mapped status code.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ApiResponse, AppState};
use crate::auth::AuthContext;
use crate::error::AgoraError;
use crate::guard::{
    Authorization, DecisionSource, GuardContext, GuardError, PredefinedRole, Requirement,
    RoleLevel,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Health and Metrics
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct DependencyHealth {
    status: &'static str,
    backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DependencyHealth {
    fn from_ping(backend: &'static str, result: crate::error::Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                status: "up",
                backend,
                error: None,
            },
            Err(err) => Self {
                status: "down",
                backend,
                error: Some(err.user_message().to_string()),
            },
        }
    }

    fn is_up(&self) -> bool {
        self.error.is_none()
    }
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.guard.cache();
    let store = state.guard.store();
    let (cache_result, store_result) = tokio::join!(cache.ping(), store.ping());

    let cache_health = DependencyHealth::from_ping(cache.name(), cache_result);
    let store_health = DependencyHealth::from_ping(store.name(), store_result);
    let healthy = cache_health.is_up() && store_health.is_up();

    if !healthy {
        warn!(
            cache = cache_health.status,
            store = store_health.status,
            "Health check degraded"
        );
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "checks": {
                "cache": cache_health,
                "store": store_health,
            }
        })),
    )
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "metrics are disabled\n".to_string(),
        ),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct OperationInfo {
    pub operation: String,
    pub requirement: Requirement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_level: Option<RoleLevel>,
}

#[derive(Debug, Serialize)]
pub struct OperationList {
    pub strict: bool,
    pub operations: Vec<OperationInfo>,
}

pub async fn list_operations(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.guard.registry();
    let operations = registry
        .iter()
        .map(|(name, requirement)| OperationInfo {
            operation: name.to_string(),
            minimum_level: requirement.required_levels().map(|levels| levels.minimum()),
            requirement: requirement.clone(),
        })
        .collect();

    Json(ApiResponse::success(OperationList {
        strict: registry.is_strict(),
        operations,
    }))
}

/// Result of a dry-run authorization.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResult {
    pub operation: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_level: Option<RoleLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_level: Option<RoleLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DecisionSource>,
}

/// Run the guard for the caller against `operation` without performing it.
pub async fn check_operation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(operation): Path<String>,
) -> impl IntoResponse {
    let decision = state
        .guard
        .authorize_operation(&operation, &auth.identity, &auth.session_code)
        .await;

    let result = match decision {
        Ok(Authorization::Unrestricted) => CheckResult {
            operation,
            allowed: true,
            reason: None,
            role_level: None,
            required_level: None,
            source: None,
        },
        Ok(Authorization::Granted {
            level,
            required,
            source,
        }) => CheckResult {
            operation,
            allowed: true,
            reason: None,
            role_level: Some(level),
            required_level: Some(required),
            source: Some(source),
        },
        Err(err) => {
            let (role_level, required_level) = match &err {
                GuardError::InsufficientPermissions { required, actual } => {
                    (Some(*actual), Some(*required))
                }
                _ => (None, None),
            };
            CheckResult {
                operation,
                allowed: false,
                reason: Some(err.to_string()),
                role_level,
                required_level,
                source: None,
            }
        }
    };

    Json(ApiResponse::success(result))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Caller
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn me(auth: AuthContext) -> impl IntoResponse {
    Json(ApiResponse::success(serde_json::json!({
        "identity": auth.identity,
        "session_code": auth.session_code,
        "token_id": auth.token_id,
        "expires_at": auth.expires_at,
        "request_id": auth.request_id,
    })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sessions and Roles
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct IssueSessionRequest {
    pub identity: String,
    pub role_level: Option<RoleLevel>,
    pub role: Option<PredefinedRole>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_level: Option<RoleLevel>,
    pub role: Option<PredefinedRole>,
}

fn requested_level(
    role_level: Option<RoleLevel>,
    role: Option<PredefinedRole>,
) -> Result<RoleLevel, AgoraError> {
    match (role_level, role) {
        (Some(level), None) => Ok(level),
        (None, Some(role)) => Ok(role.level()),
        (Some(_), Some(_)) => Err(AgoraError::validation(
            "Specify either role_level or role, not both",
        )),
        (None, None) => Err(AgoraError::validation("role_level or role is required")),
    }
}

/// Callers cannot hand out a level stronger than their own.
fn ensure_can_grant(caller: &GuardContext, level: RoleLevel) -> Result<(), AgoraError> {
    if caller.level.satisfies(level) {
        return Ok(());
    }
    warn!(
        identity = %caller.identity,
        caller_level = %caller.level,
        requested_level = %level,
        "Rejected grant of a stronger role level"
    );
    Err(AgoraError::forbidden(
        "Cannot grant a role level stronger than your own",
    ))
}

/// Callers cannot act on an identity that holds a stronger level than their own.
async fn ensure_can_manage(
    state: &AppState,
    caller: &GuardContext,
    identity: &str,
) -> Result<(), AgoraError> {
    let strongest = state
        .sessions
        .list(identity)
        .await?
        .into_iter()
        .map(|session| session.role_level)
        .min();

    match strongest {
        Some(target_level) if !caller.level.satisfies(target_level) => {
            warn!(
                identity = %caller.identity,
                caller_level = %caller.level,
                target = %identity,
                target_level = %target_level,
                "Rejected change to a stronger identity"
            );
            Err(AgoraError::forbidden(
                "Cannot manage an identity with a stronger role level than your own",
            ))
        }
        _ => Ok(()),
    }
}

pub async fn issue_session(
    State(state): State<AppState>,
    caller: GuardContext,
    Json(req): Json<IssueSessionRequest>,
) -> Result<impl IntoResponse, AgoraError> {
    let level = requested_level(req.role_level, req.role)?;
    ensure_can_grant(&caller, level)?;

    let issued = state.sessions.issue(&req.identity, level).await?;
    info!(
        issued_by = %caller.identity,
        identity = %issued.identity,
        role_level = %level,
        "Session issued through API"
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::success(issued))))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<impl IntoResponse, AgoraError> {
    let sessions = state.sessions.list(&identity).await?;
    Ok(Json(ApiResponse::success(sessions)))
}

pub async fn revoke_session(
    State(state): State<AppState>,
    caller: GuardContext,
    Path((identity, session_code)): Path<(String, String)>,
) -> Result<impl IntoResponse, AgoraError> {
    ensure_can_manage(&state, &caller, &identity).await?;

    if !state.sessions.revoke(&identity, &session_code).await? {
        return Err(AgoraError::not_found("session", session_code));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "identity": identity,
        "session_code": session_code,
        "revoked": true,
    }))))
}

pub async fn revoke_all_sessions(
    State(state): State<AppState>,
    caller: GuardContext,
    Path(identity): Path<String>,
) -> Result<impl IntoResponse, AgoraError> {
    ensure_can_manage(&state, &caller, &identity).await?;

    let revoked = state.sessions.revoke_all(&identity).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "identity": identity,
        "revoked": revoked,
    }))))
}

pub async fn assign_role(
    State(state): State<AppState>,
    caller: GuardContext,
    Path(identity): Path<String>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<impl IntoResponse, AgoraError> {
    let level = requested_level(req.role_level, req.role)?;
    ensure_can_grant(&caller, level)?;
    ensure_can_manage(&state, &caller, &identity).await?;

    let updated = state.sessions.assign_role(&identity, level).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "identity": identity,
        "role_level": level,
        "role": PredefinedRole::from_level(level),
        "sessions_updated": updated,
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::Arc;

    fn caller(level: i32) -> GuardContext {
        GuardContext {
            identity: "root".to_string(),
            session_code: "s".to_string(),
            operation: Arc::from("roles.assign"),
            level: RoleLevel::new(level),
            source: DecisionSource::Cache,
        }
    }

    #[test]
    fn test_requested_level_resolution() {
        assert_eq!(
            requested_level(None, Some(PredefinedRole::Moderator)).unwrap(),
            RoleLevel::new(2)
        );
        assert_eq!(
            requested_level(Some(RoleLevel::new(7)), None).unwrap(),
            RoleLevel::new(7)
        );
        assert_eq!(
            requested_level(None, None).unwrap_err().code(),
            ErrorCode::ValidationError
        );
        assert!(requested_level(Some(RoleLevel::new(1)), Some(PredefinedRole::Admin)).is_err());
    }

    #[test]
    fn test_cannot_grant_stronger_level() {
        assert!(ensure_can_grant(&caller(1), RoleLevel::new(1)).is_ok());
        assert!(ensure_can_grant(&caller(1), RoleLevel::new(4)).is_ok());

        let err = ensure_can_grant(&caller(2), RoleLevel::new(1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }
}
