//! HTTP API for Agora.
//!
//! - `GET /health`, `GET /metrics`: unauthenticated
//! - `/api/v1/*`: bearer token required (except the public paths configured
//!   on the [`Authenticator`]); administrative routes are gated per operation
//!   by [`RequireRoleLayer`]

mod handlers;
pub mod operations;

use axum::{
    handler::Handler,
    routing::{delete, get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{AuthLayer, Authenticator};
use crate::guard::{AuthorizationGuard, RequireRoleLayer};
use crate::sessions::SessionService;

pub use operations::platform_registry;

/// Paths under `/api/v1` reachable without a token.
pub const PUBLIC_PATHS: &[&str] = &["/api/v1/operations"];

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<AuthorizationGuard>,
    pub sessions: Arc<SessionService>,
    pub authenticator: Arc<Authenticator>,
    /// Present when the Prometheus recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router.
///
/// ```rust,ignore
/// let state = AppState { guard, sessions, authenticator, metrics };
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let guard = state.guard.clone();
    let gate = |operation: &str| RequireRoleLayer::new(guard.clone(), operation);

    let v1 = Router::new()
        .route("/operations", get(handlers::list_operations))
        .route("/operations/:operation/check", post(handlers::check_operation))
        .route("/me", get(handlers::me))
        .route(
            "/sessions",
            post(handlers::issue_session.layer(gate(operations::SESSIONS_ISSUE))),
        )
        .route(
            "/users/:identity/sessions",
            get(handlers::list_sessions.layer(gate(operations::SESSIONS_LIST))).delete(
                handlers::revoke_all_sessions.layer(gate(operations::SESSIONS_REVOKE_ALL)),
            ),
        )
        .route(
            "/users/:identity/sessions/:session_code",
            delete(handlers::revoke_session.layer(gate(operations::SESSIONS_REVOKE))),
        )
        .route(
            "/users/:identity/role-level",
            put(handlers::assign_role.layer(gate(operations::ROLES_ASSIGN))),
        )
        .layer(AuthLayer::new(state.authenticator.clone()));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest("/api/v1", v1)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Success envelope; errors use `ErrorResponse` from the error module.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
