//! Tower layer that runs the guard in front of a handler.
//!
//! The layer reads the [`AuthContext`] inserted by the auth middleware, checks
//! the caller against the operation's required levels and, when allowed,
//! inserts a [`GuardContext`] that handlers can extract.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use super::authorizer::{Authorization, AuthorizationGuard, DecisionSource, GuardError};
use super::level::RoleLevel;
use crate::auth::AuthContext;
use crate::error::AgoraError;

// ═══════════════════════════════════════════════════════════════════════════════
// Guard Context (extracted in handlers)
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of a successful role check, available to the guarded handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardContext {
    pub identity: String,
    pub session_code: String,
    pub operation: Arc<str>,
    pub level: RoleLevel,
    pub source: DecisionSource,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for GuardContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<GuardContext>().cloned().ok_or_else(|| {
            let body = serde_json::json!({
                "success": false,
                "error": {
                    "code": "MISSING_GUARD_CONTEXT",
                    "message": "Authorization context not available. Ensure the role guard is applied.",
                }
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Wraps a handler with the role check for `operation`.
///
/// ```rust,ignore
/// let app = Router::new().route(
///     "/users/:identity/role-level",
///     put(assign_role.layer(RequireRoleLayer::new(guard.clone(), "roles.assign"))),
/// );
/// ```
#[derive(Clone)]
pub struct RequireRoleLayer {
    guard: Arc<AuthorizationGuard>,
    operation: Arc<str>,
}

impl RequireRoleLayer {
    pub fn new(guard: Arc<AuthorizationGuard>, operation: &str) -> Self {
        Self {
            guard,
            operation: Arc::from(operation),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl<S> Layer<S> for RequireRoleLayer {
    type Service = RequireRoleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireRoleService {
            inner,
            guard: self.guard.clone(),
            operation: self.operation.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct RequireRoleService<S> {
    inner: S,
    guard: Arc<AuthorizationGuard>,
    operation: Arc<str>,
}

impl<S> Service<Request<Body>> for RequireRoleService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let guard = self.guard.clone();
        let operation = self.operation.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let required = match guard.requirement_for(&operation) {
                Ok(required) => required,
                Err(err) => return Ok(denied(err)),
            };

            // Unrestricted operations need neither credentials nor a lookup.
            let Some(required) = required else {
                return inner.call(request).await;
            };

            let Some(auth) = request.extensions().get::<AuthContext>().cloned() else {
                return Ok(denied(GuardError::InvalidAuthentication));
            };

            let authorization = match guard
                .authorize(Some(required), &auth.identity, &auth.session_code)
                .await
            {
                Ok(authorization) => authorization,
                Err(err) => return Ok(denied(err)),
            };

            if let Authorization::Granted { level, source, .. } = authorization {
                request.extensions_mut().insert(GuardContext {
                    identity: auth.identity,
                    session_code: auth.session_code,
                    operation,
                    level,
                    source,
                });
            }
            inner.call(request).await
        })
    }
}

fn denied(err: GuardError) -> Response {
    AgoraError::from(err).into_response()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
