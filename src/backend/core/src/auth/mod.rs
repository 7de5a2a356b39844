//! Bearer-token authentication.
//!
//! Access tokens are HMAC-signed JWTs whose `sub` claim is the identity and
//! whose `sid` claim is the session code. [`AuthLayer`] validates the token
//! and inserts an [`AuthContext`] into the request extensions. It does not
//! look at role levels; that is the guard's job.
//!
//! ```rust,ignore
//! let authenticator = Arc::new(Authenticator::new(AuthConfig::builder()
//!     .jwt_secret("secret")
//!     .add_public_path("/api/v1/operations")
//!     .build())?);
//!
//! let api = Router::new()
//!     .route("/me", get(me))
//!     .layer(AuthLayer::new(authenticator));
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, OriginalUri, Request},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tower::{Layer, Service};
use tracing::debug;
use uuid::Uuid;

use crate::config::AuthSettings;

const REQUEST_ID_HEADER: &str = "X-Request-ID";

// ═══════════════════════════════════════════════════════════════════════════════
// Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Internal authentication error: {0}")]
    Internal(String),
}

impl AuthError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "MISSING_CREDENTIALS",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::MissingCredentials => (
                StatusCode::UNAUTHORIZED,
                "Authentication credentials are required",
            ),
            Self::InvalidToken => (StatusCode::UNAUTHORIZED, "The provided token is invalid"),
            Self::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "The authentication token has expired",
            ),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An authentication error occurred",
            ),
        };

        counter!("auth_errors_total", "error_type" => self.code()).increment(1);

        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JWT Claims
// ═══════════════════════════════════════════════════════════════════════════════

/// Access token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity
    pub sub: String,

    /// Session code
    pub sid: String,

    /// Token ID
    pub jti: String,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl Claims {
    pub fn new(identity: impl Into<String>, session_code: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        // Saturates instead of overflowing for absurd lifetimes.
        let exp = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            sub: identity.into(),
            sid: session_code.into(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.iss = Some(issuer.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret
    pub jwt_secret: String,

    /// HS256, HS384 or HS512
    pub jwt_algorithm: Algorithm,

    /// Expected and issued `iss`
    pub issuer: Option<String>,

    /// Leeway for expiration checks (in seconds)
    pub leeway_secs: u64,

    /// Lifetime of issued tokens
    pub token_ttl: Duration,

    /// Full request paths served without credentials. A trailing `*`
    /// matches any suffix.
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_algorithm: Algorithm::HS256,
            issuer: None,
            leeway_secs: 30,
            token_ttl: Duration::from_secs(12 * 60 * 60),
            public_paths: Vec::new(),
        }
    }
}

impl AuthConfig {
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }
}

impl From<&AuthSettings> for AuthConfig {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            jwt_secret: settings.jwt_secret.clone(),
            issuer: settings.issuer.clone(),
            leeway_secs: settings.leeway_secs,
            token_ttl: settings.session_ttl,
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = secret.into();
        self
    }

    pub fn jwt_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.config.jwt_algorithm = algorithm;
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.issuer = Some(issuer.into());
        self
    }

    pub fn leeway_secs(mut self, secs: u64) -> Self {
        self.config.leeway_secs = secs;
        self
    }

    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.config.token_ttl = ttl;
        self
    }

    pub fn add_public_path(mut self, path: impl Into<String>) -> Self {
        self.config.public_paths.push(path.into());
        self
    }

    pub fn build(self) -> AuthConfig {
        self.config
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authentication Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Authenticated caller, attached to the request by [`AuthLayer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub identity: String,
    pub session_code: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    /// Request ID for correlation
    pub request_id: String,
}

impl AuthContext {
    pub fn from_claims(claims: Claims, request_id: String) -> Self {
        let expires_at = claims.expires_at();
        Self {
            identity: claims.sub,
            session_code: claims.sid,
            token_id: claims.jti,
            expires_at,
            request_id,
        }
    }
}

/// A freshly signed access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authenticator
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Authenticator {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl Authenticator {
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        if !matches!(
            config.jwt_algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AuthError::Internal(format!(
                "Unsupported JWT algorithm: {:?}",
                config.jwt_algorithm
            )));
        }
        if config.jwt_secret.is_empty() {
            return Err(AuthError::Internal(
                "JWT secret required for HMAC algorithms".into(),
            ));
        }

        let mut validation = Validation::new(config.jwt_algorithm);
        validation.leeway = config.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            config,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Check if a path is served without credentials.
    pub fn is_public_path(&self, path: &str) -> bool {
        self.config.public_paths.iter().any(|p| match p.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == p,
        })
    }

    /// Validate the bearer token in `headers`.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let token = extract_bearer(headers).ok_or(AuthError::MissingCredentials)?;
        let claims = self.validate_token(token)?;

        counter!("auth_success_total", "method" => "jwt").increment(1);
        Ok(AuthContext::from_claims(claims, request_id(headers)))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!("JWT validation failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            }
        })?;

        if data.claims.sid.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(data.claims)
    }

    /// Sign arbitrary claims.
    pub fn generate_token(&self, claims: &Claims) -> Result<String, AuthError> {
        let header = Header::new(self.config.jwt_algorithm);
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Sign a token for `(identity, session_code)` with the configured TTL.
    pub fn issue_token(&self, identity: &str, session_code: &str) -> Result<IssuedToken, AuthError> {
        let mut claims = Claims::new(identity, session_code, self.config.token_ttl);
        if let Some(ref issuer) = self.config.issuer {
            claims = claims.with_issuer(issuer);
        }

        let token = self.generate_token(&claims)?;
        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
            token_id: claims.jti,
        })
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").or_else(|| s.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<Authenticator>,
}

impl AuthLayer {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: self.authenticator.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
}

impl<S> Service<Request<Body>> for AuthService<S>
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
        let authenticator = self.authenticator.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            // Nested routers see a stripped URI; match on the original one.
            let path = request
                .extensions()
                .get::<OriginalUri>()
                .map(|uri| uri.0.path().to_string())
                .unwrap_or_else(|| request.uri().path().to_string());

            if authenticator.is_public_path(&path) {
                return inner.call(request).await;
            }

            match authenticator.authenticate(request.headers()) {
                Ok(auth_context) => {
                    request.extensions_mut().insert(auth_context);
                    inner.call(request).await
                }
                Err(e) => Ok(e.into_response()),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Extractor
// ═══════════════════════════════════════════════════════════════════════════════

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn authenticator() -> Authenticator {
        Authenticator::new(
            AuthConfig::builder()
                .jwt_secret("super-secret-key-for-testing-only")
                .issuer("agora")
                .add_public_path("/api/v1/operations")
                .add_public_path("/public/*")
                .build(),
        )
        .unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_issue_and_authenticate() {
        let auth = authenticator();
        let issued = auth.issue_token("alice", "abc123").unwrap();

        let mut headers = bearer(&issued.token);
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-1"));

        let ctx = auth.authenticate(&headers).unwrap();
        assert_eq!(ctx.identity, "alice");
        assert_eq!(ctx.session_code, "abc123");
        assert_eq!(ctx.token_id, issued.token_id);
        assert_eq!(ctx.request_id, "req-1");
    }

    #[test]
    fn test_missing_and_malformed_credentials() {
        let auth = authenticator();

        assert!(matches!(
            auth.authenticate(&HeaderMap::new()),
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            auth.authenticate(&bearer("not-a-jwt")),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let other = Authenticator::new(
            AuthConfig::builder()
                .jwt_secret("a-different-secret")
                .issuer("agora")
                .build(),
        )
        .unwrap();
        let issued = other.issue_token("alice", "abc123").unwrap();

        assert!(matches!(
            authenticator().authenticate(&bearer(&issued.token)),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_claims_saturate_huge_ttl() {
        let claims = Claims::new("alice", "abc123", Duration::MAX);
        assert!(!claims.is_expired());
        assert_eq!(claims.exp, DateTime::<Utc>::MAX_UTC.timestamp());
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = authenticator();
        let mut claims = Claims::new("alice", "abc123", Duration::from_secs(60)).with_issuer("agora");
        claims.exp = Utc::now().timestamp() - 3_600;
        let token = auth.generate_token(&claims).unwrap();

        assert!(matches!(
            auth.authenticate(&bearer(&token)),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_issuer_enforced() {
        let auth = authenticator();
        let claims = Claims::new("alice", "abc123", Duration::from_secs(60)).with_issuer("elsewhere");
        let token = auth.generate_token(&claims).unwrap();

        assert!(matches!(
            auth.authenticate(&bearer(&token)),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_public_paths() {
        let auth = authenticator();
        assert!(auth.is_public_path("/api/v1/operations"));
        assert!(auth.is_public_path("/public/anything"));
        assert!(!auth.is_public_path("/api/v1/operations/posts.create/check"));
    }

    #[test]
    fn test_rejects_empty_secret_and_asymmetric_algorithms() {
        assert!(Authenticator::new(AuthConfig::default()).is_err());
        assert!(Authenticator::new(
            AuthConfig::builder()
                .jwt_secret("secret")
                .jwt_algorithm(Algorithm::RS256)
                .build()
        )
        .is_err());
    }
}
