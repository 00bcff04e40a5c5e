//! Bearer-token authentication.
//!
//! Validates a JWT on every non-public request and injects the caller's
//! [`RequestContext`] into the request extensions. Token issuance is out of
//! scope for the server; [`Authenticator::issue`] exists for operators and tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use crm_core::middleware::auth::{AuthConfig, AuthLayer};
//!
//! let layer = AuthLayer::from_config(AuthConfig::from_settings(&config.auth))?;
//! let app = Router::new()
//!     .route("/api/v1/stages", get(list_stages))
//!     .layer(layer);
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use futures::future::BoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

use crate::config::AuthSettings;
use crate::error::{CrmError, ErrorCode, Result};
use crate::ids::{IdentityId, OrganizationId};
use crate::rbac::RequestContext;
use crate::tenancy::ProfileKind;

/// Header carrying the organization a customer (or superuser) acts in.
pub const ORGANIZATION_HEADER: &str = "X-Organization-Id";

// ═══════════════════════════════════════════════════════════════════════════════
// JWT Claims
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity id.
    pub sub: String,

    /// The profile the token acts under.
    pub profile: ProfileKind,

    pub iat: i64,
    pub exp: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    pub fn new(identity: IdentityId, profile: ProfileKind, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: identity.to_string(),
            profile,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: None,
            aud: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.iss = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.aud = Some(audience.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }

    /// The request context these claims authenticate.
    pub fn context(&self) -> Result<RequestContext> {
        let identity: IdentityId = self
            .sub
            .parse()
            .map_err(|_| CrmError::new(ErrorCode::InvalidToken, "The provided token is invalid"))?;
        Ok(RequestContext::new(identity, self.profile))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub jwt_secret: String,
    pub jwt_algorithm: Algorithm,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub leeway_secs: u64,
    /// Exact paths, or prefixes ending in `*`.
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwt_secret: String::new(),
            jwt_algorithm: Algorithm::HS256,
            issuer: None,
            audience: None,
            leeway_secs: 30,
            public_paths: vec!["/health".to_string(), "/metrics".to_string()],
        }
    }
}

impl AuthConfig {
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self {
            jwt_secret: settings.jwt_secret.clone(),
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
            leeway_secs: settings.leeway_secs,
            ..Self::default()
        }
    }

    pub fn with_public_path(mut self, path: impl Into<String>) -> Self {
        self.public_paths.push(path.into());
        self
    }
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
    /// Only HMAC algorithms are supported.
    pub fn new(config: AuthConfig) -> Result<Self> {
        if !matches!(
            config.jwt_algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(CrmError::new(
                ErrorCode::ConfigurationError,
                format!("Unsupported JWT algorithm: {:?}", config.jwt_algorithm),
            ));
        }
        if config.enabled && config.jwt_secret.is_empty() {
            return Err(CrmError::new(
                ErrorCode::MissingConfiguration,
                "auth.jwt_secret is required when authentication is enabled",
            ));
        }

        let mut validation = Validation::new(config.jwt_algorithm);
        validation.leeway = config.leeway_secs;
        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            config,
        })
    }

    pub fn is_public_path(&self, path: &str) -> bool {
        self.config.public_paths.iter().any(|p| match p.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == p,
        })
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<RequestContext> {
        let token = extract_bearer(headers)
            .ok_or_else(|| CrmError::unauthorized("Authentication credentials are required"))?;
        self.validate(token)
    }

    pub fn validate(&self, token: &str) -> Result<RequestContext> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!(error = %e, "JWT validation failed");
            counter!("crm_auth_failures_total").increment(1);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    CrmError::new(ErrorCode::TokenExpired, "The authentication token has expired")
                }
                _ => CrmError::new(ErrorCode::InvalidToken, "The provided token is invalid"),
            }
        })?;

        let ctx = data.claims.context()?;
        counter!("crm_auth_success_total", "profile" => ctx.profile_kind.as_str()).increment(1);
        Ok(ctx)
    }

    /// Sign `claims` with the configured secret.
    pub fn issue(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(self.config.jwt_algorithm), claims, &self.encoding_key).map_err(|e| {
            CrmError::with_internal(
                ErrorCode::InternalError,
                "Failed to issue token",
                e.to_string(),
            )
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

    pub fn from_config(config: AuthConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(Authenticator::new(config)?)))
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
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let authenticator = self.authenticator.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !authenticator.config.enabled || authenticator.is_public_path(request.uri().path()) {
                return inner.call(request).await;
            }

            match authenticator.authenticate(request.headers()) {
                Ok(ctx) => {
                    request.extensions_mut().insert(ctx);
                    inner.call(request).await
                }
                Err(e) => Ok(e.into_response()),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Extractors
// ═══════════════════════════════════════════════════════════════════════════════

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = CrmError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .copied()
            .ok_or_else(|| CrmError::unauthorized("Authentication credentials are required"))
    }
}

/// Optional organization named by the caller in [`ORGANIZATION_HEADER`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OrganizationHint(pub Option<OrganizationId>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for OrganizationHint
where
    S: Send + Sync,
{
    type Rejection = CrmError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        match parts.headers.get(ORGANIZATION_HEADER) {
            None => Ok(Self(None)),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<OrganizationId>().ok())
                .map(|id| Self(Some(id)))
                .ok_or_else(|| {
                    CrmError::validation(format!("{} must be a UUID", ORGANIZATION_HEADER))
                }),
        }
    }
}
