//! Authentication gate.
//!
//! Resolves the bearer token on the request context into a [`Principal`].
//! Requests without a token abort with `missing_credentials`; tokens the
//! [`Authenticator`] rejects abort with `invalid_token`. Both are 401.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use fitsync_core::{Principal, PipelineResponse};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};
use tracing::debug;

use crate::service::operation::{PipelineError, PipelineFuture, PipelineRequest};

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("{0}")]
    Invalid(String),
}

/// Verifies a bearer token and names its owner.
pub trait Authenticator: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`AuthError`] when the token is malformed, forged or expired.
    fn authenticate(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Claims carried by FitSync access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    /// Claims for `user_id` valid for `ttl_secs` from now.
    #[must_use]
    pub fn new(user_id: impl Into<String>, ttl_secs: u64) -> Self {
        let now = unix_now();
        Self {
            user_id: user_id.into(),
            email: None,
            roles: Vec::new(),
            iat: now,
            exp: now + ttl_secs,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// HS256 JWT verifier keyed by a shared secret.
pub struct JwtAuthenticator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        validation.leeway = 0;
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Signs `claims` with this authenticator's secret.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Invalid`] if the claims cannot be encoded.
    pub fn issue(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;
        Ok(Principal {
            id: data.claims.user_id,
            roles: data.claims.roles,
        })
    }
}

// ---------------------------------------------------------------------------
// AuthLayer
// ---------------------------------------------------------------------------

/// Tower layer that requires an authenticated principal.
#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthLayer {
    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: Arc::clone(&self.authenticator),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Arc<dyn Authenticator>,
}

impl<S> Service<PipelineRequest> for AuthService<S>
where
    S: Service<PipelineRequest, Response = PipelineResponse, Error = PipelineError> + Send,
    S::Future: Send + 'static,
{
    type Response = PipelineResponse;
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: PipelineRequest) -> Self::Future {
        let Some(token) = req.ctx.bearer_token.as_deref() else {
            return Box::pin(async { Err(PipelineError::MissingCredentials) });
        };

        match self.authenticator.authenticate(token) {
            Ok(principal) => {
                req.ctx.set_principal(principal);
                Box::pin(self.inner.call(req))
            }
            Err(e) => {
                debug!(request_id = %req.ctx.request_id, error = %e, "rejected bearer token");
                Box::pin(async move { Err(PipelineError::InvalidToken(e.to_string())) })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
