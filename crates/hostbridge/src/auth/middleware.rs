//! Authentication middleware.

use axum::{
    extract::State,
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::{AuthConfig, AuthError, ConfigValidationError};

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }

    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Authentication state shared across handlers.
///
/// Only the SHA-256 digest of the key is kept.
#[derive(Clone)]
pub struct AuthState {
    key_digest: [u8; 32],
    allowed_origins: Arc<Vec<String>>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("allowed_origins", &self.allowed_origins)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    /// Create auth state from config, resolving `env:VAR_NAME` and
    /// rejecting missing or placeholder keys.
    pub fn new(config: &AuthConfig) -> Result<Self, ConfigValidationError> {
        let key = config.validate()?;
        Ok(Self {
            key_digest: digest(&key),
            allowed_origins: Arc::new(config.allowed_origins.clone()),
        })
    }

    /// Get allowed CORS origins from config.
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    /// Compare a presented token against the configured key.
    pub fn verify(&self, token: &str) -> bool {
        let presented = digest(token);
        // Fold over every byte so timing does not depend on the first mismatch.
        presented
            .iter()
            .zip(self.key_digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Authentication middleware.
///
/// Requires `Authorization: Bearer <api key>` on every request it wraps.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let token = bearer_token_from_header(header)?;

    if !auth.verify(token) {
        warn!("Rejected request to {} with invalid API key", req.uri().path());
        return Err(AuthError::InvalidApiKey);
    }

    debug!("Authenticated request to {}", req.uri().path());
    Ok(next.run(req).await)
}
