//! Bearer-token authentication for the request/response surface.
//!
//! Tokens are issued by the external auth collaborator; this module only
//! validates the HS256 signature and expiry, then trusts the `sub` claim
//! as the caller's identity. The sender of a request is always derived
//! here, never taken from the request body.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use causerie_shared::UserId;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The authenticated identity.
    pub sub: String,
    /// Expiry, seconds since the epoch.
    pub exp: usize,
}

/// The authenticated identity of a request.
pub struct AuthedUser(pub UserId);

impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let identity = identity_from_bearer(header, &state.config.jwt_secret)?;
        Ok(AuthedUser(identity))
    }
}

/// Validate an `Authorization` header value and extract the identity.
pub fn identity_from_bearer(
    header: Option<&str>,
    secret: &str,
) -> Result<UserId, ServerError> {
    let header = header.ok_or_else(|| ServerError::Unauthorized("missing token".into()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ServerError::Unauthorized("malformed authorization header".into()))?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ServerError::Unauthorized(format!("invalid token: {e}")))?;

    Ok(UserId::new(data.claims.sub))
}
