use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::state::AppState;

const ACCESS_TOKEN_TYPE: &str = "access";
const ADMIN_ROLE: &str = "admin";

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject, the user's email or login name
    pub sub: String,
    pub user_id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub token_type: String,
    /// Expiry as seconds since the Unix epoch
    pub exp: u64,
}

/// Sign an HS256 access token for `user_id`.
pub fn issue_token(
    secret: &str,
    subject: &str,
    user_id: &str,
    role: &str,
    ttl: Duration,
) -> anyhow::Result<String> {
    if secret.is_empty() {
        anyhow::bail!("Cannot sign tokens without a secret key");
    }
    let exp = chrono::Utc::now().timestamp().max(0) as u64 + ttl.as_secs();
    let claims = Claims {
        sub: subject.to_string(),
        user_id: user_id.to_string(),
        role: role.to_string(),
        token_type: ACCESS_TOKEN_TYPE.to_string(),
        exp,
    };
    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Sign an access token with the configured secret and lifetime.
pub fn issue_access_token(
    auth: &AuthConfig,
    subject: &str,
    user_id: &str,
    role: &str,
) -> anyhow::Result<String> {
    issue_token(&auth.secret_key, subject, user_id, role, auth.access_ttl())
}

/// Verify signature, expiry and token type.
pub fn verify_token(secret: &str, token: &str) -> anyhow::Result<Claims> {
    if secret.is_empty() {
        anyhow::bail!("No secret key configured");
    }
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    if data.claims.token_type != ACCESS_TOKEN_TYPE {
        anyhow::bail!("Expected an access token, got '{}'", data.claims.token_type);
    }
    Ok(data.claims)
}

/// An authenticated caller with the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Claims);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    "Missing bearer token".to_string(),
                )
            })?;

        let claims = verify_token(&state.config.auth.secret_key, token).map_err(|e| {
            tracing::warn!("Rejected bearer token: {e}");
            (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token".to_string(),
            )
        })?;

        if claims.role != ADMIN_ROLE {
            tracing::warn!("User {} ({}) denied admin access", claims.user_id, claims.role);
            return Err((StatusCode::FORBIDDEN, "Admin access required".to_string()));
        }

        Ok(AdminUser(claims))
    }
}
