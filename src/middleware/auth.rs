//! Bearer-token authentication middleware.
//!
//! Every protected request resolves to an acting user:
//! 1. Extract the token from the Authorization header
//! 2. Hash it and look it up in `auth_tokens`
//! 3. Inject the acting user's id and role into the request
//! 4. Reject unknown tokens with HTTP 401
//!
//! Token issuance (registration, OTP verification) is handled by a
//! separate service; this one only consumes the resulting tokens.

use crate::{db::DbPool, error::AppError};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Authentication context attached to authenticated requests.
///
/// Handlers extract this to know who is acting; authorization decisions
/// (is this the trip's passenger? the assigned driver?) are made against
/// `user_id` downstream.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: String,
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    user_id: Uuid,
    role: String,
}

/// Hash a bearer token the way `auth_tokens.token_hash` stores it.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Bearer-token authentication middleware function.
///
/// Expected header format:
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// On success the request carries an [`AuthContext`] extension; on failure
/// the request is rejected with 401 before reaching any handler.
pub async fn auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidToken)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::InvalidToken)?;

    let token_hash = hash_token(token);

    // Resolve the token to its user in one join; revoked tokens and
    // missing users both fail the same way.
    let row = sqlx::query_as::<_, TokenRow>(
        r#"
        SELECT u.id AS user_id, u.role
        FROM auth_tokens t
        JOIN users u ON u.id = t.user_id
        WHERE t.token_hash = $1 AND t.is_active = true
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::InvalidToken)?;

    request.extensions_mut().insert(AuthContext {
        user_id: row.user_id,
        role: row.role,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_hex_sha256() {
        let h = hash_token("test-token");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        // Deterministic
        assert_eq!(h, hash_token("test-token"));
        assert_ne!(h, hash_token("other-token"));
    }
}
