//! Auth collaborator: resolve a verified identity from connection metadata.
//!
//! ARCHITECTURE
//! ============
//! Login and session issuance live outside this service. By the time a
//! client opens a websocket or calls the messages API it carries either a
//! pre-verified user id (query mode, trusted upstream proxy) or a session
//! token written by the auth service (session mode). Both are read from the
//! request query string.
//!
//! TRADE-OFFS
//! ==========
//! Session tokens are looked up, not consumed, so one token can admit
//! several tabs and also authorize HTTP calls. Expiry is enforced in SQL.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::model::UserId;

/// Query parameters attached to an HTTP request or websocket handshake.
pub type ConnectionMetadata = HashMap<String, String>;

/// Query parameter carrying a session token in session mode.
pub const TOKEN_PARAM: &str = "token";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing `{0}` connection parameter")]
    Missing(String),
    #[error("invalid or expired credentials")]
    Invalid,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "E_AUTH_MISSING",
            Self::Invalid => "E_AUTH_INVALID",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Resolves the verified identity behind a connection.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, metadata: &ConnectionMetadata) -> Result<UserId, AuthError>;
}

/// Read a non-blank parameter. Browsers serialize unset ids as the literal
/// strings `undefined` / `null`; those count as absent.
fn param<'a>(metadata: &'a ConnectionMetadata, key: &str) -> Result<&'a str, AuthError> {
    let value = metadata.get(key).map(|v| v.trim()).unwrap_or_default();
    match value {
        "" | "undefined" | "null" => Err(AuthError::Missing(key.to_owned())),
        v => Ok(v),
    }
}

// =============================================================================
// QUERY MODE
// =============================================================================

/// Trusts a pre-verified user id passed as a query parameter.
pub struct QueryParamResolver {
    param: String,
}

impl QueryParamResolver {
    pub fn new(param: impl Into<String>) -> Self {
        Self { param: param.into() }
    }
}

#[async_trait]
impl IdentityResolver for QueryParamResolver {
    async fn resolve(&self, metadata: &ConnectionMetadata) -> Result<UserId, AuthError> {
        param(metadata, &self.param).map(UserId::from)
    }
}

// =============================================================================
// SESSION MODE
// =============================================================================

/// Validates a session token against the `sessions` table.
pub struct SessionTokenResolver {
    pool: PgPool,
}

impl SessionTokenResolver {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityResolver for SessionTokenResolver {
    async fn resolve(&self, metadata: &ConnectionMetadata) -> Result<UserId, AuthError> {
        let token = param(metadata, TOKEN_PARAM)?;
        let row = sqlx::query("SELECT user_id FROM sessions WHERE token = $1 AND expires_at > now()")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| UserId::new(r.get::<String, _>("user_id")))
            .ok_or(AuthError::Invalid)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
