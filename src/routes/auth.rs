//! Auth extractor for HTTP routes.
//!
//! HTTP calls carry the same query metadata as the websocket handshake and
//! are resolved by the same `IdentityResolver`.

use axum::extract::{FromRef, Query};
use axum::http::StatusCode;

use crate::model::UserId;
use crate::services::auth::{AuthError, ConnectionMetadata};
use crate::state::AppState;

/// Map a resolver failure to an HTTP status. Database trouble is the
/// server's fault; everything else is the caller's.
pub(crate) fn auth_error_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Missing(_) | AuthError::Invalid => StatusCode::UNAUTHORIZED,
        AuthError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Authenticated caller. Use as a handler parameter to require identity.
pub struct AuthUser {
    pub id: UserId,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(metadata) =
            Query::<ConnectionMetadata>::try_from_uri(&parts.uri).map_err(|_| StatusCode::BAD_REQUEST)?;

        let app_state = AppState::from_ref(state);
        let id = app_state.auth.resolve(&metadata).await.map_err(|e| {
            if matches!(e, AuthError::Database(_)) {
                tracing::error!(error = %e, "auth: identity lookup failed");
            }
            auth_error_status(&e)
        })?;

        Ok(Self { id })
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
