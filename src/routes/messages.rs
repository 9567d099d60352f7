//! Message history, send, and presence routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use tracing::error;

use crate::model::{Message, MessageContent, PresenceView, UserId};
use crate::routes::auth::AuthUser;
use crate::services::messages::{self, SendError};
use crate::state::AppState;

/// `GET /api/messages/{partner}`: conversation history, oldest first.
pub async fn history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(partner): Path<String>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let partner = UserId::new(partner);
    messages::conversation(&state, &auth.id, &partner)
        .await
        .map(Json)
        .map_err(|e| {
            error!(user_id = %auth.id, %partner, error = %e, "messages: history query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// `POST /api/messages/send/{receiver}`: persist then push. 201 even when
/// the receiver is offline.
pub async fn send(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(receiver): Path<String>,
    Json(content): Json<MessageContent>,
) -> Response {
    let receiver = UserId::new(receiver);
    match messages::send_message(&state, &auth.id, &receiver, content).await {
        Ok(message) => (StatusCode::CREATED, Json(message)).into_response(),
        Err(e @ SendError::EmptyContent) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(SendError::Store(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "failed to store message").into_response(),
    }
}

/// `GET /api/presence`: current online set and its epoch.
pub async fn presence(State(state): State<AppState>, _auth: AuthUser) -> Json<PresenceView> {
    let (epoch, online) = state.registry.online_at_epoch();
    Json(PresenceView { online: online.into_iter().collect(), epoch })
}

#[cfg(test)]
#[path = "messages_test.rs"]
mod tests;
