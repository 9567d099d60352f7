//! Message send and history, the glue between store and delivery router.
//!
//! A send is persisted first. Only a confirmed write is handed to `deliver`,
//! exactly once; delivery outcome never affects the caller's result.

use tracing::{debug, error, info};

use crate::frame::ErrorCode;
use crate::model::{Message, MessageContent, UserId};
use crate::services::delivery;
use crate::services::store::StoreError;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message has no text, image or file")]
    EmptyContent,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for SendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyContent => "E_EMPTY_MESSAGE",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::EmptyContent => false,
            Self::Store(e) => e.retryable(),
        }
    }
}

/// Persist a message from `sender` to `receiver` and push it to the
/// receiver's live connections.
///
/// # Errors
///
/// `EmptyContent` when every content field is blank, `Store` when the write
/// fails (nothing is delivered in that case).
pub async fn send_message(
    state: &AppState,
    sender: &UserId,
    receiver: &UserId,
    content: MessageContent,
) -> Result<Message, SendError> {
    let content = content.normalized().ok_or(SendError::EmptyContent)?;

    let message = state.store.create(sender, receiver, content).await.map_err(|e| {
        error!(%sender, %receiver, error = %e, "messages: store write failed");
        e
    })?;

    let report = delivery::deliver(&state.registry, &message);
    if report.is_miss() {
        debug!(message_id = %message.id, %receiver, "messages: receiver offline, history only");
    } else {
        info!(message_id = %message.id, %sender, %receiver, pushed = report.pushed, "messages: sent");
    }
    Ok(message)
}

/// Every message between `me` and `partner`, oldest first.
///
/// # Errors
///
/// Propagates store failures.
pub async fn conversation(state: &AppState, me: &UserId, partner: &UserId) -> Result<Vec<Message>, StoreError> {
    state.store.conversation(me, partner).await
}

#[cfg(test)]
#[path = "messages_test.rs"]
mod tests;
