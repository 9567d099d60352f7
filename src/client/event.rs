//! Server frames → typed client events.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::warn;

use crate::frame::{
    FRAME_CODE, FRAME_EPOCH, FRAME_MESSAGE, FRAME_ONLINE, Frame, Status, SYSCALL_GATEWAY_ERROR, SYSCALL_HEARTBEAT,
    SYSCALL_NEW_MESSAGE, SYSCALL_PRESENCE_CHANGED, SYSCALL_SESSION_CONNECTED,
};
use crate::model::{Message, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// First frame of every session.
    Connected { client_id: String, user_id: UserId },
    NewMessage(Message),
    PresenceChanged { online: BTreeSet<UserId>, epoch: u64 },
    HeartbeatAck,
    GatewayError { code: String, message: String },
}

/// Map one server frame to an event. Unknown or malformed frames yield `None`.
#[must_use]
pub fn parse_frame(frame: &Frame) -> Option<ClientEvent> {
    match frame.syscall.as_str() {
        SYSCALL_NEW_MESSAGE => {
            let data: serde_json::Map<String, Value> = frame.data.clone().into_iter().collect();
            match serde_json::from_value::<Message>(Value::Object(data)) {
                Ok(message) => Some(ClientEvent::NewMessage(message)),
                Err(e) => {
                    warn!(id = %frame.id, error = %e, "client: malformed message push");
                    None
                }
            }
        }
        SYSCALL_PRESENCE_CHANGED => {
            let online = frame
                .data
                .get(FRAME_ONLINE)?
                .as_array()?
                .iter()
                .filter_map(Value::as_str)
                .map(UserId::from)
                .collect();
            let epoch = frame.data.get(FRAME_EPOCH).and_then(Value::as_u64).unwrap_or(0);
            Some(ClientEvent::PresenceChanged { online, epoch })
        }
        SYSCALL_SESSION_CONNECTED => Some(ClientEvent::Connected {
            client_id: str_field(frame, "client_id")?,
            user_id: UserId::new(str_field(frame, "user_id")?),
        }),
        SYSCALL_HEARTBEAT if frame.status == Status::Done => Some(ClientEvent::HeartbeatAck),
        SYSCALL_GATEWAY_ERROR => Some(ClientEvent::GatewayError {
            code: str_field(frame, FRAME_CODE).unwrap_or_default(),
            message: str_field(frame, FRAME_MESSAGE).unwrap_or_default(),
        }),
        _ => None,
    }
}

/// Parse a raw websocket text message.
///
/// # Errors
///
/// Returns the JSON error if `text` is not a frame.
pub fn parse_text(text: &str) -> Result<Option<ClientEvent>, serde_json::Error> {
    let frame: Frame = serde_json::from_str(text)?;
    Ok(parse_frame(&frame))
}

fn str_field(frame: &Frame, key: &str) -> Option<String> {
    frame.data.get(key).and_then(Value::as_str).map(str::to_owned)
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
