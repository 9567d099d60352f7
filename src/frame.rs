//! Frame: the universal message type on the courier websocket.
//!
//! ARCHITECTURE
//! ============
//! Every server push and every client control message is a Frame serialized
//! as one JSON text message. The server emits `message:new` and
//! `presence:changed` pushes; clients send `session:heartbeat` and receive
//! a correlated `done` reply.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`.
//! - Responses correlate to requests via `parent_id`.
//! - Routing looks only at `syscall`; payload parsing lives with the consumer.

use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Message, UserId};

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

/// Presence payload: sorted list of online identities.
pub const FRAME_ONLINE: &str = "online";

/// Presence payload: registry epoch the snapshot was taken at.
pub const FRAME_EPOCH: &str = "epoch";

// =============================================================================
// SYSCALLS
// =============================================================================

pub const SYSCALL_NEW_MESSAGE: &str = "message:new";
pub const SYSCALL_PRESENCE_CHANGED: &str = "presence:changed";
pub const SYSCALL_SESSION_CONNECTED: &str = "session:connected";
pub const SYSCALL_HEARTBEAT: &str = "session:heartbeat";
pub const SYSCALL_GATEWAY_ERROR: &str = "gateway:error";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// Lifecycle position of a frame in a request/response stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

/// The universal message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    pub ts: i64,
    pub from: Option<String>,
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a request frame. Server pushes are requests with no parent.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// `message:new` push carrying the full persisted message.
    #[must_use]
    pub fn new_message(message: &Message) -> Self {
        let data = match serde_json::to_value(message) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => Data::new(),
        };
        Self::request(SYSCALL_NEW_MESSAGE, data).with_from(message.sender_id.as_str())
    }

    /// `presence:changed` push carrying the full online set. Never a delta.
    #[must_use]
    pub fn presence_changed(online: &BTreeSet<UserId>, epoch: u64) -> Self {
        let ids: Vec<&str> = online.iter().map(UserId::as_str).collect();
        Self::request(SYSCALL_PRESENCE_CHANGED, Data::new())
            .with_data(FRAME_ONLINE, serde_json::json!(ids))
            .with_data(FRAME_EPOCH, epoch)
    }

    /// Create a done response. Terminal.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    /// Create a structured error response from a typed error. Terminal.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), serde_json::Value::String(err.error_code().to_string()));
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), serde_json::Value::Bool(err.retryable()));
        self.reply(Status::Error, data)
    }

    /// Build a reply frame. Inherits `parent_id` and `syscall`.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            from: None,
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
