//! Shared domain types for users and direct messages.
//!
//! DESIGN
//! ======
//! These types cross every boundary in the crate: the presence registry keys
//! on `UserId`, the delivery router pushes `Message` payloads verbatim, and
//! the client reconciliation state consumes the same structs after parsing.
//! Messages are owned by the store; this layer only observes and relays them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// USER IDENTITY
// =============================================================================

/// Opaque, stable user identifier issued by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for UserId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// Message body as submitted by a sender. At least one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Attachment URL returned by the media upload collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), image: None, file: None }
    }

    /// Trim text and drop blank fields. Returns `None` when nothing is left.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let keep = |value: Option<String>| {
            value
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        let content = Self { text: keep(self.text), image: keep(self.image), file: keep(self.file) };
        if content.is_empty() { None } else { Some(content) }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.image.is_none() && self.file.is_none()
    }
}

/// A durably recorded direct message. Mirrors the `messages` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Milliseconds since Unix epoch, assigned by the store.
    pub created_at: i64,
    #[serde(flatten)]
    pub content: MessageContent,
}

impl Message {
    /// True if the message belongs to the conversation between `a` and `b`.
    #[must_use]
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender_id == a && &self.receiver_id == b) || (&self.sender_id == b && &self.receiver_id == a)
    }
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Online set at one registry epoch, as served by `GET /api/presence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceView {
    pub online: Vec<UserId>,
    pub epoch: u64,
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
