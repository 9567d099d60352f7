//! Client side of the presence layer.
//!
//! ARCHITECTURE
//! ============
//! ```text
//! ClientSocket ──ClientEvent──▶ ReconciliationState ◀──history── MessagesApi
//!      ▲                              │
//!      └──── heartbeat ── ChatClient ─┘── unread counters ──▶ UnreadStore
//! ```
//!
//! `ReconciliationState` is plain data plus transitions; it never does I/O
//! except persisting unread counters. `ChatClient` owns the transports and
//! feeds events and history results into it one at a time.

pub mod api;
pub mod chat;
pub mod event;
pub mod reconcile;
pub mod socket;
pub mod unread;

pub use chat::{ChatClient, ChatUpdate, ClientConfig};
pub use event::ClientEvent;
pub use reconcile::{ConversationPhase, HistorySource, ReconciliationState, Subscription};

use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    Socket(Box<tungstenite::Error>),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid url: {0}")]
    Url(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tungstenite::Error> for ClientError {
    fn from(e: tungstenite::Error) -> Self {
        Self::Socket(Box::new(e))
    }
}
