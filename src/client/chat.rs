//! `ChatClient`: socket + API + reconciliation state in one event loop.
//!
//! `next_update` drives everything: it sends heartbeats on a fixed interval,
//! applies socket events, and applies history results from fetches started
//! by `select`. Fetches run on their own task so pushes keep being applied
//! while a conversation is `Loading`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::api::MessagesApi;
use crate::client::event::ClientEvent;
use crate::client::reconcile::{HistorySource, ReconciliationState, Subscription};
use crate::client::socket::ClientSocket;
use crate::client::unread::UnreadStore;
use crate::client::ClientError;
use crate::model::{Message, MessageContent, UserId};

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, `http://` or `https://`.
    pub base_url: String,
    /// Local identity.
    pub me: UserId,
    /// Query parameters proving identity (`user_id=…` or `token=…`).
    pub auth: Vec<(String, String)>,
    /// Must be shorter than the server's idle window.
    pub heartbeat_interval: Duration,
    /// Initial recent-contact order, e.g. from a user directory. Activity
    /// reorders it from there.
    pub contacts: Vec<UserId>,
}

impl ClientConfig {
    /// Query-mode config: identity passed as `user_id`.
    pub fn with_user_id(base_url: impl Into<String>, me: impl Into<UserId>) -> Self {
        let me = me.into();
        Self {
            base_url: base_url.into(),
            auth: vec![("user_id".to_owned(), me.to_string())],
            me,
            heartbeat_interval: DEFAULT_HEARTBEAT,
            contacts: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_contacts(mut self, contacts: impl IntoIterator<Item = UserId>) -> Self {
        self.contacts = contacts.into_iter().collect();
        self
    }

    /// `http(s)://` → `ws(s)://`.
    #[must_use]
    pub fn ws_base(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_owned()
        }
    }
}

/// What one `next_update` step changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    Event(ClientEvent),
    HistoryLoaded { partner: UserId, applied: bool },
}

type LoadResult = (Subscription, Result<Vec<Message>, ClientError>);

pub struct ChatClient {
    state: ReconciliationState,
    socket: ClientSocket,
    api: MessagesApi,
    heartbeat: Interval,
    loads_tx: mpsc::Sender<LoadResult>,
    loads_rx: mpsc::Receiver<LoadResult>,
}

impl ChatClient {
    /// Open the socket and restore unread counters.
    ///
    /// # Errors
    ///
    /// Socket handshake failure (401 when unauthenticated) or unreadable
    /// counters.
    pub async fn connect(config: ClientConfig, unread_store: Arc<dyn UnreadStore>) -> Result<Self, ClientError> {
        let mut state = ReconciliationState::new(config.me.clone(), unread_store)?;
        state.set_contacts(config.contacts.iter().cloned());
        let socket = ClientSocket::connect(&config.ws_base(), &config.auth).await?;
        let api = MessagesApi::new(config.base_url.clone(), config.auth.clone());

        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it.
        heartbeat.reset();

        let (loads_tx, loads_rx) = mpsc::channel(8);
        info!(me = %config.me, "client: connected");
        Ok(Self { state, socket, api, heartbeat, loads_tx, loads_rx })
    }

    #[must_use]
    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ReconciliationState {
        &mut self.state
    }

    #[must_use]
    pub fn api(&self) -> &MessagesApi {
        &self.api
    }

    /// Open the conversation with `partner`. History arrives later through
    /// `next_update`.
    pub fn select(&mut self, partner: UserId) {
        let subscription = self.state.begin_select(partner);
        let api = self.api.clone();
        let me = self.state.me().clone();
        let tx = self.loads_tx.clone();

        tokio::spawn(async move {
            let result = api.history(&me, subscription.partner()).await;
            if tx.send((subscription, result)).await.is_err() {
                debug!("client: history result dropped, client gone");
            }
        });
    }

    pub fn close_conversation(&mut self) {
        self.state.close_conversation();
    }

    /// Send a message and show it in the open conversation.
    ///
    /// # Errors
    ///
    /// API failure; nothing is recorded locally in that case.
    pub async fn send(&mut self, receiver: &UserId, content: MessageContent) -> Result<Message, ClientError> {
        let message = self.api.send(receiver, &content).await?;
        self.state.record_sent(&message);
        Ok(message)
    }

    /// Run until something changes. `Ok(None)` once the server closes the
    /// socket.
    ///
    /// # Errors
    ///
    /// Socket failure.
    pub async fn next_update(&mut self) -> Result<Option<ChatUpdate>, ClientError> {
        loop {
            tokio::select! {
                _ = self.heartbeat.tick() => {
                    self.socket.heartbeat().await?;
                }
                event = self.socket.next_event() => {
                    let Some(event) = event? else {
                        return Ok(None);
                    };
                    self.state.apply(&event);
                    return Ok(Some(ChatUpdate::Event(event)));
                }
                Some((subscription, result)) = self.loads_rx.recv() => {
                    let history = result.unwrap_or_else(|e| {
                        warn!(partner = %subscription.partner(), error = %e, "client: history fetch failed");
                        Vec::new()
                    });
                    let applied = self.state.finish_load(&subscription, history);
                    return Ok(Some(ChatUpdate::HistoryLoaded { partner: subscription.partner().clone(), applied }));
                }
            }
        }
    }

    /// Close the socket.
    ///
    /// # Errors
    ///
    /// Transport failure.
    pub async fn shutdown(mut self) -> Result<(), ClientError> {
        self.socket.close().await
    }
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
