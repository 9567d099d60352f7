//! Client reconciliation state: merges pushes with history and unread
//! counters.
//!
//! DESIGN
//! ======
//! Per conversation: `Unselected → Loading → Ready`.
//!
//! Selecting a partner is an explicit subscription: it replaces any previous
//! one, bumps a generation number, clears and persists the partner's unread
//! counter in the same transition, and starts a history fetch. A history
//! result carries the `Subscription` that requested it; a result for an
//! outdated generation is discarded, so a slow fetch for a conversation the
//! user already left can never overwrite the current one.
//!
//! Pushes from the current partner are appended in arrival order while
//! `Ready`. During `Loading` they are buffered and appended after the
//! history, skipping ids the history already contains. Pushes from anyone
//! else bump that sender's unread counter and move them to the front of the
//! recent-contact list.
//!
//! Presence snapshots replace the online set wholesale. Snapshots older than
//! the newest applied epoch are ignored; a new session resets the epoch since
//! the server's counter restarts with it.
//!
//! Handlers are synchronous and run to completion; only `select_conversation`
//! awaits, and `ChatClient` splits it into `begin_select` / `finish_load` so
//! events keep flowing while a fetch is in flight.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::ClientError;
use crate::client::event::ClientEvent;
use crate::client::unread::{UnreadCounters, UnreadStore};
use crate::model::{Message, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    Unselected,
    Loading,
    Ready,
}

/// Token for one conversation selection. History results are only applied
/// if their token is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    partner: UserId,
    generation: u64,
}

impl Subscription {
    #[must_use]
    pub fn partner(&self) -> &UserId {
        &self.partner
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Source of conversation history.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Every message between `me` and `partner`, oldest first.
    async fn history(&self, me: &UserId, partner: &UserId) -> Result<Vec<Message>, ClientError>;
}

pub struct ReconciliationState {
    me: UserId,
    phase: ConversationPhase,
    subscription: Option<Subscription>,
    generation: u64,
    messages: Vec<Message>,
    buffered: Vec<Message>,
    unread: UnreadCounters,
    unread_store: Arc<dyn UnreadStore>,
    recent: Vec<UserId>,
    online: BTreeSet<UserId>,
    presence_epoch: Option<u64>,
}

impl ReconciliationState {
    /// Fresh state for `me`, with unread counters restored from `unread_store`.
    ///
    /// # Errors
    ///
    /// Fails if the persisted counters cannot be read.
    pub fn new(me: UserId, unread_store: Arc<dyn UnreadStore>) -> Result<Self, ClientError> {
        let unread = unread_store.load(&me)?;
        Ok(Self {
            me,
            phase: ConversationPhase::Unselected,
            subscription: None,
            generation: 0,
            messages: Vec::new(),
            buffered: Vec::new(),
            unread,
            unread_store,
            recent: Vec::new(),
            online: BTreeSet::new(),
            presence_epoch: None,
        })
    }

    // =========================================================================
    // READS
    // =========================================================================

    #[must_use]
    pub fn me(&self) -> &UserId {
        &self.me
    }

    #[must_use]
    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    #[must_use]
    pub fn partner(&self) -> Option<&UserId> {
        self.subscription.as_ref().map(Subscription::partner)
    }

    /// Messages of the selected conversation, in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn unread(&self, sender: &UserId) -> u32 {
        self.unread.get(sender)
    }

    #[must_use]
    pub fn unread_counters(&self) -> &UnreadCounters {
        &self.unread
    }

    /// Contacts, most recent activity first.
    #[must_use]
    pub fn recent_contacts(&self) -> &[UserId] {
        &self.recent
    }

    #[must_use]
    pub fn online(&self) -> &BTreeSet<UserId> {
        &self.online
    }

    #[must_use]
    pub fn is_online(&self, identity: &UserId) -> bool {
        self.online.contains(identity)
    }

    /// Online identities other than `me`.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.online.iter().filter(|id| **id != self.me).count()
    }

    #[must_use]
    pub fn presence_epoch(&self) -> Option<u64> {
        self.presence_epoch
    }

    // =========================================================================
    // CONTACTS
    // =========================================================================

    /// Seed the contact list (e.g. from the user directory). Order is kept;
    /// duplicates after the first occurrence are dropped.
    pub fn set_contacts(&mut self, contacts: impl IntoIterator<Item = UserId>) {
        let mut seen = HashSet::new();
        self.recent = contacts
            .into_iter()
            .filter(|c| *c != self.me && seen.insert(c.clone()))
            .collect();
    }

    fn promote(&mut self, contact: &UserId) {
        if let Some(pos) = self.recent.iter().position(|c| c == contact) {
            let existing = self.recent.remove(pos);
            self.recent.insert(0, existing);
        } else {
            self.recent.insert(0, contact.clone());
        }
    }

    // =========================================================================
    // CONVERSATION SELECTION
    // =========================================================================

    /// Subscribe to `partner`, replacing any current subscription, and enter
    /// `Loading`. The partner's unread counter is cleared and persisted here.
    pub fn begin_select(&mut self, partner: UserId) -> Subscription {
        self.generation += 1;
        let subscription = Subscription { partner: partner.clone(), generation: self.generation };

        self.subscription = Some(subscription.clone());
        self.phase = ConversationPhase::Loading;
        self.messages.clear();
        self.buffered.clear();

        if self.unread.clear(&partner) {
            self.persist_unread();
        }
        debug!(%partner, generation = self.generation, "client: conversation selected");
        subscription
    }

    /// Apply a history result. Returns `false` (and changes nothing) if
    /// `subscription` is no longer current.
    pub fn finish_load(&mut self, subscription: &Subscription, history: Vec<Message>) -> bool {
        if self.subscription.as_ref() != Some(subscription) || self.phase != ConversationPhase::Loading {
            debug!(partner = %subscription.partner, generation = subscription.generation, "client: stale history discarded");
            return false;
        }

        let mut seen: HashSet<Uuid> = history.iter().map(|m| m.id).collect();
        self.messages = history;
        for message in std::mem::take(&mut self.buffered) {
            if seen.insert(message.id) {
                self.messages.push(message);
            }
        }
        self.phase = ConversationPhase::Ready;
        true
    }

    /// Select `partner` and load its history from `source`. A failed fetch
    /// still leaves the conversation `Ready` with whatever was buffered.
    ///
    /// # Errors
    ///
    /// Returns the fetch error after settling the state.
    pub async fn select_conversation(&mut self, partner: UserId, source: &dyn HistorySource) -> Result<(), ClientError> {
        let subscription = self.begin_select(partner);
        match source.history(&self.me, subscription.partner()).await {
            Ok(history) => {
                self.finish_load(&subscription, history);
                Ok(())
            }
            Err(e) => {
                warn!(partner = %subscription.partner, error = %e, "client: history fetch failed");
                self.finish_load(&subscription, Vec::new());
                Err(e)
            }
        }
    }

    /// Unsubscribe and return to `Unselected`.
    pub fn close_conversation(&mut self) {
        self.subscription = None;
        self.phase = ConversationPhase::Unselected;
        self.messages.clear();
        self.buffered.clear();
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Apply one server event. Returns whether visible state changed.
    pub fn apply(&mut self, event: &ClientEvent) -> bool {
        match event {
            ClientEvent::NewMessage(message) => self.on_new_message(message),
            ClientEvent::PresenceChanged { online, epoch } => self.on_presence(online, *epoch),
            ClientEvent::Connected { .. } => {
                self.presence_epoch = None;
                false
            }
            ClientEvent::HeartbeatAck => false,
            ClientEvent::GatewayError { code, message } => {
                warn!(%code, %message, "client: gateway error");
                false
            }
        }
    }

    /// Record a message this client just sent, so it shows without a push.
    pub fn record_sent(&mut self, message: &Message) {
        self.promote(&message.receiver_id);
        if self.partner() == Some(&message.receiver_id) {
            self.push_to_conversation(message);
        }
    }

    fn on_new_message(&mut self, message: &Message) -> bool {
        let sender = &message.sender_id;
        if self.partner() == Some(sender) {
            self.push_to_conversation(message);
            return true;
        }

        let count = self.unread.increment(sender);
        self.persist_unread();
        self.promote(sender);
        debug!(%sender, unread = count, "client: unread bumped");
        true
    }

    fn push_to_conversation(&mut self, message: &Message) {
        match self.phase {
            ConversationPhase::Ready => {
                if !self.messages.iter().any(|m| m.id == message.id) {
                    self.messages.push(message.clone());
                }
            }
            ConversationPhase::Loading => self.buffered.push(message.clone()),
            ConversationPhase::Unselected => {}
        }
    }

    fn on_presence(&mut self, online: &BTreeSet<UserId>, epoch: u64) -> bool {
        if self.presence_epoch.is_some_and(|current| epoch < current) {
            debug!(epoch, current = ?self.presence_epoch, "client: stale presence ignored");
            return false;
        }
        self.presence_epoch = Some(epoch);
        self.online.clone_from(online);
        true
    }

    fn persist_unread(&self) {
        if let Err(e) = self.unread_store.save(&self.me, &self.unread) {
            warn!(error = %e, "client: failed to persist unread counters");
        }
    }
}

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod tests;
