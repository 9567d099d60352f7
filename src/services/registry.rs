//! Presence registry: who is online, and on which connections.
//!
//! DESIGN
//! ======
//! A single `Mutex` guards `UserId -> {handle_id -> ConnectionHandle}`.
//! An identity is a key iff it has at least one live handle; removing the
//! last handle removes the key, so "online" is key existence and never a flag.
//!
//! Membership changes (identity appears / fully disappears) bump an epoch and
//! capture a `PresenceSnapshot` inside the same critical section as the
//! mutation. Broadcasts are built from that snapshot, so no broadcast can see
//! a half-applied register/unregister.
//!
//! LOCKING
//! =======
//! Critical sections are pure in-memory map work. Pushing frames happens
//! after the guard is dropped, through `ConnectionHandle::push`, which is a
//! non-blocking `try_send`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::frame::Frame;
use crate::model::UserId;

// =============================================================================
// CONNECTION HANDLE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("connection queue is full")]
    QueueFull,
    #[error("connection is closed")]
    Closed,
}

/// Send side of one live transport connection.
///
/// The session task owns the matching receiver; dropping it closes the
/// handle, and the next push reports `PushError::Closed`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { id: Uuid::new_v4(), tx }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a frame for this peer without waiting.
    ///
    /// # Errors
    ///
    /// `QueueFull` if the peer is not draining its queue, `Closed` if the
    /// session task has gone away.
    pub fn push(&self, frame: Frame) -> Result<(), PushError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => PushError::QueueFull,
            TrySendError::Closed(_) => PushError::Closed,
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Consistent view of the registry at one epoch.
#[derive(Debug, Clone)]
pub struct PresenceSnapshot {
    /// Incremented on every membership change.
    pub epoch: u64,
    pub online: BTreeSet<UserId>,
    /// Every registered handle with its owning identity.
    pub recipients: Vec<(UserId, ConnectionHandle)>,
}

/// Outcome of `PresenceRegistry::register`.
#[derive(Debug)]
pub enum Registration {
    /// Identity was offline and is now online.
    Joined(PresenceSnapshot),
    /// Another handle for an already-online identity. Online set unchanged.
    AlreadyOnline,
    /// This exact handle was already registered. No-op.
    Duplicate,
}

/// Outcome of `PresenceRegistry::unregister`.
#[derive(Debug)]
pub enum Unregistration {
    /// Last handle removed; identity is now offline.
    Left(PresenceSnapshot),
    /// Handle removed; identity still has other handles.
    StillOnline,
    /// Handle was not registered (teardown fired twice). No-op.
    NotRegistered,
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<UserId, HashMap<Uuid, ConnectionHandle>>,
    epoch: u64,
}

impl RegistryInner {
    fn snapshot(&self) -> PresenceSnapshot {
        let online = self.connections.keys().cloned().collect();
        let recipients = self
            .connections
            .iter()
            .flat_map(|(identity, handles)| handles.values().map(move |h| (identity.clone(), h.clone())))
            .collect();
        PresenceSnapshot { epoch: self.epoch, online, recipients }
    }
}

/// Process-wide presence registry. Clone is cheap; all clones share state.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `handle` to `identity`'s set, creating the set if absent.
    pub fn register(&self, identity: &UserId, handle: ConnectionHandle) -> Registration {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(handles) = inner.connections.get_mut(identity) {
            if handles.contains_key(&handle.id) {
                return Registration::Duplicate;
            }
            handles.insert(handle.id, handle);
            return Registration::AlreadyOnline;
        }

        inner
            .connections
            .insert(identity.clone(), HashMap::from([(handle.id, handle)]));
        inner.epoch += 1;
        Registration::Joined(inner.snapshot())
    }

    /// Remove one handle; drop the identity entirely when its set empties.
    pub fn unregister(&self, identity: &UserId, handle_id: Uuid) -> Unregistration {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let Some(handles) = inner.connections.get_mut(identity) else {
            return Unregistration::NotRegistered;
        };
        if handles.remove(&handle_id).is_none() {
            return Unregistration::NotRegistered;
        }
        if !handles.is_empty() {
            return Unregistration::StillOnline;
        }

        inner.connections.remove(identity);
        inner.epoch += 1;
        Unregistration::Left(inner.snapshot())
    }

    /// Current live handles for `identity`; empty when offline.
    #[must_use]
    pub fn lookup(&self, identity: &UserId) -> Vec<ConnectionHandle> {
        self.lock()
            .connections
            .get(identity)
            .map(|handles| handles.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn online_identities(&self) -> BTreeSet<UserId> {
        self.lock().connections.keys().cloned().collect()
    }

    /// Current epoch and online set, without the recipient list.
    #[must_use]
    pub fn online_at_epoch(&self) -> (u64, BTreeSet<UserId>) {
        let inner = self.lock();
        (inner.epoch, inner.connections.keys().cloned().collect())
    }

    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        self.lock().snapshot()
    }

    #[must_use]
    pub fn is_online(&self, identity: &UserId) -> bool {
        self.lock().connections.contains_key(identity)
    }

    /// Total registered handles across all identities.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().connections.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
