//! Presence broadcaster: full online-set fan-out on membership change.
//!
//! DESIGN
//! ======
//! `connect` / `disconnect` are the only entry points sessions use. They
//! mutate the registry and, iff the online set changed, push a
//! `presence:changed` frame built from the snapshot the registry captured
//! atomically with the mutation. Extra handles of an online identity never
//! re-broadcast; the new handle alone is sent the current set.
//!
//! Every broadcast carries the whole set plus its epoch. A client that missed
//! frames converges on the next one, and a client that receives two
//! snapshots out of order keeps the higher epoch.
//!
//! ERROR HANDLING
//! ==============
//! A closed handle found during fan-out is a stale handle: it is unregistered
//! through the same path as a graceful disconnect. If that empties an
//! identity, one follow-up broadcast carries the newest snapshot.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::Frame;
use crate::model::UserId;
use crate::services::registry::{
    ConnectionHandle, PresenceRegistry, PresenceSnapshot, PushError, Registration, Unregistration,
};

/// Register a connection and broadcast if `identity` just came online.
pub fn connect(registry: &PresenceRegistry, identity: &UserId, handle: ConnectionHandle) -> Registration {
    let handle_id = handle.id();
    let registration = registry.register(identity, handle.clone());
    match &registration {
        Registration::Joined(snapshot) => {
            info!(%identity, %handle_id, online = snapshot.online.len(), "presence: identity online");
            broadcast_presence(registry, snapshot);
        }
        Registration::AlreadyOnline => {
            // Nobody else's view changed; only the new connection needs the set.
            let (epoch, online) = registry.online_at_epoch();
            debug!(%identity, %handle_id, epoch, "presence: additional connection");
            if let Err(e) = handle.push(Frame::presence_changed(&online, epoch)) {
                warn!(%identity, %handle_id, error = %e, "presence: initial snapshot not queued");
            }
        }
        Registration::Duplicate => {
            debug!(%identity, %handle_id, "presence: duplicate registration ignored");
        }
    }
    registration
}

/// Unregister a connection and broadcast if `identity` just went offline.
pub fn disconnect(registry: &PresenceRegistry, identity: &UserId, handle_id: Uuid) -> Unregistration {
    let unregistration = registry.unregister(identity, handle_id);
    match &unregistration {
        Unregistration::Left(snapshot) => {
            info!(%identity, %handle_id, online = snapshot.online.len(), "presence: identity offline");
            broadcast_presence(registry, snapshot);
        }
        Unregistration::StillOnline => {
            debug!(%identity, %handle_id, "presence: connection closed, identity still online");
        }
        Unregistration::NotRegistered => {
            debug!(%identity, %handle_id, "presence: duplicate unregistration ignored");
        }
    }
    unregistration
}

/// Push `snapshot` to every recipient it lists. Returns frames queued,
/// including any follow-up broadcast caused by evicting stale handles.
pub fn broadcast_presence(registry: &PresenceRegistry, snapshot: &PresenceSnapshot) -> usize {
    let mut queued = 0;
    let mut next = fan_out(snapshot, &mut queued)
        .and_then(|stale| evict_stale(registry, stale));

    while let Some(snapshot) = next {
        next = fan_out(&snapshot, &mut queued).and_then(|stale| evict_stale(registry, stale));
    }
    queued
}

/// Push one snapshot; return the stale handles it found, if any.
fn fan_out(snapshot: &PresenceSnapshot, queued: &mut usize) -> Option<Vec<(UserId, Uuid)>> {
    let frame = Frame::presence_changed(&snapshot.online, snapshot.epoch);
    let mut stale = Vec::new();

    for (identity, handle) in &snapshot.recipients {
        match handle.push(frame.clone()) {
            Ok(()) => *queued += 1,
            Err(PushError::QueueFull) => {
                warn!(%identity, handle_id = %handle.id(), epoch = snapshot.epoch, "presence: queue full, snapshot dropped");
            }
            Err(PushError::Closed) => stale.push((identity.clone(), handle.id())),
        }
    }

    if stale.is_empty() { None } else { Some(stale) }
}

/// Unregister handles whose transport is gone. Returns the newest snapshot
/// if any identity went offline as a result.
pub(crate) fn evict_stale(registry: &PresenceRegistry, stale: Vec<(UserId, Uuid)>) -> Option<PresenceSnapshot> {
    let mut latest: Option<PresenceSnapshot> = None;
    for (identity, handle_id) in stale {
        warn!(%identity, %handle_id, "presence: evicting stale connection");
        if let Unregistration::Left(snapshot) = registry.unregister(&identity, handle_id) {
            if latest.as_ref().is_none_or(|l| snapshot.epoch > l.epoch) {
                latest = Some(snapshot);
            }
        }
    }
    latest
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
