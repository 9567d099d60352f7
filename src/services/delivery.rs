//! Delivery router: best-effort push of persisted messages.
//!
//! DESIGN
//! ======
//! `deliver` runs once per successful store write, after the write is
//! confirmed. It pushes one `message:new` frame to every live handle of the
//! receiver (multi-device fan-out). An offline receiver is a silent no-op:
//! no retry, no queue, no error back to the sender. History fetch is the
//! only recovery path.
//!
//! Pushes go into each session's FIFO queue in call order, so sequential
//! sends between one pair arrive in persistence order.

use tracing::{debug, warn};

use crate::frame::Frame;
use crate::model::Message;
use crate::services::presence;
use crate::services::registry::{PresenceRegistry, PushError};

/// What happened to one `deliver` call. Used for logging and tests only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Frames queued on receiver connections.
    pub pushed: usize,
    /// Frames dropped because a receiver queue was full.
    pub dropped: usize,
    /// Receiver connections found closed and evicted.
    pub evicted: usize,
}

impl DeliveryReport {
    /// Receiver had no live connection at lookup time.
    #[must_use]
    pub fn is_miss(&self) -> bool {
        self.pushed == 0 && self.dropped == 0 && self.evicted == 0
    }
}

/// Push `message` to every connection of its receiver.
pub fn deliver(registry: &PresenceRegistry, message: &Message) -> DeliveryReport {
    let receiver = &message.receiver_id;
    let handles = registry.lookup(receiver);
    let mut report = DeliveryReport::default();

    if handles.is_empty() {
        debug!(message_id = %message.id, %receiver, "delivery: receiver offline");
        return report;
    }

    let frame = Frame::new_message(message);
    let mut stale = Vec::new();

    // A failure on one handle never stops the others.
    for handle in handles {
        match handle.push(frame.clone()) {
            Ok(()) => report.pushed += 1,
            Err(PushError::QueueFull) => {
                warn!(message_id = %message.id, %receiver, handle_id = %handle.id(), "delivery: queue full, dropped");
                report.dropped += 1;
            }
            Err(PushError::Closed) => {
                report.evicted += 1;
                stale.push((receiver.clone(), handle.id()));
            }
        }
    }

    if let Some(snapshot) = presence::evict_stale(registry, stale) {
        presence::broadcast_presence(registry, &snapshot);
    }

    debug!(
        message_id = %message.id,
        %receiver,
        pushed = report.pushed,
        dropped = report.dropped,
        evicted = report.evicted,
        "delivery: done"
    );
    report
}

#[cfg(test)]
#[path = "delivery_test.rs"]
mod tests;
