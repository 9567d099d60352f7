//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! The presence registry is the only shared mutable resource; the store and
//! identity resolver are external collaborators behind trait objects so
//! tests can swap in in-memory versions. `shutdown` flips once when the
//! process is stopping; every websocket session watches it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::services::auth::IdentityResolver;
use crate::services::registry::PresenceRegistry;
use crate::services::store::MessageStore;

/// Per-session limits taken from config at startup.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub idle_timeout: Duration,
    pub queue_capacity: usize,
}

impl From<&ServerConfig> for SessionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self { idle_timeout: config.idle_timeout, queue_capacity: config.client_queue_capacity }
    }
}

/// Shared application state. Clone is required by Axum; every field is
/// Arc-backed.
#[derive(Clone)]
pub struct AppState {
    pub registry: PresenceRegistry,
    pub store: Arc<dyn MessageStore>,
    pub auth: Arc<dyn IdentityResolver>,
    pub limits: SessionLimits,
    pub shutdown: watch::Sender<bool>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, auth: Arc<dyn IdentityResolver>, limits: SessionLimits) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { registry: PresenceRegistry::new(), store, auth, limits, shutdown }
    }

    /// Signal every live session to close with `CloseReason::Shutdown`.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
