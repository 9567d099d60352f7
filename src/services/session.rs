//! Connection session lifecycle.
//!
//! ARCHITECTURE
//! ============
//! One `Session` per transport connection, driven by the websocket task:
//!
//! ```text
//! Connecting --authenticate+activate--> Active --close--> Closing --> Closed
//!      \--------------- auth failure / early close ----------------> Closed
//! ```
//!
//! `activate` registers the connection handle with the presence registry
//! (broadcasting iff the identity newly came online). `close` unregisters
//! before teardown completes, so no broadcast can list a handle whose
//! transport is already gone. `close` is idempotent; disconnect signals can
//! fire more than once for one transport.
//!
//! Liveness: every inbound frame calls `touch`. The driver force-closes the
//! session when `idle_deadline` passes.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::model::UserId;
use crate::services::auth::{AuthError, ConnectionMetadata, IdentityResolver};
use crate::services::presence;
use crate::services::registry::{ConnectionHandle, PresenceRegistry, Registration, Unregistration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session left `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or the stream ended.
    ClientClosed,
    /// Read or write on the transport failed.
    TransportError,
    /// No inbound frame within the idle window.
    IdleTimeout,
    /// Server is shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::IdleTimeout => "idle_timeout",
            Self::Shutdown => "shutdown",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unauthenticated connection: {0}")]
    UnauthenticatedConnection(#[source] AuthError),
    #[error("session cannot go from {from:?} to {to:?}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },
}

impl crate::frame::ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnauthenticatedConnection(_) => "E_UNAUTHENTICATED",
            Self::InvalidTransition { .. } => "E_SESSION_STATE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::UnauthenticatedConnection(AuthError::Database(_)))
    }
}

pub struct Session {
    phase: SessionPhase,
    identity: Option<UserId>,
    handle_id: Option<Uuid>,
    idle_timeout: Duration,
    last_seen: Instant,
}

impl Session {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            phase: SessionPhase::Connecting,
            identity: None,
            handle_id: None,
            idle_timeout,
            last_seen: Instant::now(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn handle_id(&self) -> Option<Uuid> {
        self.handle_id
    }

    /// Resolve the connection's identity. On failure the session is closed
    /// and must never be registered.
    ///
    /// # Errors
    ///
    /// `UnauthenticatedConnection` if the resolver rejects the metadata,
    /// `InvalidTransition` if the session is past `Connecting`.
    pub async fn authenticate(
        &mut self,
        resolver: &dyn IdentityResolver,
        metadata: &ConnectionMetadata,
    ) -> Result<UserId, SessionError> {
        self.expect_phase(SessionPhase::Connecting, SessionPhase::Connecting)?;
        match resolver.resolve(metadata).await {
            Ok(identity) => {
                self.identity = Some(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                self.phase = SessionPhase::Closed;
                Err(SessionError::UnauthenticatedConnection(e))
            }
        }
    }

    /// Register `handle` under the resolved identity and go `Active`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the session is `Connecting` with an identity.
    pub fn activate(&mut self, registry: &PresenceRegistry, handle: ConnectionHandle) -> Result<Registration, SessionError> {
        self.expect_phase(SessionPhase::Connecting, SessionPhase::Active)?;
        let Some(identity) = self.identity.clone() else {
            return Err(SessionError::InvalidTransition { from: self.phase, to: SessionPhase::Active });
        };

        self.handle_id = Some(handle.id());
        let registration = presence::connect(registry, &identity, handle);
        self.phase = SessionPhase::Active;
        self.touch();
        info!(%identity, handle_id = ?self.handle_id, "session: active");
        Ok(registration)
    }

    /// Record inbound activity.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Instant after which the session counts as idle.
    #[must_use]
    pub fn idle_deadline(&self) -> Instant {
        self.last_seen + self.idle_timeout
    }

    /// Tear the session down. Returns `true` only for the call that actually
    /// unregistered; later calls are no-ops.
    pub fn close(&mut self, registry: &PresenceRegistry, reason: CloseReason) -> bool {
        match self.phase {
            SessionPhase::Closed | SessionPhase::Closing => false,
            SessionPhase::Connecting => {
                self.phase = SessionPhase::Closed;
                false
            }
            SessionPhase::Active => {
                self.phase = SessionPhase::Closing;
                let unregistered = match (&self.identity, self.handle_id) {
                    (Some(identity), Some(handle_id)) => {
                        let outcome = presence::disconnect(registry, identity, handle_id);
                        info!(%identity, %handle_id, %reason, "session: closed");
                        !matches!(outcome, Unregistration::NotRegistered)
                    }
                    _ => false,
                };
                self.phase = SessionPhase::Closed;
                unregistered
            }
        }
    }

    fn expect_phase(&self, expected: SessionPhase, to: SessionPhase) -> Result<(), SessionError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition { from: self.phase, to })
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
