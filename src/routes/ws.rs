//! WebSocket handler: one connection session per socket.
//!
//! DESIGN
//! ======
//! Identity is resolved before the upgrade; an unauthenticated request gets
//! a 401 and never reaches the registry. After the upgrade the task sends
//! `session:connected`, activates the session (register + presence
//! broadcast), then runs a `select!` loop over:
//! - inbound client frames (any frame, ping or pong resets the idle timer)
//! - pushes queued on this connection's handle by delivery and presence
//! - the idle deadline
//! - process shutdown
//!
//! Every outbound write is bounded by the idle deadline. A peer that stops
//! reading fills its TCP window and stalls the write; when the deadline
//! passes the session closes as idle and is unregistered like any other.
//!
//! LIFECYCLE
//! =========
//! 1. Handshake → resolve identity or 401
//! 2. Upgrade → send `session:connected` with `client_id`
//! 3. Activate → registry register, broadcast if newly online
//! 4. Loop until close, transport error, idle timeout, or shutdown
//! 5. Close → unregister (broadcast if last handle) → drop transport

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{
    Data, ErrorCode, FRAME_CODE, FRAME_MESSAGE, Frame, SYSCALL_GATEWAY_ERROR, SYSCALL_HEARTBEAT, SYSCALL_SESSION_CONNECTED,
    Status,
};
use crate::model::UserId;
use crate::routes::auth::auth_error_status;
use crate::services::auth::ConnectionMetadata;
use crate::services::registry::ConnectionHandle;
use crate::services::session::{CloseReason, Session, SessionError};
use crate::state::AppState;

/// Upper bound on sending the final close frame to a peer.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Inbound frames the gateway could not handle.
#[derive(Debug, thiserror::Error)]
enum InboundError {
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
}

impl ErrorCode for InboundError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "E_INVALID_FRAME",
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
        }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(metadata): Query<ConnectionMetadata>,
    ws: WebSocketUpgrade,
) -> Response {
    let mut session = Session::new(state.limits.idle_timeout);

    match session.authenticate(state.auth.as_ref(), &metadata).await {
        Ok(_) => {}
        Err(SessionError::UnauthenticatedConnection(e)) => {
            warn!(error = %e, "ws: connection refused");
            return (auth_error_status(&e), e.to_string()).into_response();
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }

    ws.on_upgrade(move |socket| run_ws(socket, state, session))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, mut session: Session) {
    let Some(user_id) = session.identity().cloned() else {
        return;
    };

    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.limits.queue_capacity);
    let handle = ConnectionHandle::new(client_tx);
    let client_id = handle.id();
    session.touch();

    let welcome = Frame::request(SYSCALL_SESSION_CONNECTED, Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", user_id.as_str());
    if let Err(reason) = send_before(&mut socket, &[welcome], session.idle_deadline()).await {
        debug!(%client_id, %user_id, %reason, "ws: welcome not delivered");
        session.close(&state.registry, reason);
        return;
    }

    if let Err(e) = session.activate(&state.registry, handle) {
        warn!(%client_id, %user_id, error = %e, "ws: activation failed");
        return;
    }
    info!(%client_id, %user_id, "ws: client connected");

    let mut shutdown = state.shutdown.subscribe();
    let reason = if state.is_shutting_down() {
        CloseReason::Shutdown
    } else {
        loop {
            let idle = tokio::time::sleep_until(session.idle_deadline());
            tokio::select! {
                msg = socket.recv() => {
                    let msg = match msg {
                        None => break CloseReason::ClientClosed,
                        Some(Err(e)) => {
                            debug!(%client_id, error = %e, "ws: receive failed");
                            break CloseReason::TransportError;
                        }
                        Some(Ok(msg)) => msg,
                    };
                    session.touch();
                    match msg {
                        Message::Text(text) => {
                            let replies = process_inbound_text(&user_id, client_id, text.as_str());
                            if let Err(reason) = send_before(&mut socket, &replies, session.idle_deadline()).await {
                                break reason;
                            }
                        }
                        Message::Close(_) => break CloseReason::ClientClosed,
                        _ => {}
                    }
                }
                Some(frame) = client_rx.recv() => {
                    if let Err(reason) = send_before(&mut socket, &[frame], session.idle_deadline()).await {
                        break reason;
                    }
                }
                () = idle => break CloseReason::IdleTimeout,
                _ = shutdown.changed() => break CloseReason::Shutdown,
            }
        }
    };

    // Unregister before the transport goes away.
    session.close(&state.registry, reason);

    if matches!(reason, CloseReason::IdleTimeout | CloseReason::Shutdown) {
        let code = if reason == CloseReason::Shutdown { close_code::RESTART } else { close_code::AWAY };
        let close = CloseFrame { code, reason: reason.to_string().into() };
        match tokio::time::timeout(CLOSE_GRACE, socket.send(Message::Close(Some(close)))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(%client_id, error = %e, "ws: close frame not sent"),
            Err(_) => debug!(%client_id, "ws: close frame timed out"),
        }
    }
    info!(%client_id, %user_id, %reason, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse one inbound text frame and return frames for the sender.
fn process_inbound_text(user_id: &UserId, client_id: Uuid, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = InboundError::InvalidJson(e.to_string());
            return vec![
                Frame::request(SYSCALL_GATEWAY_ERROR, Data::new())
                    .with_data(FRAME_CODE, err.error_code())
                    .with_data(FRAME_MESSAGE, err.to_string()),
            ];
        }
    };

    // Stamp the authenticated identity as `from`.
    req.from = Some(user_id.to_string());

    if req.status != Status::Request {
        debug!(%client_id, id = %req.id, syscall = %req.syscall, "ws: ignoring non-request frame");
        return vec![];
    }

    match req.syscall.as_str() {
        SYSCALL_HEARTBEAT => vec![req.done()],
        other => {
            warn!(%client_id, syscall = %other, "ws: unknown syscall");
            let mut err = req.error_from(&InboundError::UnknownSyscall(other.to_owned()));
            err.syscall = SYSCALL_GATEWAY_ERROR.to_owned();
            vec![err]
        }
    }
}

/// Send `frames` in order, giving up at `deadline`. The error is the reason
/// the session should close with.
async fn send_before(socket: &mut WebSocket, frames: &[Frame], deadline: Instant) -> Result<(), CloseReason> {
    match tokio::time::timeout_at(deadline, send_all(socket, frames)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(())) => Err(CloseReason::TransportError),
        Err(_) => {
            warn!(pending = frames.len(), "ws: peer not reading, send timed out");
            Err(CloseReason::IdleTimeout)
        }
    }
}

async fn send_all(socket: &mut WebSocket, frames: &[Frame]) -> Result<(), ()> {
    for frame in frames {
        send_frame(socket, frame).await?;
    }
    Ok(())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };

    if frame.status == Status::Error {
        let code = frame.data.get(FRAME_CODE).and_then(|v| v.as_str()).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, "ws: send frame status=Error");
    } else {
        debug!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }

    socket.send(Message::Text(json.into())).await.map_err(|e| {
        debug!(error = %e, "ws: send failed");
    })
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
