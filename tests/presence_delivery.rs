//! End-to-end: real router on an ephemeral port, real websocket and HTTP
//! clients.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use courier::client::api::MessagesApi;
use courier::client::socket::ClientSocket;
use courier::client::unread::MemoryUnreadStore;
use courier::client::{ChatClient, ChatUpdate, ClientConfig, ClientError, ClientEvent, ConversationPhase};
use courier::config::ServerConfig;
use courier::model::{MessageContent, UserId};
use courier::routes;
use courier::services::auth::QueryParamResolver;
use courier::services::messages;
use courier::services::store::MemoryMessageStore;
use courier::state::{AppState, SessionLimits};
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

async fn spawn_server(idle_timeout: Duration) -> (SocketAddr, AppState) {
    let state = AppState::new(
        Arc::new(MemoryMessageStore::new()),
        Arc::new(QueryParamResolver::new("user_id")),
        SessionLimits { idle_timeout, queue_capacity: 64 },
    );
    let app = routes::app(state.clone(), &ServerConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    (addr, state)
}

fn user(raw: &str) -> UserId {
    UserId::new(raw)
}

fn auth(raw: &str) -> Vec<(String, String)> {
    vec![("user_id".to_owned(), raw.to_owned())]
}

fn set(ids: &[&str]) -> BTreeSet<UserId> {
    ids.iter().map(|id| user(id)).collect()
}

async fn open(addr: SocketAddr, who: &str) -> ClientSocket {
    ClientSocket::connect(&format!("ws://{addr}"), &auth(who)).await.expect("socket should connect")
}

async fn next(socket: &mut ClientSocket) -> ClientEvent {
    timeout(RECV_TIMEOUT, socket.next_event())
        .await
        .expect("event receive timed out")
        .expect("socket error")
        .expect("socket closed unexpectedly")
}

/// Consume `session:connected` and the first presence snapshot.
async fn handshake(socket: &mut ClientSocket) -> BTreeSet<UserId> {
    assert!(matches!(next(socket).await, ClientEvent::Connected { .. }));
    match next(socket).await {
        ClientEvent::PresenceChanged { online, .. } => online,
        other => panic!("expected presence snapshot, got {other:?}"),
    }
}

async fn assert_quiet(socket: &mut ClientSocket) {
    assert!(timeout(Duration::from_millis(150), socket.next_event()).await.is_err(), "expected no further events");
}

async fn drive_until(client: &mut ChatClient, mut done: impl FnMut(&ChatUpdate) -> bool) {
    let deadline = Instant::now() + RECV_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let update = timeout(remaining, client.next_update())
            .await
            .expect("client update timed out")
            .expect("client error")
            .expect("socket closed unexpectedly");
        if done(&update) {
            return;
        }
    }
}

// =============================================================================
// admission
// =============================================================================

#[tokio::test]
async fn unauthenticated_handshake_is_refused_with_401() {
    let (addr, state) = spawn_server(Duration::from_secs(30)).await;

    let result = ClientSocket::connect(&format!("ws://{addr}"), &[]).await;

    match result {
        Err(ClientError::Socket(e)) => match *e {
            tungstenite::Error::Http(response) => assert_eq!(response.status().as_u16(), 401),
            other => panic!("expected HTTP rejection, got {other:?}"),
        },
        Err(other) => panic!("expected socket error, got {other:?}"),
        Ok(_) => panic!("unauthenticated socket must be refused"),
    }
    assert_eq!(state.registry.connection_count(), 0);
}

#[tokio::test]
async fn session_connected_comes_before_presence() {
    let (addr, _state) = spawn_server(Duration::from_secs(30)).await;
    let mut alice = open(addr, "alice").await;

    match next(&mut alice).await {
        ClientEvent::Connected { user_id, client_id } => {
            assert_eq!(user_id, user("alice"));
            assert!(!client_id.is_empty());
        }
        other => panic!("expected session:connected, got {other:?}"),
    }
    assert!(matches!(next(&mut alice).await, ClientEvent::PresenceChanged { .. }));
}

#[tokio::test]
async fn heartbeat_is_acknowledged() {
    let (addr, _state) = spawn_server(Duration::from_secs(30)).await;
    let mut alice = open(addr, "alice").await;
    handshake(&mut alice).await;

    alice.heartbeat().await.expect("heartbeat");

    assert_eq!(next(&mut alice).await, ClientEvent::HeartbeatAck);
}

// =============================================================================
// delivery
// =============================================================================

#[tokio::test]
async fn each_receiver_connection_gets_exactly_one_push() {
    let (addr, _state) = spawn_server(Duration::from_secs(30)).await;
    let mut tab1 = open(addr, "alice").await;
    handshake(&mut tab1).await;
    let mut tab2 = open(addr, "alice").await;
    assert_eq!(handshake(&mut tab2).await, set(&["alice"]));
    assert_quiet(&mut tab1).await;

    let bob = MessagesApi::new(format!("http://{addr}"), auth("bob"));
    let sent = bob.send(&user("alice"), &MessageContent::text("hi both")).await.expect("send");

    for tab in [&mut tab1, &mut tab2] {
        assert_eq!(next(&mut *tab).await, ClientEvent::NewMessage(sent.clone()));
        assert_quiet(tab).await;
    }
}

#[tokio::test]
async fn offline_receiver_still_gets_created_and_history() {
    let (addr, _state) = spawn_server(Duration::from_secs(30)).await;
    let bob = MessagesApi::new(format!("http://{addr}"), auth("bob"));
    let alice = MessagesApi::new(format!("http://{addr}"), auth("alice"));

    let sent = bob.send(&user("alice"), &MessageContent::text("while you were out")).await.expect("send");

    assert_eq!(alice.conversation(&user("bob")).await.expect("history"), vec![sent]);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let (addr, _state) = spawn_server(Duration::from_secs(30)).await;
    let bob = MessagesApi::new(format!("http://{addr}"), auth("bob"));

    match bob.send(&user("alice"), &MessageContent::default()).await {
        Err(ClientError::Status { status, .. }) => assert_eq!(status, 400),
        other => panic!("expected 400, got {other:?}"),
    }
}

// =============================================================================
// presence
// =============================================================================

#[tokio::test]
async fn last_broadcast_after_a_leaves_is_just_b() {
    let (addr, state) = spawn_server(Duration::from_secs(30)).await;
    let mut a = open(addr, "alice").await;
    handshake(&mut a).await;
    let mut b = open(addr, "bob").await;
    assert_eq!(handshake(&mut b).await, set(&["alice", "bob"]));

    a.close().await.expect("close");

    match next(&mut b).await {
        ClientEvent::PresenceChanged { online, .. } => assert_eq!(online, set(&["bob"])),
        other => panic!("expected presence, got {other:?}"),
    }
    assert!(!state.registry.is_online(&user("alice")));

    let api = MessagesApi::new(format!("http://{addr}"), auth("bob"));
    assert_eq!(api.presence().await.expect("presence").online, vec![user("bob")]);
}

#[tokio::test]
async fn idle_session_is_unregistered_once_with_one_broadcast() {
    let (addr, state) = spawn_server(Duration::from_millis(400)).await;
    let mut idle = open(addr, "alice").await;
    handshake(&mut idle).await;
    let mut bob = open(addr, "bob").await;
    assert_eq!(handshake(&mut bob).await, set(&["alice", "bob"]));

    // Bob stays alive with heartbeats; Alice sends nothing.
    let mut snapshots = Vec::new();
    let deadline = Instant::now() + Duration::from_millis(1500);
    while Instant::now() < deadline {
        bob.heartbeat().await.expect("heartbeat");
        if let Ok(Ok(Some(ClientEvent::PresenceChanged { online, .. }))) =
            timeout(Duration::from_millis(100), bob.next_event()).await
        {
            snapshots.push(online);
        }
    }

    assert_eq!(snapshots, vec![set(&["bob"])]);
    assert!(!state.registry.is_online(&user("alice")));
    assert_eq!(state.registry.connection_count(), 1);

    // Alice's socket still holds Bob's join snapshot, then the close.
    let closed = timeout(RECV_TIMEOUT, async {
        while let Ok(Some(_)) = idle.next_event().await {}
    })
    .await;
    assert!(closed.is_ok(), "idle socket should be closed by the server");
}

#[tokio::test]
async fn peer_that_stops_reading_is_unregistered_after_idle_window() {
    let (addr, state) = spawn_server(Duration::from_millis(500)).await;
    // Bob completes the handshake, then never reads or writes again.
    let stalled = open(addr, "bob").await;
    let deadline = Instant::now() + RECV_TIMEOUT;
    while !state.registry.is_online(&user("bob")) {
        assert!(Instant::now() < deadline, "bob never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Enough to fill both socket buffers and the per-connection queue.
    let payload = "x".repeat(1 << 20);
    for _ in 0..60 {
        messages::send_message(&state, &user("alice"), &user("bob"), MessageContent::text(payload.as_str()))
            .await
            .expect("send");
    }

    let deadline = Instant::now() + Duration::from_secs(3);
    while state.registry.is_online(&user("bob")) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!state.registry.is_online(&user("bob")), "stalled peer still registered after idle window");
    assert_eq!(state.registry.connection_count(), 0);
    drop(stalled);
}

// =============================================================================
// client reconciliation over the wire
// =============================================================================

#[tokio::test]
async fn unread_counts_while_viewing_someone_else_then_clear_on_open() {
    let (addr, _state) = spawn_server(Duration::from_secs(30)).await;
    let base = format!("http://{addr}");
    let config = ClientConfig::with_user_id(base.clone(), "alice").with_contacts([user("carol"), user("dave")]);
    let mut alice = ChatClient::connect(config, Arc::new(MemoryUnreadStore::new()))
        .await
        .expect("client should connect");
    assert_eq!(alice.state().recent_contacts(), [user("carol"), user("dave")]);
    drive_until(&mut alice, |u| matches!(u, ChatUpdate::Event(ClientEvent::PresenceChanged { .. }))).await;

    alice.select(user("carol"));
    drive_until(&mut alice, |u| matches!(u, ChatUpdate::HistoryLoaded { applied: true, .. })).await;
    assert_eq!(alice.state().phase(), ConversationPhase::Ready);

    let bob = MessagesApi::new(base, auth("bob"));
    for text in ["one", "two", "three"] {
        bob.send(&user("alice"), &MessageContent::text(text)).await.expect("send");
    }
    let mut pushes = 0;
    drive_until(&mut alice, |u| {
        if matches!(u, ChatUpdate::Event(ClientEvent::NewMessage(_))) {
            pushes += 1;
        }
        pushes == 3
    })
    .await;

    assert_eq!(alice.state().unread(&user("bob")), 3);
    assert!(alice.state().messages().is_empty());
    assert_eq!(alice.state().recent_contacts(), [user("bob"), user("carol"), user("dave")]);

    alice.select(user("bob"));
    assert_eq!(alice.state().unread(&user("bob")), 0);
    drive_until(&mut alice, |u| matches!(u, ChatUpdate::HistoryLoaded { applied: true, .. })).await;

    let texts: Vec<_> = alice.state().messages().iter().filter_map(|m| m.content.text.clone()).collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
}
