use super::*;
use crate::frame::{Frame, SYSCALL_NEW_MESSAGE};
use crate::services::auth::QueryParamResolver;
use crate::services::registry::ConnectionHandle;
use crate::services::store::MessageStore;
use crate::state::{SessionLimits, test_helpers};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn create(&self, _: &UserId, _: &UserId, _: MessageContent) -> Result<Message, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn conversation(&self, _: &UserId, _: &UserId) -> Result<Vec<Message>, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

fn user(raw: &str) -> UserId {
    UserId::new(raw)
}

fn connect(state: &AppState, identity: &str) -> mpsc::Receiver<Frame> {
    let (tx, rx) = mpsc::channel(16);
    state.registry.register(&user(identity), ConnectionHandle::new(tx));
    rx
}

#[tokio::test]
async fn send_persists_and_pushes_to_receiver() {
    let state = test_helpers::test_app_state();
    let mut rx = connect(&state, "bob");

    let message = send_message(&state, &user("alice"), &user("bob"), MessageContent::text(" hi "))
        .await
        .expect("send should succeed");

    assert_eq!(message.content.text.as_deref(), Some("hi"));
    let frame = rx.try_recv().expect("receiver should get a push");
    assert_eq!(frame.syscall, SYSCALL_NEW_MESSAGE);
    assert_eq!(frame.from.as_deref(), Some("alice"));
    assert!(rx.try_recv().is_err(), "exactly one push per send");

    let history = conversation(&state, &user("bob"), &user("alice")).await.expect("history");
    assert_eq!(history, vec![message]);
}

#[tokio::test]
async fn send_to_offline_receiver_still_persists() {
    let state = test_helpers::test_app_state();

    let message = send_message(&state, &user("alice"), &user("bob"), MessageContent::text("later"))
        .await
        .expect("offline receiver is not an error");

    let history = conversation(&state, &user("alice"), &user("bob")).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, message.id);
}

#[tokio::test]
async fn blank_content_is_rejected_before_store() {
    let state = test_helpers::test_app_state();
    let mut rx = connect(&state, "bob");

    let err = send_message(&state, &user("alice"), &user("bob"), MessageContent::text("   "))
        .await
        .expect_err("blank content must fail");

    assert!(matches!(err, SendError::EmptyContent));
    assert_eq!(err.error_code(), "E_EMPTY_MESSAGE");
    assert!(!err.retryable());
    assert!(rx.try_recv().is_err());
    assert!(conversation(&state, &user("alice"), &user("bob")).await.expect("history").is_empty());
}

#[tokio::test]
async fn failed_write_delivers_nothing() {
    let state = AppState::new(
        Arc::new(FailingStore),
        Arc::new(QueryParamResolver::new("user_id")),
        SessionLimits { idle_timeout: Duration::from_secs(30), queue_capacity: 8 },
    );
    let mut rx = connect(&state, "bob");

    let err = send_message(&state, &user("alice"), &user("bob"), MessageContent::text("hi"))
        .await
        .expect_err("store failure must surface");

    assert!(matches!(err, SendError::Store(_)));
    assert_eq!(err.error_code(), "E_DATABASE");
    assert!(err.retryable());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn sequential_sends_arrive_in_persistence_order() {
    let state = test_helpers::test_app_state();
    let mut rx = connect(&state, "bob");

    let mut sent = Vec::new();
    for text in ["one", "two", "three"] {
        sent.push(
            send_message(&state, &user("alice"), &user("bob"), MessageContent::text(text))
                .await
                .expect("send")
                .id
                .to_string(),
        );
    }

    let mut received = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        received.push(frame.data.get("id").and_then(|v| v.as_str()).map(str::to_owned).expect("message id"));
    }
    assert_eq!(received, sent);
}
