use super::*;
use crate::client::unread::MemoryUnreadStore;
use crate::model::MessageContent;
use std::collections::HashMap;
use std::sync::Mutex;

fn user(raw: &str) -> UserId {
    UserId::new(raw)
}

fn msg(from: &str, to: &str, text: &str) -> Message {
    Message {
        id: Uuid::new_v4(),
        sender_id: user(from),
        receiver_id: user(to),
        created_at: 0,
        content: MessageContent::text(text),
    }
}

fn state_for(me: &str) -> (ReconciliationState, Arc<MemoryUnreadStore>) {
    let store = Arc::new(MemoryUnreadStore::new());
    let state = ReconciliationState::new(user(me), store.clone()).expect("state");
    (state, store)
}

fn set(ids: &[&str]) -> BTreeSet<UserId> {
    ids.iter().map(|id| user(id)).collect()
}

/// History keyed by partner.
#[derive(Default)]
struct FakeHistory {
    conversations: Mutex<HashMap<UserId, Vec<Message>>>,
    fail: bool,
}

impl FakeHistory {
    fn with(partner: &str, messages: Vec<Message>) -> Self {
        let fake = Self::default();
        fake.conversations.lock().expect("lock").insert(user(partner), messages);
        fake
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn history(&self, _me: &UserId, partner: &UserId) -> Result<Vec<Message>, ClientError> {
        if self.fail {
            return Err(ClientError::Status { status: 500, body: "boom".into() });
        }
        Ok(self.conversations.lock().expect("lock").get(partner).cloned().unwrap_or_default())
    }
}

fn texts(state: &ReconciliationState) -> Vec<String> {
    state.messages().iter().filter_map(|m| m.content.text.clone()).collect()
}

// =============================================================================
// selection and unread reset
// =============================================================================

#[tokio::test]
async fn selecting_partner_clears_unread_from_any_starting_count() {
    for start in [0, 5] {
        let (mut state, _store) = state_for("alice");
        for _ in 0..start {
            state.apply(&ClientEvent::NewMessage(msg("bob", "alice", "x")));
        }
        assert_eq!(state.unread(&user("bob")), start);

        state.select_conversation(user("bob"), &FakeHistory::default()).await.expect("select");

        assert_eq!(state.unread(&user("bob")), 0);
    }
}

#[tokio::test]
async fn selecting_partner_clears_persisted_unread() {
    let store = Arc::new(MemoryUnreadStore::new());
    {
        let mut first = ReconciliationState::new(user("alice"), store.clone()).expect("state");
        first.apply(&ClientEvent::NewMessage(msg("bob", "alice", "1")));
        first.apply(&ClientEvent::NewMessage(msg("bob", "alice", "2")));
    }

    let mut restarted = ReconciliationState::new(user("alice"), store.clone()).expect("state");
    assert_eq!(restarted.unread(&user("bob")), 2);

    restarted.select_conversation(user("bob"), &FakeHistory::default()).await.expect("select");

    assert_eq!(restarted.unread(&user("bob")), 0);
    assert_eq!(store.load(&user("alice")).expect("load").get(&user("bob")), 0);
}

#[tokio::test]
async fn selection_loads_history_and_goes_ready() {
    let (mut state, _) = state_for("alice");
    let history = vec![msg("bob", "alice", "old"), msg("alice", "bob", "older reply")];
    let source = FakeHistory::with("bob", history.clone());

    state.select_conversation(user("bob"), &source).await.expect("select");

    assert_eq!(state.phase(), ConversationPhase::Ready);
    assert_eq!(state.partner(), Some(&user("bob")));
    assert_eq!(state.messages(), history.as_slice());
}

#[tokio::test]
async fn failed_history_fetch_still_settles() {
    let (mut state, _) = state_for("alice");
    let source = FakeHistory { fail: true, ..FakeHistory::default() };

    assert!(state.select_conversation(user("bob"), &source).await.is_err());

    assert_eq!(state.phase(), ConversationPhase::Ready);
    assert!(state.messages().is_empty());
}

// =============================================================================
// pushes
// =============================================================================

#[tokio::test]
async fn messages_from_others_while_viewing_bump_unread_only() {
    let (mut state, _) = state_for("alice");
    state
        .select_conversation(user("yuri"), &FakeHistory::with("yuri", vec![msg("yuri", "alice", "hi")]))
        .await
        .expect("select");
    let before = state.messages().to_vec();

    for i in 0..3 {
        state.apply(&ClientEvent::NewMessage(msg("xena", "alice", &format!("m{i}"))));
    }

    assert_eq!(state.unread(&user("xena")), 3);
    assert_eq!(state.messages(), before.as_slice());
    assert_eq!(state.unread(&user("yuri")), 0);
}

#[tokio::test]
async fn partner_messages_append_in_arrival_order() {
    let (mut state, _) = state_for("alice");
    state.select_conversation(user("bob"), &FakeHistory::default()).await.expect("select");

    let mut late = msg("bob", "alice", "second");
    late.created_at = 10;
    let mut early = msg("bob", "alice", "first");
    early.created_at = 5;
    state.apply(&ClientEvent::NewMessage(late));
    state.apply(&ClientEvent::NewMessage(early));

    assert_eq!(texts(&state), vec!["second", "first"]);
    assert_eq!(state.unread(&user("bob")), 0);
}

#[test]
fn pushes_during_loading_are_buffered_then_deduped() {
    let (mut state, _) = state_for("alice");
    let in_both = msg("bob", "alice", "in history and pushed");
    let only_pushed = msg("bob", "alice", "pushed during load");

    let sub = state.begin_select(user("bob"));
    state.apply(&ClientEvent::NewMessage(in_both.clone()));
    state.apply(&ClientEvent::NewMessage(only_pushed.clone()));
    assert!(state.messages().is_empty());

    assert!(state.finish_load(&sub, vec![msg("bob", "alice", "old"), in_both.clone()]));

    assert_eq!(texts(&state), vec!["old", "in history and pushed", "pushed during load"]);
}

#[test]
fn stale_history_result_is_discarded() {
    let (mut state, _) = state_for("alice");
    let old_sub = state.begin_select(user("bob"));
    let new_sub = state.begin_select(user("carol"));

    assert!(!state.finish_load(&old_sub, vec![msg("bob", "alice", "wrong conversation")]));
    assert_eq!(state.phase(), ConversationPhase::Loading);
    assert!(state.messages().is_empty());

    assert!(state.finish_load(&new_sub, vec![msg("carol", "alice", "right")]));
    assert_eq!(texts(&state), vec!["right"]);
}

#[test]
fn reselecting_same_partner_invalidates_earlier_fetch() {
    let (mut state, _) = state_for("alice");
    let first = state.begin_select(user("bob"));
    let second = state.begin_select(user("bob"));

    assert_ne!(first, second);
    assert!(!state.finish_load(&first, Vec::new()));
    assert!(state.finish_load(&second, Vec::new()));
}

#[test]
fn close_conversation_unsubscribes() {
    let (mut state, _) = state_for("alice");
    let sub = state.begin_select(user("bob"));

    state.close_conversation();

    assert_eq!(state.phase(), ConversationPhase::Unselected);
    assert!(state.partner().is_none());
    assert!(!state.finish_load(&sub, vec![msg("bob", "alice", "late")]));
    state.apply(&ClientEvent::NewMessage(msg("bob", "alice", "after close")));
    assert_eq!(state.unread(&user("bob")), 1);
}

// =============================================================================
// recent contacts
// =============================================================================

#[test]
fn sender_is_promoted_without_duplicates() {
    let (mut state, _) = state_for("alice");
    state.set_contacts([user("bob"), user("carol"), user("bob"), user("alice"), user("dave")]);
    assert_eq!(state.recent_contacts(), &[user("bob"), user("carol"), user("dave")]);

    state.apply(&ClientEvent::NewMessage(msg("dave", "alice", "hi")));
    state.apply(&ClientEvent::NewMessage(msg("erin", "alice", "new face")));

    assert_eq!(state.recent_contacts(), &[user("erin"), user("dave"), user("bob"), user("carol")]);
}

#[test]
fn sent_message_shows_in_open_conversation() {
    let (mut state, _) = state_for("alice");
    let sub = state.begin_select(user("bob"));
    state.finish_load(&sub, Vec::new());
    let sent = msg("alice", "bob", "hello");

    state.record_sent(&sent);
    state.record_sent(&sent);

    assert_eq!(state.messages(), std::slice::from_ref(&sent));
    assert_eq!(state.recent_contacts().first(), Some(&user("bob")));
}

// =============================================================================
// presence
// =============================================================================

#[test]
fn presence_replaces_set_and_excludes_self_from_count() {
    let (mut state, _) = state_for("alice");

    assert!(state.apply(&ClientEvent::PresenceChanged { online: set(&["alice", "bob", "carol"]), epoch: 1 }));
    assert_eq!(state.online_count(), 2);

    assert!(state.apply(&ClientEvent::PresenceChanged { online: set(&["alice"]), epoch: 2 }));
    assert_eq!(state.online_count(), 0);
    assert!(!state.is_online(&user("bob")));
}

#[test]
fn out_of_order_presence_converges_on_newest_epoch() {
    let (mut state, _) = state_for("alice");

    state.apply(&ClientEvent::PresenceChanged { online: set(&["alice", "bob"]), epoch: 4 });
    assert!(!state.apply(&ClientEvent::PresenceChanged { online: set(&["alice", "bob", "carol"]), epoch: 3 }));

    assert_eq!(state.online(), &set(&["alice", "bob"]));
    assert_eq!(state.presence_epoch(), Some(4));
}

#[test]
fn new_session_resets_presence_epoch() {
    let (mut state, _) = state_for("alice");
    state.apply(&ClientEvent::PresenceChanged { online: set(&["alice", "bob"]), epoch: 40 });

    state.apply(&ClientEvent::Connected { client_id: "c".into(), user_id: user("alice") });
    assert!(state.apply(&ClientEvent::PresenceChanged { online: set(&["alice"]), epoch: 1 }));

    assert_eq!(state.online(), &set(&["alice"]));
}
