//! End-to-end session behaviour against in-memory transports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use parlor_chat::{
    ChatError, DeliveryStatus, IdentityHandle, LocalIdentity, SessionConfig, SessionDriver,
    SessionHandle, SessionNotice, SessionState, SessionView, Side,
};
use parlor_shared::{ChatApi, ChatId, ConversationSnapshot, FetchTarget, LiveChannel, TransportError, UserId};

// ---------------------------------------------------------------------------
// In-memory transports
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockApi {
    stored: Mutex<Vec<Value>>,
    fail_sends: AtomicBool,
    resolve_error: Mutex<Option<TransportError>>,
    resolve_delay: Mutex<Option<Duration>>,
    send_gate: Mutex<Option<Arc<Notify>>>,
    send_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockApi {
    fn store(&self, message: Value) {
        self.stored.lock().unwrap().push(message);
    }

    fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            chat_id: Some(ChatId::new("c1")),
            participants: vec![UserId::new("U1"), UserId::new("U2")],
            messages: self.stored.lock().unwrap().clone(),
        }
    }

    fn gate_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn resolve_or_create(&self, _counterpart: &UserId) -> Result<ConversationSnapshot, TransportError> {
        let delay = *self.resolve_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.resolve_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.snapshot())
    }

    async fn send_message(&self, _chat_id: &ChatId, text: &str) -> Result<Value, TransportError> {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = self.send_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection reset".into()));
        }
        let message = json!({
            "_id": format!("srv-{n}"),
            "text": text,
            "sender": { "_id": "U1" },
            "createdAt": chrono::Utc::now().to_rfc3339(),
        });
        self.store(message.clone());
        Ok(json!({ "success": true, "data": message }))
    }

    async fn fetch_conversation(&self, _target: &FetchTarget) -> Result<ConversationSnapshot, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot())
    }

    async fn current_user(&self) -> Result<UserId, TransportError> {
        Ok(UserId::new("U1"))
    }
}

struct MockLive {
    connected: AtomicBool,
    accept_sends: AtomicBool,
    rooms: Mutex<HashMap<ChatId, mpsc::Sender<Value>>>,
    sent: Mutex<Vec<String>>,
    left: Mutex<Vec<ChatId>>,
}

impl MockLive {
    fn new(accept_sends: bool) -> Self {
        Self {
            connected: AtomicBool::new(true),
            accept_sends: AtomicBool::new(accept_sends),
            rooms: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            left: Mutex::new(Vec::new()),
        }
    }

    async fn push(&self, frame: Value) {
        let rooms: Vec<_> = self.rooms.lock().unwrap().values().cloned().collect();
        for room in rooms {
            room.send(frame.clone()).await.unwrap();
        }
    }
}

#[async_trait]
impl LiveChannel for MockLive {
    async fn subscribe(&self, chat_id: &ChatId) -> Result<mpsc::Receiver<Value>, TransportError> {
        let (tx, rx) = mpsc::channel(64);
        self.rooms.lock().unwrap().insert(chat_id.clone(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, chat_id: &ChatId) {
        self.rooms.lock().unwrap().remove(chat_id);
        self.left.lock().unwrap().push(chat_id.clone());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, _chat_id: &ChatId, text: &str) -> bool {
        if !self.accept_sends.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(text.to_string());
        true
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn me() -> IdentityHandle {
    IdentityHandle::new(LocalIdentity::Resolved(UserId::new("U1")))
}

async fn open(
    api: &Arc<MockApi>,
    live: Option<&Arc<MockLive>>,
    identity: &IdentityHandle,
) -> Result<SessionHandle, ChatError> {
    let live = live.map(|l| l.clone() as Arc<dyn LiveChannel>);
    SessionDriver::new(api.clone(), live, SessionConfig::default())
        .open(UserId::new("U2"), None, identity.subscribe())
        .await
}

async fn wait_for(handle: &SessionHandle, pred: impl Fn(&SessionView) -> bool) -> SessionView {
    let mut rx = handle.subscribe_view();
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            {
                let view = rx.borrow_and_update();
                if pred(&*view) {
                    return view.clone();
                }
            }
            rx.changed().await.expect("session task stopped");
        }
    })
    .await
    .expect("condition not reached")
}

fn count_text(view: &SessionView, text: &str) -> usize {
    view.messages.iter().filter(|m| m.text == text).count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn optimistic_placeholder_then_rest_confirmation() {
    let api = Arc::new(MockApi::default());
    let identity = me();
    let handle = open(&api, None, &identity).await.unwrap();
    assert_eq!(handle.view().state, SessionState::Active);
    assert_eq!(handle.view().chat_id, Some(ChatId::new("c1")));

    let gate = api.gate_sends();
    handle.submit("  hello ").await.unwrap();

    let view = wait_for(&handle, |v| v.messages.len() == 1).await;
    let placeholder = &view.messages[0];
    assert!(placeholder.id.is_local());
    assert_eq!(placeholder.status, DeliveryStatus::Sending);
    assert_eq!(placeholder.side, Side::Local);
    assert_eq!(placeholder.text, "hello");

    gate.notify_one();
    let view = wait_for(&handle, |v| v.messages.iter().any(|m| m.status == DeliveryStatus::Sent)).await;
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].id.as_str(), "srv-1");
    assert_eq!(view.messages[0].side, Side::Local);

    // Later polls return the stored copy; the list must not grow.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(api.fetch_calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(handle.view().messages.len(), 1);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn blank_submit_makes_no_transport_call() {
    let api = Arc::new(MockApi::default());
    let identity = me();
    let mut handle = open(&api, None, &identity).await.unwrap();

    handle.submit("   ").await.unwrap();
    assert_eq!(
        handle.next_notice().await,
        Some(SessionNotice::Rejected { text: "   ".into(), error: ChatError::EmptyMessage })
    );
    assert_eq!(api.send_calls.load(Ordering::SeqCst), 0);
    assert!(handle.view().messages.is_empty());

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn failed_send_restores_draft_and_retry_succeeds() {
    let api = Arc::new(MockApi::default());
    api.fail_sends.store(true, Ordering::SeqCst);
    let identity = me();
    let mut handle = open(&api, None, &identity).await.unwrap();

    handle.submit("hi").await.unwrap();
    match handle.next_notice().await {
        Some(SessionNotice::SendFailed { draft, error, .. }) => {
            assert_eq!(draft, "hi");
            assert!(matches!(error, ChatError::TransportFailure(TransportError::Network(_))));
        }
        other => panic!("unexpected notice: {other:?}"),
    }
    let view = wait_for(&handle, |v| v.messages.iter().any(|m| m.status == DeliveryStatus::Failed)).await;
    assert_eq!(view.messages[0].display_text(), "hi (failed to send)");

    api.fail_sends.store(false, Ordering::SeqCst);
    handle.submit("hi").await.unwrap();

    let view = wait_for(&handle, |v| v.messages.iter().any(|m| m.status == DeliveryStatus::Sent)).await;
    let sent: Vec<_> = view
        .messages
        .iter()
        .filter(|m| m.text == "hi" && m.status == DeliveryStatus::Sent)
        .collect();
    assert_eq!(sent.len(), 1);
    assert_eq!(count_text(&view, "hi"), 2);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn identical_text_in_flight_is_rejected() {
    let api = Arc::new(MockApi::default());
    let _gate = api.gate_sends();
    let identity = me();
    let mut handle = open(&api, None, &identity).await.unwrap();

    handle.submit("same").await.unwrap();
    handle.submit("same").await.unwrap();
    assert_eq!(
        handle.next_notice().await,
        Some(SessionNotice::Rejected { text: "same".into(), error: ChatError::SendInFlight })
    );
    assert_eq!(api.send_calls.load(Ordering::SeqCst), 1);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn live_send_confirmed_by_echo_and_poll_without_duplicates() {
    let api = Arc::new(MockApi::default());
    let live = Arc::new(MockLive::new(true));
    let identity = me();
    let mut handle = open(&api, Some(&live), &identity).await.unwrap();
    assert!(handle.view().live_connected);

    handle.submit("yo").await.unwrap();
    wait_for(&handle, |v| v.messages.len() == 1).await;
    assert_eq!(live.sent.lock().unwrap().as_slice(), ["yo".to_string()]);
    assert_eq!(api.send_calls.load(Ordering::SeqCst), 0);

    let stored = json!({ "_id": "srv-9", "text": "yo", "sender": "U1", "createdAt": chrono::Utc::now().to_rfc3339() });
    api.store(stored.clone());
    live.push(json!({ "type": "message", "chatId": "c1", "message": stored })).await;

    let view = wait_for(&handle, |v| v.messages.iter().any(|m| m.id.as_str() == "srv-9")).await;
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].side, Side::Local);

    // The echo deadline passes without a failure notice, and polling keeps
    // the list at one entry.
    assert!(tokio::time::timeout(Duration::from_secs(20), handle.next_notice()).await.is_err());
    assert_eq!(count_text(&handle.view(), "yo"), 1);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn live_send_without_echo_fails_after_timeout() {
    let api = Arc::new(MockApi::default());
    let live = Arc::new(MockLive::new(true));
    let identity = me();
    let mut handle = open(&api, Some(&live), &identity).await.unwrap();

    handle.submit("lost").await.unwrap();
    match handle.next_notice().await {
        Some(SessionNotice::SendFailed { draft, error, .. }) => {
            assert_eq!(draft, "lost");
            assert_eq!(error, ChatError::TransportFailure(TransportError::Timeout));
        }
        other => panic!("unexpected notice: {other:?}"),
    }

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn refused_live_frame_falls_back_to_rest() {
    let api = Arc::new(MockApi::default());
    let live = Arc::new(MockLive::new(false));
    let identity = me();
    let handle = open(&api, Some(&live), &identity).await.unwrap();

    handle.submit("via rest").await.unwrap();
    wait_for(&handle, |v| v.messages.iter().any(|m| m.status == DeliveryStatus::Sent)).await;
    assert_eq!(api.send_calls.load(Ordering::SeqCst), 1);
    assert!(live.sent.lock().unwrap().is_empty());

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn unattributable_live_events_are_dropped() {
    let api = Arc::new(MockApi::default());
    let live = Arc::new(MockLive::new(true));
    let identity = me();
    let handle = open(&api, Some(&live), &identity).await.unwrap();

    live.push(json!({ "_id": "x1", "text": "spam", "sender": "U7" })).await;
    live.push(json!({ "chatId": "c2", "_id": "x2", "text": "elsewhere", "sender": "U2" })).await;
    live.push(json!({ "_id": "m1", "text": "from agent", "sender": { "_id": "U2" } })).await;

    let view = wait_for(&handle, |v| !v.messages.is_empty()).await;
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].text, "from agent");
    assert_eq!(view.messages[0].side, Side::Remote);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.view().messages.len(), 1);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn polling_picks_up_new_messages() {
    let api = Arc::new(MockApi::default());
    let identity = me();
    let handle = open(&api, None, &identity).await.unwrap();

    api.store(json!({ "_id": "m1", "text": "any news?", "senderId": "U2", "createdAt": "2024-01-01T00:00:00Z" }));
    let view = wait_for(&handle, |v| v.messages.len() == 1).await;
    assert_eq!(view.messages[0].side, Side::Remote);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn late_identity_reclassifies_history() {
    let api = Arc::new(MockApi::default());
    api.store(json!({ "_id": "m1", "text": "mine", "sender": { "_id": "U1" }, "createdAt": "2024-01-01T00:00:00Z" }));
    api.store(json!({ "_id": "m2", "text": "theirs", "sender": "U2", "createdAt": "2024-01-01T00:00:01Z" }));

    let identity = IdentityHandle::pending();
    let mut handle = open(&api, None, &identity).await.unwrap();
    let view = handle.view();
    assert!(!view.identity_resolved);
    assert!(view.messages.iter().all(|m| m.side == Side::Remote));

    handle.submit("too early").await.unwrap();
    assert_eq!(
        handle.next_notice().await,
        Some(SessionNotice::Rejected { text: "too early".into(), error: ChatError::IdentityPending })
    );

    identity.resolve(UserId::new("U1"));
    let view = wait_for(&handle, |v| v.identity_resolved).await;
    assert_eq!(view.messages[0].side, Side::Local);
    assert_eq!(view.messages[1].side, Side::Remote);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn resolution_failure_blocks_open() {
    let api = Arc::new(MockApi::default());
    *api.resolve_error.lock().unwrap() = Some(TransportError::NotAuthenticated);
    let identity = me();
    assert_eq!(open(&api, None, &identity).await.err(), Some(ChatError::NotAuthenticated));

    let api = Arc::new(MockApi::default());
    *api.resolve_delay.lock().unwrap() = Some(Duration::from_secs(60));
    assert_eq!(
        open(&api, None, &identity).await.err(),
        Some(ChatError::TransportFailure(TransportError::Timeout))
    );
}

#[tokio::test(start_paused = true)]
async fn close_leaves_room_and_discards_late_results() {
    let api = Arc::new(MockApi::default());
    let live = Arc::new(MockLive::new(false));
    let identity = me();
    let handle = open(&api, Some(&live), &identity).await.unwrap();

    let gate = api.gate_sends();
    handle.submit("bye").await.unwrap();
    wait_for(&handle, |v| v.messages.len() == 1).await;

    let view_rx = handle.subscribe_view();
    handle.close().await;
    assert_eq!(live.left.lock().unwrap().as_slice(), [ChatId::new("c1")]);

    gate.notify_one();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let view = view_rx.borrow().clone();
    assert_eq!(view.state, SessionState::Closed);
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].status, DeliveryStatus::Sending);
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_merges_server_state() {
    let api = Arc::new(MockApi::default());
    let identity = me();
    let handle = open(&api, None, &identity).await.unwrap();

    api.store(json!({ "_id": "m1", "text": "listing updated", "sender": "U2" }));
    handle.refresh().await.unwrap();

    let view = wait_for(&handle, |v| v.messages.len() == 1).await;
    assert_eq!(view.state, SessionState::Active);

    handle.close().await;
}
