use super::*;
use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::ThreadId;
use std::{collections::VecDeque, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};

use crate::error::{HISTORY_OPERATION, SEND_OPERATION};

struct TestBackend {
    history: Result<Vec<ChatMessage>, SyncError>,
    reload_history: Option<Result<Vec<ChatMessage>, SyncError>>,
    replies: Mutex<VecDeque<Result<String, SyncError>>>,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    started: Option<mpsc::UnboundedSender<String>>,
    sent: Arc<Mutex<Vec<String>>>,
    history_calls: Arc<Mutex<u32>>,
}

impl TestBackend {
    fn ok(history: Vec<ChatMessage>) -> Self {
        Self {
            history: Ok(history),
            reload_history: None,
            replies: Mutex::new(VecDeque::new()),
            gates: Mutex::new(VecDeque::new()),
            started: None,
            sent: Arc::new(Mutex::new(Vec::new())),
            history_calls: Arc::new(Mutex::new(0)),
        }
    }

    fn failing_history(err: SyncError) -> Self {
        let mut backend = Self::ok(Vec::new());
        backend.history = Err(err);
        backend
    }

    fn with_reload_history(mut self, reload: Result<Vec<ChatMessage>, SyncError>) -> Self {
        self.reload_history = Some(reload);
        self
    }

    fn with_replies(self, replies: Vec<Result<String, SyncError>>) -> Self {
        self.replies
            .try_lock()
            .expect("fresh backend")
            .extend(replies);
        self
    }

    /// Every send blocks until the matching sender is fired.
    fn gated(
        mut self,
        count: usize,
    ) -> (
        Self,
        Vec<oneshot::Sender<()>>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let mut releases = Vec::with_capacity(count);
        {
            let mut gates = self.gates.try_lock().expect("fresh backend");
            for _ in 0..count {
                let (tx, rx) = oneshot::channel();
                gates.push_back(rx);
                releases.push(tx);
            }
        }
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        self.started = Some(started_tx);
        (self, releases, started_rx)
    }
}

#[async_trait]
impl AssistantBackend for TestBackend {
    async fn fetch_history(&self, _thread_id: &ThreadId) -> Result<Vec<ChatMessage>, SyncError> {
        let mut calls = self.history_calls.lock().await;
        *calls += 1;
        match (&self.reload_history, *calls) {
            (Some(reload), calls) if calls > 1 => reload.clone(),
            _ => self.history.clone(),
        }
    }

    async fn send_message(&self, _thread_id: &ThreadId, text: &str) -> Result<String, SyncError> {
        self.sent.lock().await.push(text.to_string());
        if let Some(started) = &self.started {
            let _ = started.send(text.to_string());
        }
        let gate = self.gates.lock().await.pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(format!("reply to {text}")))
    }
}

fn test_config() -> ChatConfig {
    ChatConfig::new("http://127.0.0.1:9", "abc").expect("config")
}

fn transport_error(operation: &'static str) -> SyncError {
    SyncError::transport(operation, "connection refused")
}

async fn mounted_controller(backend: TestBackend) -> Arc<ConversationController> {
    let controller = ConversationController::new(test_config(), Arc::new(backend));
    let outcome = controller.mount().await;
    assert!(matches!(outcome, HistoryOutcome::Loaded { .. }));
    controller
}

#[tokio::test]
async fn mount_replaces_transcript_with_history_and_ends_loading() {
    let history = vec![
        ChatMessage::user("one"),
        ChatMessage::assistant("two"),
        ChatMessage::user("three"),
    ];
    let controller =
        ConversationController::new(test_config(), Arc::new(TestBackend::ok(history.clone())));
    let mut events = controller.subscribe_events();
    assert!(controller.is_loading().await);
    assert_eq!(controller.view().await, ScreenView::Loading);

    let outcome = controller.mount().await;

    assert_eq!(outcome, HistoryOutcome::Loaded { messages: 3 });
    assert_eq!(controller.transcript().await, history);
    assert_eq!(controller.phase().await, ScreenPhase::Ready);
    assert_eq!(
        events.recv().await.expect("event"),
        ControllerEvent::TranscriptReplaced { len: 3 }
    );
    assert_eq!(
        events.recv().await.expect("event"),
        ControllerEvent::PhaseChanged(ScreenPhase::Ready)
    );
}

#[tokio::test]
async fn mount_only_fetches_history_once() {
    let backend = TestBackend::ok(vec![ChatMessage::user("hi")]);
    let history_calls = Arc::clone(&backend.history_calls);
    let controller = ConversationController::new(test_config(), Arc::new(backend));

    controller.mount().await;
    let second = controller.mount().await;

    assert_eq!(second, HistoryOutcome::AlreadyMounted);
    assert_eq!(*history_calls.lock().await, 1);
}

#[tokio::test]
async fn failed_history_leaves_transcript_empty_and_reaches_ready() {
    let err = SyncError::malformed(HISTORY_OPERATION, "`conversation_history` is null");
    let controller = ConversationController::new(
        test_config(),
        Arc::new(TestBackend::failing_history(err.clone())),
    );
    let mut events = controller.subscribe_events();

    let outcome = controller.mount().await;

    assert_eq!(outcome, HistoryOutcome::Failed(err.clone()));
    assert!(controller.transcript().await.is_empty());
    assert!(!controller.is_loading().await);
    assert_eq!(
        events.recv().await.expect("event"),
        ControllerEvent::SyncFailed(err)
    );
}

#[tokio::test]
async fn failed_reload_keeps_existing_transcript() {
    let backend = TestBackend::ok(vec![ChatMessage::user("kept")])
        .with_reload_history(Err(transport_error(HISTORY_OPERATION)));
    let controller = mounted_controller(backend).await;

    let outcome = controller.load_history().await;

    assert!(matches!(outcome, HistoryOutcome::Failed(_)));
    assert_eq!(controller.transcript().await, vec![ChatMessage::user("kept")]);
    assert_eq!(controller.phase().await, ScreenPhase::Ready);
}

#[tokio::test]
async fn reload_replaces_rather_than_merges() {
    let backend = TestBackend::ok(vec![ChatMessage::user("old")])
        .with_reload_history(Ok(vec![ChatMessage::assistant("fresh")]));
    let controller = mounted_controller(backend).await;

    let outcome = controller.load_history().await;

    assert_eq!(outcome, HistoryOutcome::Loaded { messages: 1 });
    assert_eq!(
        controller.transcript().await,
        vec![ChatMessage::assistant("fresh")]
    );
}

#[tokio::test]
async fn blank_messages_are_ignored_without_network_calls() {
    let backend = TestBackend::ok(Vec::new());
    let sent = Arc::clone(&backend.sent);
    let controller = mounted_controller(backend).await;

    for text in ["", " ", "\t\n", "   \r\n  "] {
        controller.set_input(text).await;
        assert_eq!(
            controller.submit().await,
            SendOutcome::Rejected(SendRejection::EmptyInput)
        );
    }

    assert!(sent.lock().await.is_empty());
    assert!(controller.transcript().await.is_empty());
}

#[tokio::test]
async fn successful_send_appends_pair_and_clears_input() {
    let backend = TestBackend::ok(vec![ChatMessage::assistant("welcome")])
        .with_replies(vec![Ok("hi there".to_string())]);
    let controller = mounted_controller(backend).await;
    let mut events = controller.subscribe_events();

    controller.set_input("hello").await;
    let outcome = controller.submit().await;

    assert_eq!(
        outcome,
        SendOutcome::Delivered {
            reply: "hi there".to_string()
        }
    );
    assert_eq!(
        controller.transcript().await,
        vec![
            ChatMessage::assistant("welcome"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi there"),
        ]
    );
    assert_eq!(controller.input().await, "");
    assert!(!controller.is_sending().await);

    assert_eq!(
        events.recv().await.expect("event"),
        ControllerEvent::InputChanged("hello".to_string())
    );
    assert_eq!(
        events.recv().await.expect("event"),
        ControllerEvent::SendStateChanged { sending: true }
    );
    assert_eq!(
        events.recv().await.expect("event"),
        ControllerEvent::MessagesAppended {
            first_index: 1,
            messages: vec![ChatMessage::user("hello"), ChatMessage::assistant("hi there")],
        }
    );
}

#[tokio::test]
async fn failed_send_keeps_transcript_and_input() {
    let err = SyncError::Status {
        operation: SEND_OPERATION,
        status: 500,
    };
    let backend = TestBackend::ok(vec![ChatMessage::user("earlier")])
        .with_replies(vec![Err(err.clone())]);
    let controller = mounted_controller(backend).await;

    controller.set_input("retry me").await;
    let outcome = controller.submit().await;

    assert_eq!(outcome, SendOutcome::Failed(err));
    assert_eq!(controller.transcript().await, vec![ChatMessage::user("earlier")]);
    assert_eq!(controller.input().await, "retry me");

    let resubmitted = controller.submit().await;

    assert_eq!(
        resubmitted,
        SendOutcome::Delivered {
            reply: "reply to retry me".to_string()
        }
    );
    assert_eq!(
        controller.transcript().await,
        vec![
            ChatMessage::user("earlier"),
            ChatMessage::user("retry me"),
            ChatMessage::assistant("reply to retry me"),
        ]
    );
    assert_eq!(controller.input().await, "");
}

#[tokio::test]
async fn sends_before_history_load_are_not_ready() {
    let backend = TestBackend::ok(Vec::new());
    let sent = Arc::clone(&backend.sent);
    let controller = ConversationController::new(test_config(), Arc::new(backend));

    assert_eq!(
        controller.send_message("too early").await,
        SendOutcome::Rejected(SendRejection::NotReady)
    );
    assert!(sent.lock().await.is_empty());
}

#[tokio::test]
async fn concurrent_sends_land_in_submission_order() {
    let (backend, mut releases, mut started) = TestBackend::ok(Vec::new())
        .with_replies(vec![Ok("r1".to_string()), Ok("r2".to_string())])
        .gated(2);
    let controller = mounted_controller(backend).await;

    let first = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.send_message("first").await })
    };
    assert_eq!(started.recv().await.expect("first started"), "first");

    let second = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.send_message("second").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        started.try_recv().is_err(),
        "second send must wait for the first round trip"
    );
    assert!(controller.is_sending().await);

    let second_release = releases.pop().expect("second gate");
    let first_release = releases.pop().expect("first gate");
    first_release.send(()).expect("release first");
    assert_eq!(started.recv().await.expect("second started"), "second");
    second_release.send(()).expect("release second");

    assert!(matches!(
        first.await.expect("join"),
        SendOutcome::Delivered { .. }
    ));
    assert!(matches!(
        second.await.expect("join"),
        SendOutcome::Delivered { .. }
    ));
    assert_eq!(
        controller.transcript().await,
        vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("r1"),
            ChatMessage::user("second"),
            ChatMessage::assistant("r2"),
        ]
    );
    assert!(!controller.is_sending().await);
}

#[tokio::test]
async fn abandoned_send_clears_sending_state() {
    let (backend, _releases, mut started) = TestBackend::ok(Vec::new()).gated(1);
    let controller = mounted_controller(backend).await;
    let mut events = controller.subscribe_events();

    let timed_out =
        tokio::time::timeout(Duration::from_millis(50), controller.send_message("slow")).await;

    assert!(timed_out.is_err());
    assert_eq!(started.recv().await.expect("send started"), "slow");
    assert!(!controller.is_sending().await);
    assert_eq!(
        controller.view().await,
        ScreenView::Ready {
            rows: Vec::new(),
            input: String::new(),
            sending: false,
        }
    );
    assert_eq!(
        events.recv().await.expect("event"),
        ControllerEvent::SendStateChanged { sending: true }
    );
    assert_eq!(
        events.recv().await.expect("event"),
        ControllerEvent::SendStateChanged { sending: false }
    );
    assert!(controller.transcript().await.is_empty());
}

#[tokio::test]
async fn responses_after_unmount_are_discarded() {
    let (backend, mut releases, mut started) = TestBackend::ok(Vec::new()).gated(1);
    let controller = mounted_controller(backend).await;

    let pending = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.send_message("bye").await })
    };
    started.recv().await.expect("send started");

    controller.unmount().await;
    releases.pop().expect("gate").send(()).expect("release");

    assert_eq!(pending.await.expect("join"), SendOutcome::Discarded);
    assert!(controller.transcript().await.is_empty());
    assert_eq!(
        controller.send_message("again").await,
        SendOutcome::Rejected(SendRejection::Unmounted)
    );
    assert_eq!(controller.load_history().await, HistoryOutcome::Discarded);
}

#[tokio::test]
async fn ready_view_maps_transcript_to_rows() {
    let controller = mounted_controller(TestBackend::ok(vec![
        ChatMessage::user("question"),
        ChatMessage::assistant("answer"),
    ]))
    .await;
    controller.set_input("draft").await;

    let ScreenView::Ready {
        rows,
        input,
        sending,
    } = controller.view().await
    else {
        panic!("expected ready view");
    };
    assert_eq!(input, "draft");
    assert!(!sending);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].alignment, RowAlignment::Trailing);
    assert_eq!(rows[1].alignment, RowAlignment::Leading);
    assert_eq!(rows[1].key, 1);
}

#[derive(Clone)]
struct ServerState {
    history_body: Value,
    reply: Option<String>,
    history_threads: Arc<Mutex<Vec<String>>>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

async fn handle_history(
    State(state): State<ServerState>,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> Json<Value> {
    state
        .history_threads
        .lock()
        .await
        .push(query.get("thread_id").cloned().unwrap_or_default());
    Json(state.history_body.clone())
}

async fn handle_send(
    State(state): State<ServerState>,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    let thread_id = query.get("thread_id").cloned().unwrap_or_default();
    let message = query.get("message").cloned().unwrap_or_default();
    state.sent.lock().await.push((thread_id.clone(), message.clone()));
    match &state.reply {
        Some(reply) => Ok(Json(json!({
            "thread_id": thread_id,
            "response": reply,
            "message_received": message,
        }))),
        None => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn spawn_assistant_server(history_body: Value, reply: Option<&str>) -> (String, ServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServerState {
        history_body,
        reply: reply.map(str::to_string),
        history_threads: Arc::new(Mutex::new(Vec::new())),
        sent: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/conversation-history/", get(handle_history))
        .route("/send-message/", post(handle_send))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

fn http_controller(server_url: &str) -> Arc<ConversationController> {
    let config = ChatConfig::new(server_url, "abc")
        .expect("config")
        .with_request_timeout(Duration::from_secs(5));
    ConversationController::connect(config).expect("http client")
}

#[tokio::test]
async fn http_mount_loads_history_for_configured_thread() {
    let (server_url, state) = spawn_assistant_server(
        json!({
            "thread_id": "abc",
            "conversation_history": [{ "sender": "user", "content": "hi" }]
        }),
        None,
    )
    .await;
    let controller = http_controller(&server_url);
    assert!(controller.is_loading().await);

    let outcome = controller.mount().await;

    assert_eq!(outcome, HistoryOutcome::Loaded { messages: 1 });
    assert_eq!(controller.transcript().await, vec![ChatMessage::user("hi")]);
    assert!(!controller.is_loading().await);
    assert_eq!(*state.history_threads.lock().await, vec!["abc".to_string()]);
}

#[tokio::test]
async fn http_non_array_history_is_treated_as_empty() {
    for history in [json!(null), json!({ "sender": "user" }), json!("nope")] {
        let (server_url, _state) =
            spawn_assistant_server(json!({ "conversation_history": history }), None).await;
        let controller = http_controller(&server_url);

        let outcome = controller.mount().await;

        let HistoryOutcome::Failed(err) = outcome else {
            panic!("expected failed history load");
        };
        assert!(err.is_malformed());
        assert!(controller.transcript().await.is_empty());
        assert!(!controller.is_loading().await);
    }
}

#[tokio::test]
async fn http_send_appends_exchange_and_encodes_query() {
    let (server_url, state) = spawn_assistant_server(
        json!({ "conversation_history": [] }),
        Some("hi there"),
    )
    .await;
    let controller = http_controller(&server_url);
    controller.mount().await;

    controller.set_input("hello").await;
    let outcome = controller.submit().await;

    assert_eq!(
        outcome,
        SendOutcome::Delivered {
            reply: "hi there".to_string()
        }
    );
    assert_eq!(
        controller.transcript().await,
        vec![ChatMessage::user("hello"), ChatMessage::assistant("hi there")]
    );
    assert_eq!(controller.input().await, "");

    controller.send_message("a&b=c ?").await;
    assert_eq!(
        *state.sent.lock().await,
        vec![
            ("abc".to_string(), "hello".to_string()),
            ("abc".to_string(), "a&b=c ?".to_string()),
        ]
    );
}

#[tokio::test]
async fn http_server_error_leaves_state_for_retry() {
    let (server_url, _state) =
        spawn_assistant_server(json!({ "conversation_history": [] }), None).await;
    let controller = http_controller(&server_url);
    controller.mount().await;

    controller.set_input("hello").await;
    let outcome = controller.submit().await;

    assert_eq!(
        outcome,
        SendOutcome::Failed(SyncError::Status {
            operation: SEND_OPERATION,
            status: 500,
        })
    );
    assert!(controller.transcript().await.is_empty());
    assert_eq!(controller.input().await, "hello");
}

#[tokio::test]
async fn http_unreachable_server_fails_without_panicking() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let controller = http_controller(&format!("http://{addr}"));

    let outcome = controller.mount().await;

    assert!(matches!(
        outcome,
        HistoryOutcome::Failed(SyncError::Transport { .. })
    ));
    assert!(controller.transcript().await.is_empty());
    assert_eq!(controller.phase().await, ScreenPhase::Ready);
}
