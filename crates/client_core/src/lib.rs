use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use shared::protocol::ChatMessage;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

pub mod backend;
pub mod config;
pub mod error;
pub mod transcript;

pub use backend::{AssistantBackend, HttpAssistantBackend};
pub use config::{ChatConfig, ConfigError};
pub use error::SyncError;
pub use transcript::{MessageRow, RowAlignment, Transcript};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenPhase {
    Loading,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    Loaded { messages: usize },
    Failed(SyncError),
    AlreadyMounted,
    /// The screen was unmounted before the response arrived.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    EmptyInput,
    NotReady,
    Unmounted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { reply: String },
    Rejected(SendRejection),
    Failed(SyncError),
    /// The screen was unmounted before the round trip finished.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    PhaseChanged(ScreenPhase),
    TranscriptReplaced {
        len: usize,
    },
    MessagesAppended {
        first_index: usize,
        messages: Vec<ChatMessage>,
    },
    SendStateChanged {
        sending: bool,
    },
    InputChanged(String),
    SyncFailed(SyncError),
}

/// What the presentation layer should draw right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenView {
    Loading,
    Ready {
        rows: Vec<MessageRow>,
        input: String,
        sending: bool,
    },
}

/// Keeps the local transcript of one thread consistent with the assistant
/// service.
///
/// History loads and sends are serialized through `sync_gate` in the order
/// they were issued, so every exchange lands in the transcript in submission
/// order and a reload never interleaves with an in-flight send.
pub struct ConversationController {
    config: ChatConfig,
    backend: Arc<dyn AssistantBackend>,
    inner: Mutex<ControllerState>,
    sync_gate: Mutex<()>,
    pending_sends: AtomicUsize,
    events: broadcast::Sender<ControllerEvent>,
}

struct ControllerState {
    phase: ScreenPhase,
    mounted: bool,
    auto_load_started: bool,
    transcript: Transcript,
    input: String,
}

/// Counts one send as in flight until dropped, including when the caller
/// abandons the send future part way through.
struct PendingSend<'a> {
    pending: &'a AtomicUsize,
    events: &'a broadcast::Sender<ControllerEvent>,
}

impl<'a> PendingSend<'a> {
    fn start(
        pending: &'a AtomicUsize,
        events: &'a broadcast::Sender<ControllerEvent>,
    ) -> Self {
        if pending.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = events.send(ControllerEvent::SendStateChanged { sending: true });
        }
        Self { pending, events }
    }
}

impl Drop for PendingSend<'_> {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self
                .events
                .send(ControllerEvent::SendStateChanged { sending: false });
        }
    }
}

impl ConversationController {
    pub fn new(config: ChatConfig, backend: Arc<dyn AssistantBackend>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            backend,
            inner: Mutex::new(ControllerState {
                phase: ScreenPhase::Loading,
                mounted: true,
                auto_load_started: false,
                transcript: Transcript::new(),
                input: String::new(),
            }),
            sync_gate: Mutex::new(()),
            pending_sends: AtomicUsize::new(0),
            events,
        })
    }

    /// Builds a controller talking to the HTTP assistant service named in
    /// `config`.
    pub fn connect(config: ChatConfig) -> reqwest::Result<Arc<Self>> {
        let backend = HttpAssistantBackend::new(&config)?;
        Ok(Self::new(config, Arc::new(backend)))
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Runs the automatic history load. Only the first call fetches.
    pub async fn mount(&self) -> HistoryOutcome {
        {
            let mut guard = self.inner.lock().await;
            if guard.auto_load_started {
                return HistoryOutcome::AlreadyMounted;
            }
            guard.auto_load_started = true;
        }
        self.load_history().await
    }

    /// Stops all further state changes; responses still in flight are
    /// dropped when they arrive.
    pub async fn unmount(&self) {
        let mut guard = self.inner.lock().await;
        if guard.mounted {
            guard.mounted = false;
            debug!(thread_id = %self.config.thread_id(), "conversation screen unmounted");
        }
    }

    /// Fetches the thread's history and replaces the transcript with it.
    ///
    /// On failure the transcript is left as it was. The screen returns to
    /// `Ready` either way.
    pub async fn load_history(&self) -> HistoryOutcome {
        {
            let mut guard = self.inner.lock().await;
            if !guard.mounted {
                return HistoryOutcome::Discarded;
            }
            self.set_phase(&mut guard, ScreenPhase::Loading);
        }

        let _gate = self.sync_gate.lock().await;
        if !self.inner.lock().await.mounted {
            return HistoryOutcome::Discarded;
        }

        let thread_id = self.config.thread_id();
        let result = self.backend.fetch_history(thread_id).await;

        let mut guard = self.inner.lock().await;
        if !guard.mounted {
            debug!(%thread_id, "discarding history response for unmounted screen");
            return HistoryOutcome::Discarded;
        }

        let outcome = match result {
            Ok(messages) => {
                let len = messages.len();
                guard.transcript.replace(messages);
                info!(%thread_id, messages = len, "conversation history loaded");
                let _ = self.events.send(ControllerEvent::TranscriptReplaced { len });
                HistoryOutcome::Loaded { messages: len }
            }
            Err(err) => {
                if err.is_malformed() {
                    warn!(
                        %thread_id,
                        operation = err.operation(),
                        error = %err,
                        "unexpected conversation history format"
                    );
                } else {
                    error!(
                        %thread_id,
                        operation = err.operation(),
                        error = %err,
                        "failed to fetch conversation history"
                    );
                }
                let _ = self.events.send(ControllerEvent::SyncFailed(err.clone()));
                HistoryOutcome::Failed(err)
            }
        };
        self.set_phase(&mut guard, ScreenPhase::Ready);
        outcome
    }

    pub async fn set_input(&self, text: impl Into<String>) {
        let text = text.into();
        let mut guard = self.inner.lock().await;
        if guard.mounted && guard.input != text {
            guard.input = text.clone();
            let _ = self.events.send(ControllerEvent::InputChanged(text));
        }
    }

    pub async fn input(&self) -> String {
        self.inner.lock().await.input.clone()
    }

    /// Sends whatever is currently in the input field.
    pub async fn submit(&self) -> SendOutcome {
        let text = self.input().await;
        self.send_message(&text).await
    }

    /// Sends `text` and, once the assistant replies, appends the user message
    /// and the reply to the transcript in one update.
    ///
    /// Blank text is ignored without touching the network. On failure the
    /// transcript and the input field are left untouched.
    pub async fn send_message(&self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Rejected(SendRejection::EmptyInput);
        }

        let _pending = {
            let guard = self.inner.lock().await;
            if !guard.mounted {
                return SendOutcome::Rejected(SendRejection::Unmounted);
            }
            if guard.phase == ScreenPhase::Loading {
                return SendOutcome::Rejected(SendRejection::NotReady);
            }
            PendingSend::start(&self.pending_sends, &self.events)
        };

        let _gate = self.sync_gate.lock().await;
        let thread_id = self.config.thread_id();
        let result = if self.inner.lock().await.mounted {
            Some(self.backend.send_message(thread_id, text).await)
        } else {
            None
        };

        let mut guard = self.inner.lock().await;
        let Some(result) = result.filter(|_| guard.mounted) else {
            debug!(%thread_id, "discarding send-message response for unmounted screen");
            return SendOutcome::Discarded;
        };

        let outcome = match result {
            Ok(reply) => {
                let first_index = guard.transcript.append_exchange(text, &reply);
                let _ = self.events.send(ControllerEvent::MessagesAppended {
                    first_index,
                    messages: guard.transcript.messages()[first_index..].to_vec(),
                });
                if guard.input == text {
                    guard.input.clear();
                    let _ = self.events.send(ControllerEvent::InputChanged(String::new()));
                }
                debug!(%thread_id, first_index, "exchange appended to transcript");
                SendOutcome::Delivered { reply }
            }
            Err(err) => {
                error!(
                    %thread_id,
                    operation = err.operation(),
                    error = %err,
                    "failed to send message"
                );
                let _ = self.events.send(ControllerEvent::SyncFailed(err.clone()));
                SendOutcome::Failed(err)
            }
        };
        outcome
    }

    pub async fn phase(&self) -> ScreenPhase {
        self.inner.lock().await.phase
    }

    pub async fn is_loading(&self) -> bool {
        self.phase().await == ScreenPhase::Loading
    }

    pub async fn is_sending(&self) -> bool {
        self.pending_sends.load(Ordering::SeqCst) > 0
    }

    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.transcript.messages().to_vec()
    }

    pub async fn rows_from(&self, start: usize) -> Vec<MessageRow> {
        self.inner.lock().await.transcript.rows_from(start)
    }

    pub async fn view(&self) -> ScreenView {
        let guard = self.inner.lock().await;
        match guard.phase {
            ScreenPhase::Loading => ScreenView::Loading,
            ScreenPhase::Ready => ScreenView::Ready {
                rows: guard.transcript.rows(),
                input: guard.input.clone(),
                sending: self.pending_sends.load(Ordering::SeqCst) > 0,
            },
        }
    }

    fn set_phase(&self, state: &mut ControllerState, phase: ScreenPhase) {
        if state.phase != phase {
            state.phase = phase;
            let _ = self.events.send(ControllerEvent::PhaseChanged(phase));
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
