//! Transcript model: an append-only event log with publish/flush hooks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

/// Who said a given transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    Human,
    Bot,
}

/// A single transcript entry. Bot messages may be appended empty and
/// mutated as synthesis chunks stream out; they are only published once
/// marked complete.
pub struct Message {
    pub sender: Sender,
    pub timestamp: SystemTime,
    text: Mutex<String>,
    published: AtomicBool,
}

impl Message {
    fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self { sender, timestamp: SystemTime::now(), text: Mutex::new(text.into()), published: AtomicBool::new(false) }
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.lock() = text.into();
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::SeqCst)
    }
}

/// Published when the supervisor terminates an active conversation.
#[derive(Debug, Clone)]
pub struct TranscriptCompleteEvent {
    pub conversation_id: String,
    pub transcript: String,
}

/// Sink for conversation-lifecycle events. The concrete subscriber (metrics,
/// persistence, a call-session adapter) is out of scope; this is the seam
/// the core publishes through.
#[async_trait]
pub trait EventsManager: Send + Sync {
    async fn publish_transcript_complete(&self, event: TranscriptCompleteEvent);
}

/// An `EventsManager` that drops everything. The default when the caller
/// doesn't wire one up.
#[derive(Default)]
pub struct NullEventsManager;

#[async_trait]
impl EventsManager for NullEventsManager {
    async fn publish_transcript_complete(&self, event: TranscriptCompleteEvent) {
        debug!("no events manager attached, dropping transcript-complete event for {}", event.conversation_id);
    }
}

/// Ordered sequence of transcript messages. Messages are appended in the
/// order turns *begin*; late completion only mutates text, never order.
pub struct Transcript {
    messages: Mutex<Vec<Arc<Message>>>,
    events_manager: Mutex<Arc<dyn EventsManager>>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self { messages: Mutex::new(Vec::new()), events_manager: Mutex::new(Arc::new(NullEventsManager)) }
    }

    pub fn attach_events_manager(&self, manager: Arc<dyn EventsManager>) {
        *self.events_manager.lock() = manager;
    }

    pub fn add_message(&self, sender: Sender, text: impl Into<String>) -> Arc<Message> {
        let message = Arc::new(Message::new(sender, text));
        self.messages.lock().push(message.clone());
        message
    }

    pub fn count_human_messages(&self) -> usize {
        self.messages.lock().iter().filter(|m| m.sender == Sender::Human).count()
    }

    /// Publishes a bot message at most once.
    pub fn mark_complete(&self, message: &Arc<Message>) {
        message.published.store(true, Ordering::SeqCst);
    }

    /// Renders every human message plus every bot message that has actually
    /// been published. A bot message is appended empty when its turn begins
    /// and only filled in as synthesis streams out; skipping unpublished
    /// ones keeps a turn that never finished (e.g. a conversation torn down
    /// mid-speech) from leaking a blank line into the transcript.
    pub fn to_string_full(&self) -> String {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.sender == Sender::Human || m.is_published())
            .map(|m| format!("{:?}: {}", m.sender, m.text()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn publish_complete(&self, conversation_id: &str) {
        let transcript = self.to_string_full();
        let manager = self.events_manager.lock().clone();
        manager.publish_transcript_complete(TranscriptCompleteEvent { conversation_id: conversation_id.to_string(), transcript }).await;
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sender::Human => write!(f, "HUMAN"),
            Sender::Bot => write!(f, "BOT"),
        }
    }
}
