//! Data model: `Transcription`, `AgentResponse`, `SynthesisResult`, and the
//! other payloads workers pass between each other.

use std::fmt;
use std::pin::Pin;

use futures::stream::Stream;
use serde::{Deserialize, Serialize};

/// A speech segment pushed by the transcriber. Immutable after creation
/// except for `is_interrupt`, which the transcriptions worker stamps before
/// forwarding to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
    pub is_interrupt: bool,
}

impl Transcription {
    pub fn new(text: impl Into<String>, confidence: f32, is_final: bool) -> Self {
        Self { text: text.into(), confidence, is_final, is_interrupt: false }
    }

    /// Convenience constructor matching `Conversation::receive_message`:
    /// a synthetic, maximum-confidence, final transcription.
    pub fn synthetic(text: impl Into<String>) -> Self {
        Self::new(text, 1.0, true)
    }
}

/// What the transcriptions worker hands to the agent for a final,
/// non-interrupt-swallowed transcription.
#[derive(Debug, Clone)]
pub struct AgentInput {
    pub transcription: Transcription,
    pub conversation_id: String,
}

/// Tagged variant emitted by the agent.
#[derive(Debug, Clone)]
pub enum AgentResponse {
    Message(BotMessage),
    FillerAudio,
    FollowUpAudio,
    BacktrackAudio,
    Stop,
}

/// A message the bot wants to say — plain text or pre-rendered SSML.
#[derive(Debug, Clone)]
pub enum BotMessage {
    Text(String),
    Ssml(String),
}

impl BotMessage {
    pub fn text(&self) -> &str {
        match self {
            BotMessage::Text(t) | BotMessage::Ssml(t) => t,
        }
    }
}

impl fmt::Display for BotMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// One chunk of synthesized audio.
#[derive(Debug, Clone)]
pub struct SpeechChunk {
    pub bytes: Vec<u8>,
    pub is_last: bool,
}

/// A lazy, single-consumer, finite sequence of synthesized audio chunks,
/// plus the function that maps elapsed audio time back to the text prefix
/// actually spoken — used when a turn is cut off mid-sentence.
pub struct SynthesisResult {
    pub chunks: Pin<Box<dyn Stream<Item = SpeechChunk> + Send>>,
    pub resolve_prefix: Box<dyn Fn(f64) -> String + Send + Sync>,
}

impl SynthesisResult {
    pub fn new<S, F>(chunks: S, resolve_prefix: F) -> Self
    where
        S: Stream<Item = SpeechChunk> + Send + 'static,
        F: Fn(f64) -> String + Send + Sync + 'static,
    {
        Self { chunks: Box::pin(chunks), resolve_prefix: Box::new(resolve_prefix) }
    }

    /// An empty synthesis result for messages with no alphanumerics.
    pub fn empty() -> Self {
        Self::new(futures::stream::empty(), |_seconds| String::new())
    }
}

/// A request to run a named, agent-initiated side effect (call transfer,
/// order lookup, ...), queued by the agent and drained by the actions
/// worker.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action_name: String,
    pub params: serde_json::Value,
    pub conversation_id: String,
}

/// What running an `ActionRequest` produced.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub action_name: String,
    pub output: serde_json::Value,
}

/// Coarse sentiment the synthesizer can use to color prosody.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotSentiment {
    pub emotion: Option<String>,
}
